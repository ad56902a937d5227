use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::Result;

/// Target of all tracing events which end up in the statistics file.
pub const ANALYTICS_TARGET: &str = "controller_analytics";

/// Each event consists of a set of key-value-pairs with the measured data or some meta data of the event.
/// This enum specifies all allowed keys and thus the columns of the output file. The tracing field
/// names of analytics events are the variant names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatParameter {
    /// Time in seconds, set by the emitter or relative to collector start.
    Time,

    /// Description why this entry was made
    LogDescription,

    /// "SCHEDULER", "EXECUTOR", "CONTROLLER" or "AGENT"
    ComponentType,

    RequestId,
    RequestState,

    /// Number of reservations touched by the operation
    ReservationCount,

    ExecutableName,
    ExecutableState,
    AgentId,

    /// Command sent or answered
    Command,

    /// Time to process the operation in ms
    ProcessingTime,

    AllocatedCount,
    FailedCount,
    NotificationCount,
}

impl StatParameter {
    /// Column order of the CSV file.
    pub const ALL: [StatParameter; 14] = [
        StatParameter::Time,
        StatParameter::LogDescription,
        StatParameter::ComponentType,
        StatParameter::RequestId,
        StatParameter::RequestState,
        StatParameter::ReservationCount,
        StatParameter::ExecutableName,
        StatParameter::ExecutableState,
        StatParameter::AgentId,
        StatParameter::Command,
        StatParameter::ProcessingTime,
        StatParameter::AllocatedCount,
        StatParameter::FailedCount,
        StatParameter::NotificationCount,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StatParameter::Time => "Time",
            StatParameter::LogDescription => "LogDescription",
            StatParameter::ComponentType => "ComponentType",
            StatParameter::RequestId => "RequestId",
            StatParameter::RequestState => "RequestState",
            StatParameter::ReservationCount => "ReservationCount",
            StatParameter::ExecutableName => "ExecutableName",
            StatParameter::ExecutableState => "ExecutableState",
            StatParameter::AgentId => "AgentId",
            StatParameter::Command => "Command",
            StatParameter::ProcessingTime => "ProcessingTime",
            StatParameter::AllocatedCount => "AllocatedCount",
            StatParameter::FailedCount => "FailedCount",
            StatParameter::NotificationCount => "NotificationCount",
        }
    }

    pub fn from_name(name: &str) -> Option<StatParameter> {
        StatParameter::ALL.into_iter().find(|param| param.name() == name)
    }

    pub fn headers() -> Vec<&'static str> {
        StatParameter::ALL.iter().map(StatParameter::name).collect()
    }
}

/// store values in their native format, only format them when writing to the CSV.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl From<i64> for StatValue {
    fn from(v: i64) -> Self {
        StatValue::Integer(v)
    }
}

impl From<u64> for StatValue {
    fn from(v: u64) -> Self {
        StatValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for StatValue {
    fn from(v: f64) -> Self {
        StatValue::Float(v)
    }
}

impl From<String> for StatValue {
    fn from(v: String) -> Self {
        StatValue::Text(v)
    }
}

impl From<&str> for StatValue {
    fn from(v: &str) -> Self {
        StatValue::Text(v.to_string())
    }
}

impl From<bool> for StatValue {
    fn from(v: bool) -> Self {
        StatValue::Bool(v)
    }
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Integer(i) => write!(f, "{}", i),
            StatValue::Float(v) => write!(f, "{}", v),
            StatValue::Text(t) => write!(f, "{}", t),
            StatValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatisticEvent {
    data: HashMap<StatParameter, StatValue>,
}

impl StatisticEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<V: Into<StatValue>>(&mut self, param: StatParameter, value: V) -> &mut Self {
        self.data.insert(param, value.into());
        self
    }

    pub fn get(&self, param: StatParameter) -> Option<&StatValue> {
        self.data.get(&param)
    }

    fn to_row(&self) -> Vec<String> {
        StatParameter::ALL
            .iter()
            .map(|param| self.data.get(param).map_or_else(|| "NA".to_string(), StatValue::to_string))
            .collect()
    }
}

/// Messages sent from the controller threads to the writer thread.
enum StatsMessage {
    Log(StatisticEvent),
    Flush,
    Shutdown,
}

/// Handle that allows components to log events. The CSV file is written by a background thread.
pub struct StatsCollector {
    sender: mpsc::Sender<StatsMessage>,
    start_time: u64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for StatsCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsCollector").field("start_time", &self.start_time).finish()
    }
}

impl StatsCollector {
    /// Spawns the writer thread. Without a file the statistics go to stdout.
    pub fn init(filename: Option<&Path>) -> Result<Self> {
        let writer: Box<dyn Write + Send> = match filename {
            Some(path) => Box::new(File::create(path)?),
            None => Box::new(io::stdout()),
        };

        let (tx, rx) = mpsc::channel();
        let worker = thread::Builder::new().name("StatsWriter".to_string()).spawn(move || Self::worker_loop(rx, writer))?;

        Ok(StatsCollector { sender: tx, start_time: unix_seconds(), worker: Mutex::new(Some(worker)) })
    }

    fn worker_loop(rx: mpsc::Receiver<StatsMessage>, writer: Box<dyn Write + Send>) {
        let mut csv_wtr = csv::WriterBuilder::new().delimiter(b';').from_writer(writer);

        if let Err(e) = csv_wtr.write_record(StatParameter::headers()) {
            log::error!("Stats Error: Failed to write headers: {}", e);
        }

        for msg in rx {
            match msg {
                StatsMessage::Log(event) => {
                    if let Err(e) = csv_wtr.write_record(event.to_row()) {
                        log::error!("Stats Error: Failed to write record: {}", e);
                    }
                }
                StatsMessage::Flush => {
                    let _ = csv_wtr.flush();
                }
                StatsMessage::Shutdown => {
                    let _ = csv_wtr.flush();
                    break;
                }
            }
        }
    }

    /// Non-blocking, just sends the event to the writer thread.
    pub fn add_event(&self, mut event: StatisticEvent) {
        if event.get(StatParameter::Time).is_none() {
            let relative = unix_seconds().saturating_sub(self.start_time);
            event.set(StatParameter::Time, relative);
        }

        // A dead writer thread must not take the controller down.
        let _ = self.sender.send(StatsMessage::Log(event));
    }

    pub fn flush(&self) {
        let _ = self.sender.send(StatsMessage::Flush);
    }

    /// Writes all pending events and stops the writer thread.
    pub fn shutdown(&self) {
        let _ = self.sender.send(StatsMessage::Shutdown);
        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::error!("Stats writer thread panicked.");
            }
        }
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Collects the fields of analytics events into a [`StatisticEvent`].
struct StatVisitor {
    event: StatisticEvent,
}

impl StatVisitor {
    fn set<V: Into<StatValue>>(&mut self, field: &Field, value: V) {
        if let Some(param) = StatParameter::from_name(field.name()) {
            self.event.set(param, value);
        }
    }
}

impl Visit for StatVisitor {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.set(field, value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.set(field, value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.set(field, value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.set(field, value);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field, value);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.set(field, format!("{:?}", value));
    }
}

/// Tracing layer forwarding every event with target [`ANALYTICS_TARGET`] to a [`StatsCollector`].
#[derive(Debug, Clone)]
pub struct AnalyticsLayer {
    collector: Arc<StatsCollector>,
}

impl AnalyticsLayer {
    pub fn new(collector: Arc<StatsCollector>) -> Self {
        AnalyticsLayer { collector }
    }
}

impl<S: Subscriber> Layer<S> for AnalyticsLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() != ANALYTICS_TARGET {
            return;
        }

        let mut visitor = StatVisitor { event: StatisticEvent::new() };
        event.record(&mut visitor);
        self.collector.add_event(visitor.event);
    }
}

/// Keeps the statistics writer alive, dropping it writes the remaining events.
#[derive(Debug)]
pub struct AnalyticsGuard {
    collector: Arc<StatsCollector>,
}

impl Drop for AnalyticsGuard {
    fn drop(&mut self) {
        self.collector.shutdown();
    }
}

/// Installs the analytics layer as global tracing subscriber.
pub fn init_analytics(filename: Option<&Path>) -> Result<AnalyticsGuard> {
    let collector = Arc::new(StatsCollector::init(filename)?);

    if let Err(e) = tracing_subscriber::registry().with(AnalyticsLayer::new(collector.clone())).try_init() {
        log::warn!("Analytics subscriber not installed, another subscriber is active: {}", e);
    }

    Ok(AnalyticsGuard { collector })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_analytics_events_are_written_as_csv_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.csv");
        let collector = Arc::new(StatsCollector::init(Some(&path)).unwrap());
        let subscriber = tracing_subscriber::registry().with(AnalyticsLayer::new(collector.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(
                target: ANALYTICS_TARGET,
                Time = 42i64,
                LogDescription = "Request allocated",
                ComponentType = "SCHEDULER",
                RequestId = %"req-1",
                ReservationCount = 3u64,
            );
            tracing::info!("ordinary log line, not an analytics event");
        });
        collector.shutdown();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Time;LogDescription;ComponentType;RequestId"));
        assert!(lines[1].starts_with("42;Request allocated;SCHEDULER;req-1;NA;3;"));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        assert_eq!(StatParameter::from_name("ExecutableState"), Some(StatParameter::ExecutableState));
        assert_eq!(StatParameter::from_name("message"), None);
        assert_eq!(StatParameter::headers().len(), StatParameter::ALL.len());
    }
}
