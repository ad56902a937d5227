use std::fmt;
use std::sync::Mutex;

use crate::domain::controller_model::utils::statistics::ANALYTICS_TARGET;

/// Something an operator has to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorReport {
    /// A request could not be allocated for a domain reason.
    AllocationFailed { request: String, report: String },
    /// An executable failed to start or stop.
    ExecutionFailed { executable: String, report: String },
    /// Infrastructure or invariant failure.
    InternalError { component: &'static str, message: String },
}

impl fmt::Display for OperatorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorReport::AllocationFailed { request, report } => write!(f, "Allocation of request '{}' failed:\n{}", request, report),
            OperatorReport::ExecutionFailed { executable, report } => write!(f, "Execution of {} failed:\n{}", executable, report),
            OperatorReport::InternalError { component, message } => write!(f, "Internal error in {}: {}", component, message),
        }
    }
}

pub trait OperatorReporter: fmt::Debug + Send + Sync {
    fn report(&self, report: OperatorReport);
}

/// Logs reports and emits them as analytics events.
#[derive(Debug, Default)]
pub struct LogOperatorReporter;

impl OperatorReporter for LogOperatorReporter {
    fn report(&self, report: OperatorReport) {
        match &report {
            OperatorReport::InternalError { component, .. } => {
                log::error!("{}", report);
                tracing::error!(target: ANALYTICS_TARGET, LogDescription = "InternalError", ComponentType = *component);
            }
            OperatorReport::AllocationFailed { request, .. } => {
                log::warn!("{}", report);
                tracing::warn!(target: ANALYTICS_TARGET, LogDescription = "AllocationFailed", RequestId = request.as_str());
            }
            OperatorReport::ExecutionFailed { executable, .. } => {
                log::warn!("{}", report);
                tracing::warn!(target: ANALYTICS_TARGET, LogDescription = "ExecutionFailed", ExecutableName = executable.as_str());
            }
        }
    }
}

/// Collects reports in memory, used to inspect what was escalated.
#[derive(Debug, Default)]
pub struct RecordingOperatorReporter {
    reports: Mutex<Vec<OperatorReport>>,
}

impl RecordingOperatorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<OperatorReport> {
        match self.reports.lock() {
            Ok(reports) => reports.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl OperatorReporter for RecordingOperatorReporter {
    fn report(&self, report: OperatorReport) {
        log::debug!("{}", report);
        match self.reports.lock() {
            Ok(mut reports) => reports.push(report),
            Err(poisoned) => poisoned.into_inner().push(report),
        }
    }
}
