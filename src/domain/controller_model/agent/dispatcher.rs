use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::domain::controller_model::agent::command::{Command, CommandResult};
use crate::domain::controller_model::utils::id::AgentId;
use crate::error::{Error, Result};

/// Something controlling one or more devices: an in-process simulation or a connection to a remote
/// agent.
pub trait DeviceAgent: fmt::Debug + Send {
    fn id(&self) -> AgentId;

    /// Performs `command` and answers with `Success` or `Failure`. May block.
    fn handle(&mut self, command: Command) -> CommandResult;
}

/// Sends a command to an agent and waits for the answer.
pub trait CommandDispatch: fmt::Debug + Send + Sync {
    /// Blocks until the agent answered or the dispatcher's timeout elapsed. Never retries.
    fn send(&self, agent_id: &AgentId, command: Command) -> CommandResult;
}

enum AgentMessage {
    Perform { command: Command, reply_to: mpsc::Sender<CommandResult> },
    Shutdown,
}

/// Proxy forwards commands to the thread owning the agent.
#[derive(Debug, Clone)]
pub struct AgentProxy {
    pub id: AgentId,
    tx: mpsc::Sender<AgentMessage>,
}

impl AgentProxy {
    pub fn call(&self, command: Command, timeout: Duration) -> CommandResult {
        let name = command.name();
        let (reply_tx, reply_rx) = mpsc::channel();

        if self.tx.send(AgentMessage::Perform { command, reply_to: reply_tx }).is_err() {
            return CommandResult::failure(format!("agent '{}' is not running", self.id));
        }

        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!("Command '{}' to agent '{}' timed out after {:?}.", name, self.id, timeout);
                CommandResult::Timeout
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => CommandResult::failure(format!("agent '{}' terminated while handling '{}'", self.id, name)),
        }
    }
}

/// Thread-safe directory AgentId -> proxy. Every agent lives on its own thread, commands to one
/// agent are handled in the order they were sent.
pub struct AgentRegistry {
    directory: Arc<RwLock<HashMap<AgentId, AgentProxy>>>,
    timeout: Duration,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry").field("agents", &self.agent_ids()).field("timeout", &self.timeout).finish()
    }
}

impl AgentRegistry {
    pub fn new(timeout: Duration) -> Self {
        AgentRegistry { directory: Arc::new(RwLock::new(HashMap::new())), timeout, workers: Mutex::new(Vec::new()) }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn spawn_agent(&self, agent: Box<dyn DeviceAgent>) -> Result<AgentProxy> {
        let id = agent.id();
        let (tx, rx) = mpsc::channel::<AgentMessage>();
        let proxy = AgentProxy { id: id.clone(), tx };

        {
            let mut directory = self.directory.write().map_err(|e| Error::StorePoisoned(e.to_string()))?;
            if directory.contains_key(&id) {
                return Err(Error::ModelConstructionError(format!("Agent '{}' is registered twice", id)));
            }
            directory.insert(id.clone(), proxy.clone());
        }

        let agent_id = id.clone();
        let worker = thread::Builder::new().name(format!("Agent-{}", id)).spawn(move || {
            log::info!("Agent {} started.", agent_id);
            Self::run_agent_loop(agent, rx);
            log::info!("Agent {} stopped.", agent_id);
        })?;

        match self.workers.lock() {
            Ok(mut workers) => workers.push(worker),
            Err(poisoned) => poisoned.into_inner().push(worker),
        }
        Ok(proxy)
    }

    fn run_agent_loop(mut agent: Box<dyn DeviceAgent>, rx: mpsc::Receiver<AgentMessage>) {
        while let Ok(msg) = rx.recv() {
            match msg {
                AgentMessage::Perform { command, reply_to } => {
                    let _ = reply_to.send(agent.handle(command));
                }
                AgentMessage::Shutdown => break,
            }
        }
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = match self.directory.read() {
            Ok(directory) => directory.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        };
        ids.sort();
        ids
    }

    pub fn proxy(&self, agent_id: &AgentId) -> Option<AgentProxy> {
        match self.directory.read() {
            Ok(directory) => directory.get(agent_id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(agent_id).cloned(),
        }
    }

    /// Stops all agent threads after they finished their queued commands.
    pub fn shutdown(&self) {
        let proxies: Vec<AgentProxy> = match self.directory.write() {
            Ok(mut directory) => directory.drain().map(|(_, proxy)| proxy).collect(),
            Err(poisoned) => poisoned.into_inner().drain().map(|(_, proxy)| proxy).collect(),
        };
        for proxy in proxies {
            let _ = proxy.tx.send(AgentMessage::Shutdown);
        }

        let workers: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for worker in workers {
            if worker.join().is_err() {
                log::error!("An agent thread panicked.");
            }
        }
    }
}

impl Drop for AgentRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl CommandDispatch for AgentRegistry {
    fn send(&self, agent_id: &AgentId, command: Command) -> CommandResult {
        match self.proxy(agent_id) {
            Some(proxy) => proxy.call(command, self.timeout),
            None => CommandResult::failure(format!("agent '{}' is not connected", agent_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::controller_model::agent::command::CommandPayload;
    use crate::domain::controller_model::agent::simulated_agent::SimulatedDevice;

    #[test]
    fn test_commands_reach_agent_thread() {
        let registry = AgentRegistry::new(Duration::from_secs(1));
        let device = SimulatedDevice::new(AgentId::new("mcu-agent"));
        let handle = device.device_handle();
        registry.spawn_agent(Box::new(device)).unwrap();

        let result = registry.send(&AgentId::new("mcu-agent"), Command::ListRooms);

        assert_eq!(result, CommandResult::Success(CommandPayload::Rooms(Vec::new())));
        assert_eq!(handle.performed_names(), vec!["ListRooms"]);
    }

    #[test]
    fn test_unknown_agent_is_a_failure() {
        let registry = AgentRegistry::new(Duration::from_secs(1));
        let result = registry.send(&AgentId::new("nobody"), Command::ListRooms);
        assert!(matches!(result, CommandResult::Failure(failure) if failure.message.contains("not connected")));
    }

    #[test]
    fn test_slow_agent_times_out() {
        let registry = AgentRegistry::new(Duration::from_millis(20));
        let device = SimulatedDevice::new(AgentId::new("slow"));
        device.device_handle().set_latency(Duration::from_millis(300));
        registry.spawn_agent(Box::new(device)).unwrap();

        assert_eq!(registry.send(&AgentId::new("slow"), Command::ListRooms), CommandResult::Timeout);
    }

    #[test]
    fn test_duplicate_agent_is_rejected() {
        let registry = AgentRegistry::new(Duration::from_secs(1));
        registry.spawn_agent(Box::new(SimulatedDevice::new(AgentId::new("a")))).unwrap();
        assert!(registry.spawn_agent(Box::new(SimulatedDevice::new(AgentId::new("a")))).is_err());
    }
}
