use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};

use crate::domain::simulator::simulator::{SharedSimulator, SystemSimulator};

/// Clock with a manually controlled time. Clones share the same time, so a test can keep one handle
/// and advance the time seen by the controller.
#[derive(Debug, Clone)]
pub struct MockSimulator {
    pub time: Arc<RwLock<DateTime<Utc>>>,
}

impl MockSimulator {
    pub fn new(time: DateTime<Utc>) -> MockSimulator {
        MockSimulator { time: Arc::new(RwLock::new(time)) }
    }

    pub fn set_time(&self, time: DateTime<Utc>) {
        match self.time.write() {
            Ok(mut guard) => *guard = time,
            Err(poisoned) => *poisoned.into_inner() = time,
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let now = self.now();
        self.set_time(now + by);
    }
}

impl SystemSimulator for MockSimulator {
    fn now(&self) -> DateTime<Utc> {
        match self.time.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn clone_box(&self) -> SharedSimulator {
        SharedSimulator(Arc::new(self.clone()))
    }
}
