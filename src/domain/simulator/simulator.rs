use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

use crate::api::controller_dto::SimulatorDto;

/// Source of "now" for the scheduler and executor.
pub trait SystemSimulator: std::fmt::Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn clone_box(&self) -> SharedSimulator;
}

#[derive(Debug)]
pub struct SharedSimulator(pub Arc<dyn SystemSimulator>);

impl Clone for SharedSimulator {
    fn clone(&self) -> Self {
        self.0.clone_box()
    }
}

impl std::ops::Deref for SharedSimulator {
    type Target = dyn SystemSimulator;
    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

/// Wall clock, or a simulated clock which starts at a configured instant and then advances in real time.
#[derive(Debug, Clone)]
pub struct Simulator {
    is_simulation: bool,
    simulation_base: DateTime<Utc>,
    real_time_base: Instant,
}

impl Simulator {
    pub fn new(dto: SimulatorDto) -> Simulator {
        let simulation_base = match (dto.is_simulation, dto.simulation_start) {
            (true, Some(start)) => start,
            _ => Utc::now(),
        };

        Simulator { is_simulation: dto.is_simulation, simulation_base, real_time_base: Instant::now() }
    }

    pub fn real_time() -> Simulator {
        Simulator { is_simulation: false, simulation_base: Utc::now(), real_time_base: Instant::now() }
    }
}

impl SystemSimulator for Simulator {
    fn now(&self) -> DateTime<Utc> {
        if self.is_simulation {
            let elapsed = chrono::Duration::from_std(self.real_time_base.elapsed()).unwrap_or(chrono::Duration::zero());
            self.simulation_base + elapsed
        } else {
            Utc::now()
        }
    }

    fn clone_box(&self) -> SharedSimulator {
        SharedSimulator(Arc::new(self.clone()))
    }
}

impl From<SharedSimulator> for Arc<dyn SystemSimulator> {
    fn from(wrapper: SharedSimulator) -> Self {
        wrapper.0
    }
}
