pub mod reservation_task;
pub mod scheduler;
pub mod scheduler_context;
pub mod scheduler_report;
pub mod task;

#[cfg(test)]
mod test_scheduler;
