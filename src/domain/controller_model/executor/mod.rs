pub mod activation;
pub mod executable;
pub mod execution_report;
pub mod executor;

#[cfg(test)]
mod test_executor;
