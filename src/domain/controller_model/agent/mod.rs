pub mod codec;
pub mod command;
pub mod dispatcher;
pub mod protocol;
pub mod remote_agent;
pub mod simulated_agent;
