pub mod actions;
pub mod agent;
pub mod config_cmd;
pub mod plan;
pub mod runtime;
pub mod tools;
pub mod workflow;
