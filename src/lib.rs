//! Agent Dispatch: inbound chat auto-assignment pipeline.

pub mod agents;
pub mod app;
pub mod config;
pub mod error;
pub mod executions;
pub mod gateway;
pub mod llm;
pub mod pipeline;
pub mod store;
pub mod testing;
pub mod tickets;
