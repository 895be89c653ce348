//! Persistence layer: tickets, agent configuration, executions and history.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::MemoryStore;
pub use traits::{AgentConfigStore, ConversationLog, ExecutionLog, TicketStore};
