//! Conversation tickets and their resolution.

pub mod model;
pub mod resolver;

pub use model::{AgentBinding, AgentKind, AiConfig, Ticket, TicketStatus};
pub use resolver::TicketResolver;
