//! Inbound message pipeline.
//!
//! Every gateway event flows through:
//! 1. `normalizer::normalize()`: raw payload to `InboundMessage`
//! 2. `TicketResolver::resolve()`: find or create the conversation's ticket
//! 3. `AssignmentOrchestrator::assign()`: sticky, scored, then rule fallback
//! 4. `Dispatcher::execute()`: generate a reply, send it only above the threshold
//! 5. `ExecutionAuditor::record()`: one append-only row per message
//!
//! `MessageProcessor` ties the stages together.

pub mod dispatcher;
pub mod normalizer;
pub mod orchestrator;
pub mod processor;
pub mod rules;
pub mod selector;
pub mod types;
