//! Agent execution records and the auditor that writes them.

pub mod auditor;
pub mod model;

pub use auditor::ExecutionAuditor;
pub use model::{AgentExecution, AssignmentStrategy, ExecutionResult, ExecutionStatus};
