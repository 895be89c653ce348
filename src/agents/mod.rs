//! Agent profiles, activation rules and the catalog file they load from.

pub mod catalog;
pub mod model;

pub use catalog::AgentCatalog;
pub use model::{ActivationRule, AgentProfile, MatchedRule};
