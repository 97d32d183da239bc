//! # Rules
//!
//! Load rule evaluation.
//!
//! Responsibilities:
//! - Apply condition operators to payload values
//! - Evaluate `All` / `Any` / `Not` / `Just` rule trees
//! - Split dispatch batches per destination into accepted and rejected

pub mod condition;
pub mod engine;
pub mod error;
pub mod operators;

pub use condition::{Matchable, evaluate_with, resolve_variable};
pub use engine::{DispatchSplit, LoadRuleEngine};
pub use error::RuleError;
