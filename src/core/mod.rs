//! Core domain models for test cases
//!
//! This module defines the fundamental data structures that represent
//! test cases, steps, variables and their results.

pub mod config;
pub mod condition;
pub mod state;
pub mod step;
pub mod testcase;
pub mod value;
pub mod variables;

pub use condition::{aggregate_status, should_skip};
pub use state::*;
pub use step::*;
pub use testcase::*;
pub use value::Value;
pub use variables::VariableStore;
