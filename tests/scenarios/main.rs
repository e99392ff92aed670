//! Scenario-based tests for stepflow

mod helpers;

mod control_flow;
mod failure_handling;
mod masking;
mod parallel_groups;
mod suite;
