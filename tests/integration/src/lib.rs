//! End-to-end tests for the MeshHeal control loop
//!
//! This test suite validates:
//! - Silent relay failure repaired by k-disjoint rerouting
//! - Cascading resource exhaustion isolated at its root cause
//! - Risky plans held for approval and denied on governance silence
//! - Bounded knowledge retention and journal recovery across restarts
//! - Loop-level invariants under randomized inputs

pub mod test_utils;

#[cfg(test)]
mod healing_scenarios;

#[cfg(test)]
mod knowledge_persistence;

#[cfg(test)]
mod loop_properties;
