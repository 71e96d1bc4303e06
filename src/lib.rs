//! kun - phase workflow engine for Kubernetes node upgrades.
//!
//! Decomposes `upgrade node` into a tree of phases gated by node role,
//! feature gates and user selection, and runs them one at a time.

pub mod config;
pub mod context;
pub mod error;
pub mod features;
pub mod logging;
pub mod output;
pub mod phases;
pub mod workflow;
