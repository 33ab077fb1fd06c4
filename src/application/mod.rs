//! Application layer orchestrating the billing flow.
//!
//! [`orchestrator::Orchestrator`] is the entry point: it prices checkouts through the
//! [`catalog::Catalog`], records them in the ledger, and turns verified gateway
//! notifications into subscription changes.

pub mod catalog;
pub mod orchestrator;
pub mod webhook;
