//! Background dispatch loops.
//!
//! Covers queue draining under the fairness policy, deadline expiry with
//! strike accounting, and exactly-once pre-deadline warnings.

pub mod assigner;
pub mod deadline_monitor;
pub mod warning_ledger;
