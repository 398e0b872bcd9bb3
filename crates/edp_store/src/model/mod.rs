//! Domain records persisted by the data layer.
//!
//! # Responsibility
//! - Define the typed shape of every entity and its field-level invariants.
//! - Describe table schemas shared by both storage backends.
//!
//! # Invariants
//! - Every record is identified by a stable, non-nil `EntityId`.
//! - Timestamps are Unix epoch milliseconds; money is integer minor units.

pub mod cost;
pub mod edp;
pub mod entity;
pub mod ledger;
pub mod project;
