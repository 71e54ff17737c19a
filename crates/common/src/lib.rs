//! SplitPool Common Library
//!
//! Shared types, constants, and accounting rules for the SplitPool client.
//!
//! ## The contracts are the source of truth
//!
//! Settlement logic lives in the on-chain contracts (group ledger, pool
//! escrow, pool factory). Everything in this workspace is a *mirror*:
//! - **Snapshots, not state**: every local copy is read-only and time-stamped
//! - **Pre-flight, not enforcement**: validation here fails fast before a
//!   transaction is simulated, the contract still has the final word
//! - **Closed ledger**: net balances of a group always sum to zero
//!
//! ## Modules
//!
//! - **Constants**: chain, cache TTLs, limits, gateways
//! - **Errors**: typed errors with stable codes
//! - **Types**: addresses, pools, groups, expenses, intents
//! - **Math**: share division, progress, signed balance arithmetic
//! - **Events**: ledger events and the event log
//! - **Validation**: `check!` macro and intent pre-flight checks
//!
//! This crate is `no_std` compatible when built without the `std` feature.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

// Re-export Vec for submodules based on feature
#[cfg(not(feature = "std"))]
pub use alloc::vec::Vec;
#[cfg(feature = "std")]
pub use std::vec::Vec;

pub mod constants;
pub mod errors;
pub mod types;
pub mod math;
pub mod events;
pub mod validation;

// Re-exports for convenience
pub use errors::*;
pub use types::*;
pub use math::*;
pub use events::*;
pub use validation::*;
