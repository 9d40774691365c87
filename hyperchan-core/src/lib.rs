//! Simulation and analysis engine comparing a classic (two-party) payment
//! channel network against a hyper (multi-party) variant with equivalent
//! per-participant wealth: network synthesis, cheapest-route search, and
//! multi-party settlement.
//!
//! The CLI entry points, GraphML/text report formatting beyond the basic
//! writers in [`export`], generic descriptive statistics, and the
//! payment-workload generator's caller-facing glue all live outside this
//! crate; see the module docs on [`workload`] for the one piece of
//! workload-generation logic this crate does own.

/// Configuration-time error types.
pub mod error;
/// GraphML export (hyperedge form and clique/2-section form).
pub mod export;
/// Multi-party channel: balances, fee model, feasibility, settlement.
pub mod channel;
/// Seed-driven classic/hyper network synthesis.
pub mod generator;
/// Owns participants and channels; cheapest-route search and settlement.
pub mod network;
/// Opaque participant identity.
pub mod participant;
/// Payment workload generation and execution.
pub mod workload;

pub use channel::HyperChannel;
pub use error::ConfigError;
pub use generator::{NetworkPair, NetworkPairBuilder, NetworkPairParams};
pub use network::{HyperNetwork, PaymentOutcome, PaymentRoute};
pub use participant::ParticipantId;
pub use workload::{Workload, WorkloadBuilder, WorkloadResults};
