//! Configuration-time error types.
//!
//! Everything else that can go wrong at runtime is either a plain value
//! (payment infeasibility, see [`crate::network::PaymentOutcome`]) or a
//! programmer error that panics (API misuse, see module docs on
//! [`crate::generator`] and [`crate::workload`]).

use thiserror::Error;

/// Fatal at construction: the parameter vector given to [`crate::generator`]
/// or [`crate::channel::HyperChannel::new`] cannot produce a valid network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "num_classic_channels ({num_classic_channels}) must be at least \
         num_members - 1 ({min_required})"
    )]
    TooFewClassicChannels { num_classic_channels: usize, min_required: usize },

    #[error("num_members ({0}) must be at least 2")]
    TooFewParticipants(usize),

    #[error("channel member count ({members}) does not match deposit count ({deposits})")]
    MismatchedMembers { members: usize, deposits: usize },

    #[error("channel must have at least 2 distinct members, got {0}")]
    TooFewMembers(usize),

    #[error("channel members contain a duplicate participant")]
    DuplicateMember,

    #[error("negative deposit {0} is not allowed")]
    NegativeDeposit(i64),
}
