//! Consensus core of the blockchain engine.
//!
//! Takes a candidate block together with a view of the current chain and
//! decides whether it extends the best chain: stateless checks
//! (`check_block`), chain-contextual checks (`accept_block`) and connected
//! checks against the spent-output state (`connect_block`). The chain store,
//! the spent-output index and the script interpreter are reached through the
//! trait seams in `ferricoin-primitives`.

mod chain_params;
mod chain_view;
mod checkpoint;
mod pow;
mod tx_check;
mod validate_block;

pub use chain_params::{ChainParams, MEDIAN_TIME_SPAN};
pub use chain_view::ChainView;
pub use checkpoint::Checkpoint;
pub use pow::{is_valid_proof_of_work, work_required};
pub use tx_check::{
    check_transaction, is_final, legacy_sigops_count, p2sh_sigops_count,
    Error as TransactionError,
};
pub use validate_block::{ActivationSet, BlockValidator};

use ferricoin_primitives::MAX_BLOCK_SIGOPS;

/// Block validation error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Validation observed the shutdown flag at a suspension point. Not a
    /// verdict on the block.
    #[error("service stopped")]
    ServiceStopped,
    /// Transaction count or serialized size out of range.
    #[error("block exceeds size limits")]
    SizeLimits,
    /// The header hash does not satisfy its own claimed target, or the
    /// target itself is out of range.
    #[error("proof of work is invalid")]
    ProofOfWork,
    #[error("block timestamp is too far in the future")]
    FuturisticTimestamp,
    #[error("first transaction is not coinbase")]
    FirstNotCoinbase,
    #[error("block contains extra coinbase transactions")]
    ExtraCoinbases,
    /// Two transactions in the block share a hash.
    #[error("block contains duplicate transactions")]
    Duplicate,
    #[error("too many signature operations (max: {MAX_BLOCK_SIGOPS})")]
    TooManySigs,
    #[error("merkle root does not match the header")]
    MerkleMismatch,
    /// The header bits differ from the difficulty schedule.
    #[error("incorrect proof of work: {{ got: {got:#x}, expected: {expected:#x} }}")]
    IncorrectProofOfWork { got: u32, expected: u32 },
    #[error("block timestamp is not past the median of preceding blocks")]
    TimestampTooEarly,
    #[error("block contains a non-final transaction at index {0}")]
    NonFinalTransaction(usize),
    #[error("block hash does not match the checkpoint at height {0}")]
    CheckpointsFailed(u32),
    #[error("block version {got} is below the minimum {minimum}")]
    OldVersionBlock { got: i32, minimum: i32 },
    #[error("coinbase does not begin with the serialized block height")]
    CoinbaseHeightMismatch,
    /// A transaction hash already exists in the chain with every output of
    /// the prior transaction spent.
    #[error("transaction duplicates an existing fully spent transaction")]
    DuplicateOrSpent,
    /// Some input failed to connect; the cause is logged.
    #[error("input validation failed")]
    ValidateInputsFailed,
    #[error("transaction fees are out of range")]
    FeesOutOfRange,
    #[error("coinbase value exceeds subsidy plus fees")]
    CoinbaseTooLarge,
    /// A required chain object does not exist.
    #[error("object does not exist")]
    NotFound,
    /// Stateless transaction sanity failure.
    #[error(transparent)]
    CheckTransaction(#[from] tx_check::Error),
}
