//! Shared primitives for the consensus core: trait seams towards the chain
//! store, the spent-output index and the script interpreter, plus the
//! normative constants every component agrees on.

use bitcoin::blockdata::block::Header as BitcoinHeader;
use bitcoin::{Block, BlockHash, OutPoint, Script, Transaction, Txid};
use bitflags::bitflags;

/// 1 BTC in satoshis.
pub const COIN: u64 = 100_000_000;

/// Initial block reward.
pub const INITIAL_SUBSIDY: u64 = 50 * COIN;

/// Subsidy halves every 210,000 blocks.
pub const HALVING_INTERVAL: u32 = 210_000;

/// Upper bound on the money supply, in satoshis.
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

/// Maximum serialized block size, in bytes. Also bounds the transaction
/// count of a block.
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Maximum signature operations per block.
pub const MAX_BLOCK_SIGOPS: usize = MAX_BLOCK_SIZE / 50;

/// Number of confirmations before a coinbase output may be spent.
pub const COINBASE_MATURITY: u32 = 100;

/// Returns the amount of subsidy in satoshis at the given height.
///
/// The subsidy is halved every [`HALVING_INTERVAL`] blocks, rounding toward
/// zero, and runs out entirely after 64 halvings.
pub fn block_subsidy(height: u32) -> u64 {
    let halvings = height / HALVING_INTERVAL;

    // Force the subsidy to zero when the right shift would be undefined.
    if halvings >= 64 {
        return 0;
    }

    INITIAL_SUBSIDY >> halvings
}

/// Identity of a spending input: the transaction consuming an output and the
/// position of the consuming input within it. The mirror image of
/// [`bitcoin::OutPoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InPoint {
    /// Hash of the spending transaction.
    pub txid: Txid,
    /// Index of the input within the spending transaction.
    pub vin: u32,
}

impl InPoint {
    /// Constructs a new instance of [`InPoint`].
    pub fn new(txid: Txid, vin: u32) -> Self {
        Self { txid, vin }
    }
}

impl std::fmt::Display for InPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.vin)
    }
}

bitflags! {
    /// Script verification flags handed to the script interpreter.
    ///
    /// Bit positions follow the interpreter convention, hence the gaps: only
    /// the flags a soft-fork activation can actually switch on are carried.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VerificationFlags: u32 {
        /// Evaluate P2SH subscripts (BIP16).
        const P2SH = 1 << 0;
        /// Enforce strict DER signatures (BIP66).
        const DERSIG = 1 << 2;
        /// Verify OP_CHECKLOCKTIMEVERIFY (BIP65).
        const CHECKLOCKTIMEVERIFY = 1 << 9;
    }
}

/// Contract of the external script interpreter.
pub trait ScriptVerifier {
    /// Evaluates the input script of `tx.input[input_index]` against the
    /// previous output script under the given flag set.
    fn verify(
        &self,
        prev_script: &Script,
        tx: &Transaction,
        input_index: usize,
        flags: VerificationFlags,
    ) -> bool;
}

/// Oracle answering "which input spent this output on the committed chain".
///
/// Implemented by the persistent spent-output index; consensus code only
/// ever sees this seam.
pub trait SpentIndex {
    /// Returns the input that spent the given output, or `None` if the
    /// output is unspent or nonexistent.
    fn spending_input(&self, outpoint: &OutPoint) -> Option<InPoint>;
}

/// Contract of the persistent block store backing the chain view.
pub trait ChainStore {
    /// Height of the chain tip, or `None` for an empty chain.
    fn last_height(&self) -> Option<u32>;

    /// Returns the block at the given height.
    fn block_by_height(&self, height: u32) -> Option<Block>;

    /// Returns the block with the given hash together with its height.
    fn block_by_hash(&self, hash: &BlockHash) -> Option<(Block, u32)>;

    /// Returns the header at the given height.
    fn header(&self, height: u32) -> Option<BitcoinHeader>;

    /// Returns the transaction with the given hash together with the height
    /// of the block containing it.
    fn transaction(&self, txid: &Txid) -> Option<(Transaction, u32)>;

    /// Appends a block at the tip.
    fn push(&mut self, block: Block);

    /// Removes and returns the tip block.
    fn pop(&mut self) -> Option<Block>;
}

/// Reference in-memory [`ChainStore`].
///
/// Linear-scan lookups; intended for tests and tooling, not for serving a
/// real chain.
#[derive(Debug, Default)]
pub struct MemoryChainStore {
    blocks: Vec<Block>,
}

impl MemoryChainStore {
    /// Constructs an empty chain store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a chain store holding `blocks`, the block at index `i`
    /// sitting at height `i`.
    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }
}

impl ChainStore for MemoryChainStore {
    fn last_height(&self) -> Option<u32> {
        self.blocks.len().checked_sub(1).map(|height| height as u32)
    }

    fn block_by_height(&self, height: u32) -> Option<Block> {
        self.blocks.get(height as usize).cloned()
    }

    fn block_by_hash(&self, hash: &BlockHash) -> Option<(Block, u32)> {
        self.blocks
            .iter()
            .enumerate()
            .find(|(_, block)| block.block_hash() == *hash)
            .map(|(height, block)| (block.clone(), height as u32))
    }

    fn header(&self, height: u32) -> Option<BitcoinHeader> {
        self.blocks.get(height as usize).map(|block| block.header)
    }

    fn transaction(&self, txid: &Txid) -> Option<(Transaction, u32)> {
        for (height, block) in self.blocks.iter().enumerate() {
            for tx in &block.txdata {
                if tx.compute_txid() == *txid {
                    return Some((tx.clone(), height as u32));
                }
            }
        }
        None
    }

    fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    fn pop(&mut self) -> Option<Block> {
        self.blocks.pop()
    }
}
