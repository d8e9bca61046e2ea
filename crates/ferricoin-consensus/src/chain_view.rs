//! Resolution of headers, transactions and spentness against the committed
//! chain composed with an in-memory orphan branch extending it.

use crate::Error;
use bitcoin::blockdata::block::Header as BitcoinHeader;
use bitcoin::{Block, OutPoint, Transaction, Txid};
use ferricoin_primitives::{ChainStore, SpentIndex};

/// View of the chain a candidate block is validated against.
///
/// Heights at or below `fork_index` resolve through the persistent stores;
/// heights above it resolve through `orphan_chain`, whose entry at
/// `orphan_index` is the candidate block itself.
pub struct ChainView<'a, C> {
    chain: &'a C,
    spent_index: &'a dyn SpentIndex,
    fork_index: u32,
    orphan_chain: &'a [Block],
    orphan_index: usize,
}

impl<'a, C: ChainStore> ChainView<'a, C> {
    /// Constructs a new instance of [`ChainView`].
    pub fn new(
        chain: &'a C,
        spent_index: &'a dyn SpentIndex,
        fork_index: u32,
        orphan_chain: &'a [Block],
        orphan_index: usize,
    ) -> Self {
        debug_assert!(orphan_chain.is_empty() || orphan_index < orphan_chain.len());

        Self {
            chain,
            spent_index,
            fork_index,
            orphan_chain,
            orphan_index,
        }
    }

    /// Header at the given height, from the orphan branch when the height is
    /// above the fork point.
    pub fn fetch_header(&self, height: u32) -> Result<BitcoinHeader, Error> {
        if height > self.fork_index {
            let orphan = (height - self.fork_index - 1) as usize;
            debug_assert!(orphan <= self.orphan_index);
            return self
                .orphan_chain
                .get(orphan)
                .map(|block| block.header)
                .ok_or(Error::NotFound);
        }

        self.chain.header(height).ok_or(Error::NotFound)
    }

    /// Transaction with the given hash and the height it was included at.
    ///
    /// The persistent index answers first; a hit above the fork point is
    /// ignored and the orphan branch is scanned in order instead, so a
    /// branch can spend outputs created below it or earlier within it.
    pub fn fetch_transaction(&self, txid: &Txid) -> Option<(Transaction, u32)> {
        if let Some((tx, height)) = self.chain.transaction(txid) {
            if height <= self.fork_index {
                return Some((tx, height));
            }
        }

        self.fetch_orphan_transaction(txid)
    }

    fn fetch_orphan_transaction(&self, txid: &Txid) -> Option<(Transaction, u32)> {
        for (orphan, block) in self
            .orphan_chain
            .iter()
            .take(self.orphan_index + 1)
            .enumerate()
        {
            for tx in &block.txdata {
                if tx.compute_txid() == *txid {
                    return Some((tx.clone(), self.fork_index + orphan as u32 + 1));
                }
            }
        }

        None
    }

    /// Whether the committed chain contains the transaction at or below the
    /// fork point.
    pub fn transaction_exists(&self, txid: &Txid) -> bool {
        self.chain
            .transaction(txid)
            .is_some_and(|(_, height)| height <= self.fork_index)
    }

    /// Committed spentness: a spend record exists and the spending
    /// transaction sits at or below the fork point.
    pub fn is_output_spent(&self, outpoint: &OutPoint) -> bool {
        self.spent_index
            .spending_input(outpoint)
            .and_then(|spender| self.chain.transaction(&spender.txid))
            .is_some_and(|(_, height)| height <= self.fork_index)
    }

    /// Full double-spend check: the committed chain plus every input of the
    /// orphan branch, excluding the input at `(orphan_index, skip_tx,
    /// skip_input)`, which is the one being validated.
    pub fn is_output_spent_excluding(
        &self,
        outpoint: &OutPoint,
        skip_tx: usize,
        skip_input: usize,
    ) -> bool {
        self.is_output_spent(outpoint) || self.is_orphan_spent(outpoint, skip_tx, skip_input)
    }

    fn is_orphan_spent(&self, outpoint: &OutPoint, skip_tx: usize, skip_input: usize) -> bool {
        for (orphan, block) in self
            .orphan_chain
            .iter()
            .take(self.orphan_index + 1)
            .enumerate()
        {
            for (tx_index, tx) in block.txdata.iter().enumerate() {
                for (input_index, input) in tx.input.iter().enumerate() {
                    if orphan == self.orphan_index
                        && tx_index == skip_tx
                        && input_index == skip_input
                    {
                        continue;
                    }

                    if input.previous_output == *outpoint {
                        return true;
                    }
                }
            }
        }

        false
    }
}
