//! Stateless transaction checks and signature-operation counting.

use bitcoin::absolute::LOCK_TIME_THRESHOLD;
use bitcoin::script::Instruction;
use bitcoin::{Amount, Script, Transaction, Txid};
use std::collections::HashSet;

/// Coinbase scripts must be between these many bytes, inclusive.
const COINBASE_SCRIPT_MIN: usize = 2;
const COINBASE_SCRIPT_MAX: usize = 100;

/// Stateless transaction defect.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("transaction has an empty input list")]
    NoInputs,
    #[error("transaction has an empty output list")]
    NoOutputs,
    #[error("output value of {0} is outside the money range")]
    OutputOutOfRange(Amount),
    #[error("outputs sum to {0}, outside the money range")]
    OutputSumOutOfRange(Amount),
    #[error("input {0} repeats an earlier previous output")]
    RepeatedInput(usize),
    #[error(
        "coinbase script of {0} bytes is outside \
        {COINBASE_SCRIPT_MIN}..={COINBASE_SCRIPT_MAX}"
    )]
    CoinbaseScriptLength(usize),
    #[error("input references a null previous output")]
    NullPreviousOutput,
}

/// Checks everything about a transaction that needs no chain context.
///
/// Both sides must be non-empty and every output, as well as the running
/// output sum, must stay inside the money range. A coinbase only has its
/// script length to answer for; any other transaction must reference real,
/// pairwise distinct previous outputs.
pub fn check_transaction(tx: &Transaction) -> Result<(), Error> {
    if tx.input.is_empty() {
        return Err(Error::NoInputs);
    }
    if tx.output.is_empty() {
        return Err(Error::NoOutputs);
    }

    let ceiling = Amount::MAX_MONEY.to_sat();
    let mut sum = 0u64;
    for txout in &tx.output {
        if txout.value.to_sat() > ceiling {
            return Err(Error::OutputOutOfRange(txout.value));
        }
        sum = sum.saturating_add(txout.value.to_sat());
        if sum > ceiling {
            return Err(Error::OutputSumOutOfRange(Amount::from_sat(sum)));
        }
    }

    if tx.is_coinbase() {
        // The single null input is what makes it a coinbase; only the
        // script length window remains to be checked.
        let script_len = tx.input[0].script_sig.len();
        if script_len < COINBASE_SCRIPT_MIN || script_len > COINBASE_SCRIPT_MAX {
            return Err(Error::CoinbaseScriptLength(script_len));
        }
        return Ok(());
    }

    let mut referenced = HashSet::with_capacity(tx.input.len());
    for (index, txin) in tx.input.iter().enumerate() {
        if txin.previous_output.is_null() {
            return Err(Error::NullPreviousOutput);
        }
        if !referenced.insert(txin.previous_output) {
            return Err(Error::RepeatedInput(index));
        }
    }

    Ok(())
}

/// Whether the transaction is final at the given height and block time.
///
/// A transaction is final once its lock time is unset or already in the
/// past, and otherwise when every input opted out of the lock by carrying
/// the final sequence number.
pub fn is_final(tx: &Transaction, height: u32, block_time: u32) -> bool {
    let lock_time = tx.lock_time.to_consensus_u32();
    if lock_time == 0 {
        return true;
    }

    // Below the threshold the lock counts block heights, above it unix time.
    let cutoff = match lock_time < LOCK_TIME_THRESHOLD {
        true => height,
        false => block_time,
    };

    lock_time < cutoff || tx.input.iter().all(|txin| txin.sequence.is_final())
}

/// Signature operations of a transaction under legacy counting, where every
/// CHECKSIG(VERIFY) weighs one and every CHECKMULTISIG(VERIFY) a flat
/// twenty. Input and output scripts all contribute.
pub fn legacy_sigops_count(tx: &Transaction) -> usize {
    let input_scripts = tx.input.iter().map(|txin| txin.script_sig.as_script());
    let output_scripts = tx
        .output
        .iter()
        .map(|txout| txout.script_pubkey.as_script());

    input_scripts
        .chain(output_scripts)
        .map(|script| script.count_sigops_legacy())
        .sum()
}

/// Legacy sigop count of a whole transaction list.
pub fn block_legacy_sigops_count(txdata: &[Transaction]) -> usize {
    txdata.iter().map(legacy_sigops_count).sum()
}

/// Accurate sigop count of a pay-to-script-hash spend.
///
/// The last data push of the input script is the redeem script; inside it a
/// CHECKMULTISIG(VERIFY) preceded by OP_1..OP_16 counts as that many
/// operations instead of twenty. Non-P2SH previous outputs count zero.
///
/// Returns `None` when the input script does not parse; callers classify
/// that as an invalid input.
pub fn p2sh_sigops_count(prev_script: &Script, script_sig: &Script) -> Option<usize> {
    if !prev_script.is_p2sh() {
        return Some(0);
    }

    if script_sig.instructions().any(|instruction| instruction.is_err()) {
        return None;
    }

    let mut last_push = None;
    for instruction in script_sig.instructions() {
        if let Ok(Instruction::PushBytes(push)) = instruction {
            last_push = Some(push);
        }
    }
    let Some(redeem) = last_push else {
        return Some(0);
    };

    Some(Script::from_bytes(redeem.as_bytes()).count_sigops())
}

/// Distinctness of a block's transactions, tested by hash.
pub fn is_distinct_tx_set(txids: &[Txid]) -> bool {
    let mut hashes = txids.to_vec();
    hashes.sort_unstable();
    hashes.windows(2).all(|pair| pair[0] != pair[1])
}
