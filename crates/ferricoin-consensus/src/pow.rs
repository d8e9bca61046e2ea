//! Compact-target arithmetic and the difficulty schedule.

use crate::chain_params::ChainParams;
use crate::chain_view::ChainView;
use crate::Error;
use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use ferricoin_primitives::ChainStore;
use primitive_types::U256;

/// Decodes the compact 32-bit representation of a 256-bit target.
///
/// Returns `None` for encodings with the sign bit set or that overflow 256
/// bits; such bits can never describe a valid target.
pub(crate) fn decode_compact(bits: u32) -> Option<U256> {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;

    if bits & 0x0080_0000 != 0 {
        return None;
    }

    let value = if size <= 3 {
        word >>= 8 * (3 - size);
        U256::from(word)
    } else {
        U256::from(word) << (8 * (size - 3))
    };

    if word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32)) {
        return None;
    }

    Some(value)
}

/// Re-encodes a target in compact form, normalizing the mantissa so the
/// sign bit stays clear.
pub(crate) fn encode_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }

    let mut size = value.bits().div_ceil(8) as u32;
    let mut compact = if size <= 3 {
        value.low_u32() << (8 * (3 - size))
    } else {
        (value >> (8 * (size - 3))).low_u32()
    };

    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    (size << 24) | (compact & 0x007f_ffff)
}

fn max_target(params: &ChainParams) -> U256 {
    decode_compact(params.max_work_bits).expect("max_work_bits is a valid compact target")
}

/// Checks that `bits` decodes to a target within `(0, max_target]` and that
/// the block hash does not exceed it.
pub fn is_valid_proof_of_work(hash: &BlockHash, bits: u32, params: &ChainParams) -> bool {
    let Some(target) = decode_compact(bits) else {
        return false;
    };

    if target.is_zero() || target > max_target(params) {
        return false;
    }

    U256::from_little_endian(&hash.to_byte_array()) <= target
}

/// Compact bits the block at `height` is required to carry.
///
/// Off retarget boundaries this is the previous block's bits; on a boundary
/// the target is rescaled by the clamped duration of the last period. On
/// networks allowing minimum difficulty, a candidate arriving more than two
/// spacings after its parent may use `max_work_bits`, and difficulty is
/// otherwise inherited from the last ancestor that is not at minimum.
pub fn work_required<C: ChainStore>(
    view: &ChainView<'_, C>,
    height: u32,
    candidate_time: u32,
    params: &ChainParams,
) -> Result<u32, Error> {
    if height == 0 {
        return Ok(params.max_work_bits);
    }

    if height % params.retarget_interval != 0 {
        let previous = view.fetch_header(height - 1)?;

        if !params.allow_min_difficulty {
            return Ok(previous.bits.to_consensus());
        }

        if u64::from(candidate_time) > u64::from(previous.time) + 2 * params.target_spacing {
            return Ok(params.max_work_bits);
        }

        // Walk back to a retarget boundary or the most recent block that is
        // not at minimum difficulty.
        let mut walk_height = height - 1;
        let mut bits = previous.bits.to_consensus();
        while walk_height % params.retarget_interval != 0 && bits == params.max_work_bits {
            walk_height -= 1;
            bits = view.fetch_header(walk_height)?.bits.to_consensus();
        }
        return Ok(bits);
    }

    let last = view.fetch_header(height - 1)?;
    let first = view.fetch_header(height - params.retarget_interval)?;

    // Total time the last period actually took, constrained to a quarter
    // through four times the schedule.
    let actual = u64::from(last.time.saturating_sub(first.time)).clamp(
        params.target_timespan / 4,
        params.target_timespan * 4,
    );

    let previous_target =
        decode_compact(last.bits.to_consensus()).ok_or(Error::ProofOfWork)?;

    let (scaled, overflow) = previous_target.overflowing_mul(U256::from(actual));
    let mut target = if overflow {
        max_target(params)
    } else {
        scaled / U256::from(params.target_timespan)
    };

    if target > max_target(params) {
        target = max_target(params);
    }

    Ok(encode_compact(target))
}
