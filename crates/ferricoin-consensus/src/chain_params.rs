use bitcoin::Network;

/// Number of preceding blocks whose timestamps feed the median-time check.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Consensus parameters of a supported network.
///
/// Fields are public so tooling and tests can derive variants, e.g. with an
/// easier `max_work_bits`.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// The network these parameters describe.
    pub network: Network,
    /// Preceding block versions sampled for soft-fork voting.
    pub version_sample: usize,
    /// Votes required to enforce a minimum block version.
    pub version_enforced: usize,
    /// Votes required to activate a version-gated soft fork.
    pub version_activated: usize,
    /// First height at which pay-to-script-hash rules apply.
    pub bip16_activation_height: u32,
    /// Historical heights exempt from the duplicate-transaction rule.
    pub bip30_exception_heights: &'static [u32],
    /// Compact encoding of the largest allowed target.
    pub max_work_bits: u32,
    /// Seconds per retarget period.
    pub target_timespan: u64,
    /// Seconds aimed for between blocks.
    pub target_spacing: u64,
    /// Blocks per retarget period.
    pub retarget_interval: u32,
    /// Whether a stalled chain may fall back to the minimum difficulty.
    pub allow_min_difficulty: bool,
}

impl ChainParams {
    /// Constructs a new instance of [`ChainParams`].
    pub fn new(network: Network) -> Self {
        const TARGET_TIMESPAN: u64 = 2 * 7 * 24 * 60 * 60;
        const TARGET_SPACING: u64 = 10 * 60;

        match network {
            Network::Bitcoin => Self {
                network,
                version_sample: 1000,
                version_enforced: 950,
                version_activated: 750,
                // First block after the date-based activation vote.
                bip16_activation_height: 173_805,
                bip30_exception_heights: &[91_842, 91_880],
                max_work_bits: 0x1d00ffff,
                target_timespan: TARGET_TIMESPAN,
                target_spacing: TARGET_SPACING,
                retarget_interval: (TARGET_TIMESPAN / TARGET_SPACING) as u32,
                allow_min_difficulty: false,
            },
            Network::Testnet => Self {
                network,
                version_sample: 100,
                version_enforced: 75,
                version_activated: 51,
                bip16_activation_height: 514,
                bip30_exception_heights: &[],
                max_work_bits: 0x1d00ffff,
                target_timespan: TARGET_TIMESPAN,
                target_spacing: TARGET_SPACING,
                retarget_interval: (TARGET_TIMESPAN / TARGET_SPACING) as u32,
                allow_min_difficulty: true,
            },
            _ => unreachable!("unsupported network"),
        }
    }
}
