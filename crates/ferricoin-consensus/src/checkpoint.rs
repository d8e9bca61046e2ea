use bitcoin::BlockHash;

/// An externally supplied block hash pinned at a height.
///
/// Checkpoints are both denial-of-service protection and a sync fast-path:
/// a branch contradicting one can be rejected without further validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Height the hash is pinned at.
    pub height: u32,
    /// Required block hash at that height.
    pub hash: BlockHash,
}

impl Checkpoint {
    /// Constructs a new instance of [`Checkpoint`].
    pub fn new(height: u32, hash: BlockHash) -> Self {
        Self { height, hash }
    }
}

/// A block passes iff every checkpoint at its height carries its hash.
/// Heights without a checkpoint are unconstrained.
pub fn validate(hash: &BlockHash, height: u32, checkpoints: &[Checkpoint]) -> bool {
    checkpoints
        .iter()
        .filter(|checkpoint| checkpoint.height == height)
        .all(|checkpoint| checkpoint.hash == *hash)
}
