/// Two impurity decreases closer than this are considered tied.
pub const TIE_TOLERANCE: f64 = 1e-10;
/// Node impurities at or below this value are treated as pure.
pub const ZERO_IMPURITY_TOLERANCE: f64 = 1e-12;

/// Nodes with at most this many rows are scanned once by a single worker.
pub const SINGLE_PASS_MAX_ROWS: usize = 4096;
/// Nodes with more candidate features than this use the two-phase histogram.
pub const SINGLE_PASS_MAX_FEATURES: usize = 64;
/// Smallest shard handed to a worker by the two-phase histogram.
pub const MIN_ROWS_PER_SHARD: usize = 2048;
/// Upper bound on the number of shards of a two-phase histogram.
pub const MAX_SHARDS: usize = 64;
/// Memory ceiling for the partial histograms of a single node.
pub const MAX_HISTOGRAM_BYTES: usize = 64 * 1024 * 1024;

/// Number of (split, leaf) node pairs held by one arena chunk.
pub const ARENA_CHUNK_PAIRS: usize = 512;

/// Deepest level representable with the implicit complete-binary-tree encoding.
pub const MAX_IMPLICIT_LEVEL: usize = 24;

/// Default memory budget for the scratch buffers of one block of trees.
pub const MAX_BLOCK_MEMORY_BYTES: usize = 256 * 1024 * 1024;

/// Default number of bins per feature.
pub const DEFAULT_MAX_BINS: usize = 256;
