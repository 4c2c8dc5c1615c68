//! Minimal perfect hash functions over arbitrarily large key sets.
//!
//! The construction pipeline: keys are hashed into buckets and externally
//! sorted (spilling to temporary storage via `keydex-etl`), each bucket is
//! resolved into a collision-free rank assignment by recursive splitting,
//! the split choices are Golomb-Rice coded, and a double Elias-Fano
//! directory indexes the per-bucket regions of the code stream. The result
//! is an immutable [`Index`] queried through per-thread [`IndexReader`]s.

mod bits;
pub mod elias_fano;
pub mod golomb_rice;
pub mod index;
pub mod index_reader;
pub mod recsplit;

pub use elias_fano::DoubleEliasFano;
pub use golomb_rice::{GolombRice, GolombRiceReader};
pub use index::Index;
pub use index_reader::IndexReader;
pub use recsplit::{DEFAULT_LEAF_SIZE, MAX_LEAF_SIZE, MIN_LEAF_SIZE, RecSplit, RecSplitParams};
