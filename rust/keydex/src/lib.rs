//! # Keydex: Minimal Perfect Hash Indexing
//!
//! Keydex builds compact, immutable lookup indexes over large, possibly
//! disk-spilling key sets. Every key of the construction set is assigned a
//! distinct value in `[0, key_count)` (a minimal perfect hash), and the
//! construction is encoded into a small bit-packed artifact that supports
//! fast concurrent lookups.
//!
//! ## Module Organization
//!
//! This crate is a convenience entry point re-exporting the member crates:
//!
//! * [`common`] - error and result types shared across components
//! * [`io`] - temporary-file store abstraction backing disk spills
//! * [`etl`] - external sort engine (buffers, spill runs, k-way merge)
//! * [`recsplit`] - the perfect-hash builder, succinct encodings and the
//!   read-time index
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use keydex::io::temp_file_store::create_file_based;
//! use keydex::recsplit::{IndexReader, RecSplit, RecSplitParams};
//!
//! # fn main() -> keydex::common::Result<()> {
//! let store = create_file_based(None).map_err(keydex::common::error::Error::from)?;
//! let keys: Vec<String> = (0..1000).map(|i| format!("key-{i}")).collect();
//! let mut builder = RecSplit::new(RecSplitParams::new(keys.len() as u64, 100, store))?;
//! for key in &keys {
//!     builder.add_key(key.as_bytes())?;
//! }
//! let index = Arc::new(builder.build()?);
//! let reader = IndexReader::new(index);
//! let rank = reader.lookup(b"key-42")?;
//! assert!(rank < 1000);
//! # Ok(())
//! # }
//! ```

pub use keydex_common as common;
pub use keydex_etl as etl;
pub use keydex_io as io;
pub use keydex_recsplit as recsplit;
