//! The immutable lookup artifact produced by [`RecSplit::build`]. Holds
//! the Golomb-Rice stream, the Elias-Fano bucket directory and the
//! parameters needed to replay the recursive split at read time.
//!
//! [`RecSplit::build`]: crate::recsplit::RecSplit::build

use bincode::{Decode, Encode};
use keydex_common::{Result, error::Error};

use crate::bits::{remap, remap16, remix};
use crate::elias_fano::DoubleEliasFano;
use crate::golomb_rice::GolombRiceReader;
use crate::recsplit::{START_SEED, split_params};

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Minimal perfect hash index: maps each key of the construction set onto
/// a distinct value in `[0, key_count)`. Shareable across threads; all
/// lookup state lives on the caller's stack.
#[derive(Debug, Encode, Decode)]
pub struct Index {
    key_count: u64,
    bucket_count: u64,
    salt: u32,
    leaf_size: u16,
    primary_aggr_bound: u16,
    secondary_aggr_bound: u16,
    golomb_rice: Vec<u32>,
    gr_data: Vec<u64>,
    ef: DoubleEliasFano,
}

impl Index {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        key_count: u64,
        bucket_count: u64,
        salt: u32,
        leaf_size: u16,
        primary_aggr_bound: u16,
        secondary_aggr_bound: u16,
        golomb_rice: Vec<u32>,
        gr_data: Vec<u64>,
        ef: DoubleEliasFano,
    ) -> Index {
        Index {
            key_count,
            bucket_count,
            salt,
            leaf_size,
            primary_aggr_bound,
            secondary_aggr_bound,
            golomb_rice,
            gr_data,
            ef,
        }
    }

    pub fn key_count(&self) -> u64 {
        self.key_count
    }

    pub fn bucket_count(&self) -> u64 {
        self.bucket_count
    }

    /// Hash seed the index was built with; readers must hash keys with the
    /// same seed.
    pub fn salt(&self) -> u32 {
        self.salt
    }

    fn rice_entry(&self, m: u16) -> Result<u32> {
        self.golomb_rice.get(m as usize).copied().ok_or_else(|| {
            Error::invalid_format(
                "index",
                format!("no golomb-rice table entry for group size {m}"),
            )
        })
    }

    fn golomb_param(&self, m: u16) -> Result<u32> {
        Ok(self.rice_entry(m)? >> 27)
    }

    /// Total fixed-code bits of an encoded subtree over `m` keys.
    fn skip_bits(&self, m: u16) -> Result<usize> {
        Ok((self.rice_entry(m)? & 0xFFFF) as usize)
    }

    /// Number of encoded nodes in a subtree over `m` keys.
    fn skip_nodes(&self, m: u16) -> Result<usize> {
        Ok(((self.rice_entry(m)? >> 16) & 0x7FF) as usize)
    }

    fn start_seed(level: usize) -> Result<u64> {
        START_SEED.get(level).copied().ok_or_else(|| {
            Error::invalid_format("index", format!("split level {level} out of range"))
        })
    }

    /// Resolves the perfect-hash value for a key presented as its
    /// `(bucket_hash, fingerprint)` 128-bit hash halves. Any decode
    /// inconsistency surfaces as a corrupt-index `InvalidFormat` error.
    pub fn lookup(&self, bucket_hash: u64, fingerprint: u64) -> Result<u64> {
        if self.key_count <= 1 {
            return Ok(0);
        }
        let bucket = remap(bucket_hash, self.bucket_count);
        let (mut cum_keys, cum_keys_next, bit_pos) = self.ef.get3(bucket)?;
        let m64 = cum_keys_next.checked_sub(cum_keys).ok_or_else(|| {
            Error::invalid_format("index", "bucket directory is not monotone")
        })?;
        let mut m = u16::try_from(m64).map_err(|_| {
            Error::invalid_format("index", format!("bucket size {m64} out of range"))
        })?;
        if m <= 1 {
            return Ok(cum_keys);
        }

        let mut gr = GolombRiceReader::new(&self.gr_data);
        gr.read_reset(bit_pos as usize, self.skip_bits(m)?)?;
        let mut level = 0usize;
        while m > self.leaf_size {
            let d = gr.read_next(self.golomb_param(m)?)?;
            let hmod = remap16(
                remix(fingerprint.wrapping_add(Self::start_seed(level)?).wrapping_add(d)),
                m,
            );
            let (fanout, unit) = split_params(
                m,
                self.leaf_size,
                self.primary_aggr_bound,
                self.secondary_aggr_bound,
            );
            let part = hmod / unit;
            if part > 0 {
                gr.skip_subtree(
                    self.skip_nodes(unit)? * part as usize,
                    self.skip_bits(unit)? * part as usize,
                )?;
            }
            m = if part == fanout - 1 {
                m - (fanout - 1) * unit
            } else {
                unit
            };
            cum_keys += unit as u64 * part as u64;
            level += 1;
            if m == 1 {
                return Ok(cum_keys);
            }
        }

        let d = gr.read_next(self.golomb_param(m)?)?;
        let hmod = remap16(
            remix(fingerprint.wrapping_add(Self::start_seed(level)?).wrapping_add(d)),
            m,
        );
        Ok(cum_keys + hmod as u64)
    }

    /// Serializes the index for external persistence.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::encode_to_vec(self, bincode_config())
            .map_err(|e| Error::invalid_format("index", e.to_string()))
    }

    /// Deserializes an index previously written by [`Index::to_bytes`].
    /// A truncated or damaged buffer yields a corrupt-index error.
    pub fn from_bytes(data: &[u8]) -> Result<Index> {
        let (index, _) = bincode::decode_from_slice::<Index, _>(data, bincode_config())
            .map_err(|e| Error::invalid_format("index", e.to_string()))?;
        Ok(index)
    }
}
