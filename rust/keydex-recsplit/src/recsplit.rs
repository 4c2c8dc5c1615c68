//! Minimal perfect hash construction via recursive splitting, after
//! Esposito, Graf and Vigna, "RecSplit: Minimal Perfect Hashing via
//! Recursive Splitting" (https://arxiv.org/abs/1910.06416).
//!
//! Keys are first hashed into buckets and externally sorted by bucket id
//! through a [`Collector`], so the key set may exceed available memory.
//! Each bucket is then split recursively: trial salts are searched until a
//! salt partitions the bucket into fixed-size parts (or, at the leaves,
//! into a bijection onto `[0, m)`), and the winning salt deltas are
//! Golomb-Rice coded. Cumulative bucket sizes and bit offsets feed the
//! double Elias-Fano directory of the final [`Index`].

use std::sync::Arc;

use keydex_common::{Result, error::Error, verify_arg, verify_data};
use keydex_etl::{BUFFER_OPTIMAL_SIZE, Collector, LoadArgs, NullDestination, SortableBuffer};
use keydex_io::temp_file_store::TemporaryFileStore;
use xxhash_rust::xxh3::xxh3_128_with_seed;

use crate::bits::{remap, remap16, remix};
use crate::golomb_rice::GolombRice;
use crate::index::Index;

const LOG_PREFIX: &str = "recsplit";

/// Largest supported leaf size; bounded by the precomputed bijection table.
pub const MAX_LEAF_SIZE: u16 = 24;

/// Smallest supported leaf size. The packed Golomb-Rice table counts
/// size-1 parts as zero nodes and its node-count field is 11 bits wide;
/// both assumptions hold only when leaves span at least 3 keys.
pub const MIN_LEAF_SIZE: u16 = 3;

pub const DEFAULT_LEAF_SIZE: u16 = 8;

/// Optimal Golomb-Rice parameters for leaf bijections, indexed by leaf size.
pub(crate) const BIJ_MEMO: [u32; 25] = [
    0, 0, 0, 1, 3, 4, 5, 7, 8, 10, 11, 12, 14, 15, 16, 18, 19, 21, 22, 23, 25, 26, 28, 29, 30,
];

/// Per-level starting salts for the trial-seed search. The decoder replays
/// the same schedule, so these values are part of the index format.
pub(crate) const START_SEED: [u64; 20] = [
    0x106393c187cae21a,
    0x6453cec3f7376937,
    0x643e521ddbd2be98,
    0x3740c6412f6572cb,
    0x717d47562f1ce470,
    0x4cd6eb4c63befb7c,
    0x9bfd8c5e18c8da73,
    0x082f20e10092a9a3,
    0x2ada2ce68d21defc,
    0xe33cb4f3e7c6466b,
    0x3980be458c509c59,
    0xc466fd9584828e8c,
    0x45f0aabe1a61ede6,
    0xf6e7b8b33ad9b98d,
    0x4ef95e25f4b4983d,
    0x81175195173b92d3,
    0x4e50927d8dd15978,
    0x1ea2099d1fafae7f,
    0x425c8a06fbaaa815,
    0xcd4216006c74052a,
];

/// Fanout and part size used to split a group of `m` keys at one level.
pub(crate) fn split_params(m: u16, leaf_size: u16, primary: u16, secondary: u16) -> (u16, u16) {
    if m > secondary {
        // Half of m, rounded up to a multiple of the secondary bound, so
        // that the second part never exceeds the first.
        let unit = ((m as u32 + 1) / 2).div_ceil(secondary as u32) * secondary as u32;
        (2, unit as u16)
    } else if m > primary {
        (m.div_ceil(primary), primary)
    } else {
        (m.div_ceil(leaf_size), leaf_size)
    }
}

pub(crate) fn primary_aggr_bound(leaf_size: u16) -> u16 {
    leaf_size * 2u16.max((0.35 * leaf_size as f64 + 0.5).ceil() as u16)
}

pub(crate) fn secondary_aggr_bound(leaf_size: u16, primary: u16) -> u16 {
    if leaf_size < 7 {
        primary * 2
    } else {
        primary * (0.21 * leaf_size as f64 + 0.9).ceil() as u16
    }
}

/// Fills `table[m]` with the packed Golomb-Rice metadata for a subtree of
/// `m` keys: bits 27..32 hold the Golomb parameter, bits 16..27 the subtree
/// node count, bits 0..16 the total fixed-code bits of the subtree.
fn compute_golomb_rice(
    m: u16,
    table: &mut [u32],
    leaf_size: u16,
    primary: u16,
    secondary: u16,
) -> Result<()> {
    let (fanout, unit) = split_params(m, leaf_size, primary, secondary);
    let mut k = vec![unit; fanout as usize];
    k[fanout as usize - 1] = m - (fanout - 1) * unit;

    let mut sqrt_prod = 1.0f64;
    for &ki in &k {
        sqrt_prod *= (ki as f64).sqrt();
    }
    let p = (m as f64).sqrt()
        / ((2.0 * std::f64::consts::PI).powf((fanout as f64 - 1.0) / 2.0) * sqrt_prod);
    let golden = (5.0f64.sqrt() + 1.0) / 2.0;
    let golomb_param = ((-golden.ln() / (-p).ln_1p()).log2()).ceil() as u32;
    verify_data!(golomb_param, golomb_param <= 0x1F);

    let mut fixed_bits = golomb_param;
    for &ki in &k {
        fixed_bits += table[ki as usize] & 0xFFFF;
    }
    verify_data!(fixed_bits, fixed_bits <= 0xFFFF);

    let mut nodes = 1u32;
    for &ki in &k {
        nodes += (table[ki as usize] >> 16) & 0x7FF;
    }
    verify_data!(nodes, nodes <= 0x7FF);

    table[m as usize] = (golomb_param << 27) | (nodes << 16) | fixed_bits;
    Ok(())
}

/// Construction parameters for [`RecSplit`].
#[derive(Clone)]
pub struct RecSplitParams {
    /// Exact number of keys that will be added before `build`.
    pub key_count: u64,
    /// Target keys per bucket; typical values are 100-2000. Larger buckets
    /// shrink the encoding at the cost of slower lookups.
    pub bucket_size: u16,
    /// Keys per leaf bijection, in `[MIN_LEAF_SIZE, MAX_LEAF_SIZE]`.
    pub leaf_size: u16,
    /// Seed of the bucket/fingerprint hash; stored in the built index.
    pub salt: u32,
    /// Flush threshold of the collector buffer.
    pub buffer_size: usize,
    pub temp_store: Arc<dyn TemporaryFileStore>,
}

impl RecSplitParams {
    pub fn new(
        key_count: u64,
        bucket_size: u16,
        temp_store: Arc<dyn TemporaryFileStore>,
    ) -> RecSplitParams {
        RecSplitParams {
            key_count,
            bucket_size,
            leaf_size: DEFAULT_LEAF_SIZE,
            salt: 0,
            buffer_size: BUFFER_OPTIMAL_SIZE,
            temp_store,
        }
    }
}

/// Builder of the minimal perfect hash function. Feed every key exactly
/// once through [`RecSplit::add_key`], then call [`RecSplit::build`].
pub struct RecSplit {
    key_expected_count: u64,
    keys_added: u64,
    bucket_count: u64,
    bucket_size: u16,
    leaf_size: u16,
    primary_aggr_bound: u16,
    secondary_aggr_bound: u16,
    salt: u32,
    buffer_size: usize,
    temp_store: Arc<dyn TemporaryFileStore>,
    collector: Option<Collector>,
    built: bool,
    golomb_rice: Vec<u32>,
    gr: GolombRice,
    current_bucket_idx: u64,
    current_fingerprints: Vec<u64>,
    last_key: Vec<u8>,
    bucket_size_acc: Vec<u64>,
    bucket_pos_acc: Vec<u64>,
    scratch: Vec<u64>,
    count: Vec<u16>,
}

impl std::fmt::Debug for RecSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecSplit")
            .field("key_expected_count", &self.key_expected_count)
            .field("keys_added", &self.keys_added)
            .field("bucket_count", &self.bucket_count)
            .field("bucket_size", &self.bucket_size)
            .field("leaf_size", &self.leaf_size)
            .field("salt", &self.salt)
            .field("built", &self.built)
            .finish_non_exhaustive()
    }
}

impl RecSplit {
    pub fn new(params: RecSplitParams) -> Result<RecSplit> {
        verify_arg!(bucket_size, params.bucket_size > 0);
        verify_arg!(
            leaf_size,
            params.leaf_size >= MIN_LEAF_SIZE && params.leaf_size <= MAX_LEAF_SIZE
        );
        let bucket_count = params.key_count.div_ceil(params.bucket_size as u64);
        let primary = primary_aggr_bound(params.leaf_size);
        let secondary = secondary_aggr_bound(params.leaf_size, primary);
        let collector = Self::make_collector(&params.temp_store, params.buffer_size);
        Ok(RecSplit {
            key_expected_count: params.key_count,
            keys_added: 0,
            bucket_count,
            bucket_size: params.bucket_size,
            leaf_size: params.leaf_size,
            primary_aggr_bound: primary,
            secondary_aggr_bound: secondary,
            salt: params.salt,
            buffer_size: params.buffer_size,
            temp_store: params.temp_store,
            collector: Some(collector),
            built: false,
            golomb_rice: Vec::new(),
            gr: GolombRice::default(),
            current_bucket_idx: u64::MAX,
            current_fingerprints: Vec::with_capacity(params.bucket_size as usize),
            last_key: Vec::new(),
            bucket_size_acc: vec![0],
            bucket_pos_acc: vec![0],
            scratch: Vec::new(),
            count: Vec::new(),
        })
    }

    fn make_collector(temp_store: &Arc<dyn TemporaryFileStore>, buffer_size: usize) -> Collector {
        Collector::new(
            LOG_PREFIX,
            temp_store.clone(),
            Box::new(SortableBuffer::new(buffer_size)),
        )
    }

    pub fn salt(&self) -> u32 {
        self.salt
    }

    /// Adds a key. The key bytes are copied; there can be many more keys
    /// than fit in RAM, the collector spills to the temporary store.
    pub fn add_key(&mut self, key: &[u8]) -> Result<()> {
        if self.built {
            return Err(Error::invalid_operation("add_key after build"));
        }
        let collector = self
            .collector
            .as_mut()
            .ok_or_else(|| Error::invalid_operation("add_key after failed build"))?;
        let hash = xxh3_128_with_seed(key, self.salt as u64);
        let bucket = remap((hash >> 64) as u64, self.bucket_count);
        let fingerprint = hash as u64;
        let mut sort_key = [0u8; 16];
        sort_key[..8].copy_from_slice(&bucket.to_be_bytes());
        sort_key[8..].copy_from_slice(&fingerprint.to_be_bytes());
        self.keys_added += 1;
        collector.collect(&sort_key, key)
    }

    /// Rearms the builder with the next salt after a
    /// [`hash collision`](Error::is_hash_collision) failure. All keys must
    /// be added again before retrying `build`.
    pub fn reset_next_salt(&mut self) {
        self.built = false;
        self.keys_added = 0;
        self.salt = self.salt.wrapping_add(1);
        self.current_bucket_idx = u64::MAX;
        self.current_fingerprints.clear();
        self.last_key.clear();
        self.gr = GolombRice::default();
        self.golomb_rice.clear();
        self.bucket_size_acc.clear();
        self.bucket_size_acc.push(0);
        self.bucket_pos_acc.clear();
        self.bucket_pos_acc.push(0);
        self.collector = Some(Self::make_collector(&self.temp_store, self.buffer_size));
    }

    /// Runs the external sort and the recursive splitting over every
    /// bucket, producing the immutable [`Index`]. Consumes the collected
    /// keys; on a `HashCollision` error the caller may `reset_next_salt`
    /// and re-add the keys.
    pub fn build(&mut self) -> Result<Index> {
        if self.built {
            return Err(Error::invalid_operation("build on an already built recsplit"));
        }
        if self.keys_added != self.key_expected_count {
            return Err(Error::invalid_arg(
                "key_count",
                format!(
                    "expected {} keys, got {}",
                    self.key_expected_count, self.keys_added
                ),
            ));
        }
        let mut collector = self
            .collector
            .take()
            .ok_or_else(|| Error::invalid_operation("build after failed build"))?;
        self.current_bucket_idx = u64::MAX;
        collector.load(
            &mut NullDestination,
            &mut |k, v, _emit| self.handle_record(k, v),
            &LoadArgs::default(),
        )?;
        if self.current_bucket_idx != u64::MAX {
            self.finish_bucket()?;
        }
        // Trailing buckets that received no keys.
        let target = self.bucket_count as usize + 1;
        while self.bucket_size_acc.len() < target {
            self.bucket_size_acc
                .push(self.bucket_size_acc.last().copied().unwrap_or(0));
        }
        while self.bucket_pos_acc.len() < target {
            self.bucket_pos_acc
                .push(self.bucket_pos_acc.last().copied().unwrap_or(0));
        }
        let ef = crate::elias_fano::DoubleEliasFano::build(&self.bucket_size_acc, &self.bucket_pos_acc)?;
        self.built = true;
        log::debug!(
            "[{LOG_PREFIX}] built index: {} keys, {} buckets, {} encoded bits",
            self.key_expected_count,
            self.bucket_count,
            self.gr.bits()
        );
        Ok(Index::from_parts(
            self.key_expected_count,
            self.bucket_count,
            self.salt,
            self.leaf_size,
            self.primary_aggr_bound,
            self.secondary_aggr_bound,
            std::mem::take(&mut self.golomb_rice),
            std::mem::take(&mut self.gr).into_data(),
            ef,
        ))
    }

    /// Merge callback: records arrive sorted by `(bucket id, fingerprint)`.
    fn handle_record(&mut self, k: &[u8], v: &[u8]) -> Result<()> {
        verify_data!(sort_record, k.len() == 16);
        let bucket_idx = u64::from_be_bytes(
            k[..8]
                .try_into()
                .map_err(|_| Error::invalid_format("sort record", "short bucket id"))?,
        );
        let fingerprint = u64::from_be_bytes(
            k[8..]
                .try_into()
                .map_err(|_| Error::invalid_format("sort record", "short fingerprint"))?,
        );
        if self.current_bucket_idx != bucket_idx {
            if self.current_bucket_idx != u64::MAX {
                self.finish_bucket()?;
            }
            self.current_bucket_idx = bucket_idx;
        }
        // Equal fingerprints are adjacent in the sort order.
        if self.current_fingerprints.last() == Some(&fingerprint) {
            if self.last_key == v {
                return Err(Error::invalid_arg(
                    "key",
                    format!("duplicate key {}", hex(v)),
                ));
            }
            return Err(Error::hash_collision(bucket_idx));
        }
        self.current_fingerprints.push(fingerprint);
        self.last_key.clear();
        self.last_key.extend_from_slice(v);
        Ok(())
    }

    /// Runs the splitting for the accumulated bucket and records its size
    /// and bit position in the accumulators.
    fn finish_bucket(&mut self) -> Result<()> {
        let idx = self.current_bucket_idx as usize;
        verify_data!(bucket_index, self.current_bucket_idx < self.bucket_count);
        while self.bucket_size_acc.len() <= idx + 1 {
            self.bucket_size_acc
                .push(self.bucket_size_acc.last().copied().unwrap_or(0));
        }
        self.bucket_size_acc[idx + 1] += self.current_fingerprints.len() as u64;
        if self.current_fingerprints.len() > 1 {
            verify_data!(bucket_size, self.current_fingerprints.len() <= u16::MAX as usize);
            let mut fingerprints = std::mem::take(&mut self.current_fingerprints);
            let mut unary = Vec::new();
            self.recsplit(0, &mut fingerprints, &mut unary)?;
            self.gr.append_unary_all(&unary);
            fingerprints.clear();
            self.current_fingerprints = fingerprints;
        } else {
            self.current_fingerprints.clear();
        }
        self.last_key.clear();
        while self.bucket_pos_acc.len() <= idx + 1 {
            self.bucket_pos_acc
                .push(self.bucket_pos_acc.last().copied().unwrap_or(0));
        }
        self.bucket_pos_acc[idx + 1] = self.gr.bits() as u64;
        Ok(())
    }

    /// Looks up (building lazily) the Golomb parameter for groups of `m`
    /// keys; the same table feeds the decoder's subtree skips.
    fn golomb_param(&mut self, m: u16) -> Result<u32> {
        while self.golomb_rice.len() <= m as usize {
            let s = self.golomb_rice.len();
            if s == 0 {
                self.golomb_rice.push(0);
            } else if s <= self.leaf_size as usize {
                let b = BIJ_MEMO[s];
                self.golomb_rice
                    .push((b << 27) | (((s > 1) as u32) << 16) | b);
            } else {
                self.golomb_rice.push(0);
                compute_golomb_rice(
                    s as u16,
                    &mut self.golomb_rice,
                    self.leaf_size,
                    self.primary_aggr_bound,
                    self.secondary_aggr_bound,
                )?;
            }
        }
        Ok(self.golomb_rice[m as usize] >> 27)
    }

    /// The recursive split: for leaves, searches a salt whose remapped
    /// fingerprints form a bijection onto `[0, m)`; for larger groups,
    /// searches a salt that partitions the group into parts of exactly
    /// `unit` keys (except the last) and recurses. Fixed code bits are
    /// appended immediately (pre-order); unary quotients are collected
    /// into `unary` and appended after the whole bucket.
    fn recsplit(&mut self, level: usize, bucket: &mut [u64], unary: &mut Vec<u64>) -> Result<()> {
        verify_data!(split_depth, level < START_SEED.len());
        let start_seed = START_SEED[level];
        let m = bucket.len() as u16;
        if m <= self.leaf_size {
            let mut salt = start_seed;
            loop {
                let mut mask = 0u32;
                let mut ok = true;
                for &fp in bucket.iter() {
                    let bit = 1u32 << remap16(remix(fp.wrapping_add(salt)), m);
                    if mask & bit != 0 {
                        ok = false;
                        break;
                    }
                    mask |= bit;
                }
                if ok {
                    break;
                }
                salt = salt.wrapping_add(1);
            }
            let d = salt.wrapping_sub(start_seed);
            let log2 = self.golomb_param(m)?;
            self.gr.append_fixed(d, log2);
            unary.push(d >> log2);
        } else {
            let (fanout, unit) = split_params(
                m,
                self.leaf_size,
                self.primary_aggr_bound,
                self.secondary_aggr_bound,
            );
            let fanout_us = fanout as usize;
            if self.count.len() < fanout_us {
                self.count.resize(fanout_us, 0);
            }
            let mut salt = start_seed;
            loop {
                self.count[..fanout_us].fill(0);
                for &fp in bucket.iter() {
                    let part = (remap16(remix(fp.wrapping_add(salt)), m) / unit) as usize;
                    self.count[part] += 1;
                }
                if self.count[..fanout_us - 1].iter().all(|&c| c == unit) {
                    break;
                }
                salt = salt.wrapping_add(1);
            }
            // Stable repartition: part i occupies [i*unit, (i+1)*unit).
            for (i, c) in self.count[..fanout_us].iter_mut().enumerate() {
                *c = i as u16 * unit;
            }
            self.scratch.clear();
            self.scratch.resize(bucket.len(), 0);
            for &fp in bucket.iter() {
                let part = (remap16(remix(fp.wrapping_add(salt)), m) / unit) as usize;
                self.scratch[self.count[part] as usize] = fp;
                self.count[part] += 1;
            }
            bucket.copy_from_slice(&self.scratch);

            let d = salt.wrapping_sub(start_seed);
            let log2 = self.golomb_param(m)?;
            self.gr.append_fixed(d, log2);
            unary.push(d >> log2);

            let unit_us = unit as usize;
            let mut i = 0usize;
            while i + unit_us < bucket.len() {
                self.recsplit(level + 1, &mut bucket[i..i + unit_us], unary)?;
                i += unit_us;
            }
            if bucket.len() - i > 1 {
                self.recsplit(level + 1, &mut bucket[i..], unary)?;
            }
        }
        Ok(())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
