//! The collector drives the full collect/sort/spill/merge cycle: pairs are
//! accumulated into a buffer, sorted runs are spilled to temporary storage
//! when the buffer fills up, and `load` replays everything in globally
//! sorted order through a k-way merge.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use keydex_common::{Result, error::Error};
use keydex_io::temp_file_store::TemporaryFileStore;

use crate::buffer::{Buffer, Comparator, compare_keys};
use crate::provider::{DataProvider, flush_to_disk, keep_in_ram};

/// Options for [`Collector::load`].
#[derive(Default, Clone)]
pub struct LoadArgs {
    /// Cooperative cancellation flag, checked once per merged record.
    pub stop: Option<Arc<AtomicBool>>,
}

/// Receiver of merged key/value pairs.
pub trait LoadDestination {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Invoked instead of `put` when the merged value is empty.
    fn delete(&mut self, key: &[u8]) -> Result<()>;
}

/// Destination that discards everything. Useful when the load function
/// consumes the records itself and never forwards them.
pub struct NullDestination;

impl LoadDestination for NullDestination {
    fn put(&mut self, _key: &[u8], _value: &[u8]) -> Result<()> {
        Ok(())
    }

    fn delete(&mut self, _key: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Function applied to each merged record. It receives the key, the value
/// and an emitter that routes pairs to the destination; the default pass-
/// through behavior is `emit(key, value)`.
pub type LoadFn<'a> =
    dyn FnMut(&[u8], &[u8], &mut dyn FnMut(&[u8], &[u8]) -> Result<()>) -> Result<()> + 'a;

struct HeapElem {
    key: Vec<u8>,
    value: Vec<u8>,
    provider: usize,
    comparator: Option<Comparator>,
}

impl PartialEq for HeapElem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapElem {}

impl PartialOrd for HeapElem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapElem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so that BinaryHeap pops the smallest key first. Ties
        // break on provider registration order: older runs win.
        compare_keys(&self.comparator, &other.key, &self.key)
            .then_with(|| other.provider.cmp(&self.provider))
    }
}

/// Accumulates key/value pairs and replays them in sorted order, spilling
/// to a temporary file store when the in-memory buffer fills up.
pub struct Collector {
    log_prefix: String,
    temp_store: Arc<dyn TemporaryFileStore>,
    buffer: Option<Box<dyn Buffer>>,
    providers: Vec<Box<dyn DataProvider>>,
    comparator: Option<Comparator>,
    merge_dedup: bool,
    all_flushed: bool,
    auto_clean: bool,
    sync_spills: bool,
    loaded: bool,
}

impl Collector {
    /// Creates a collector with default durability: spill files are not
    /// fsynced and backing storage is released when `load` completes.
    pub fn new(
        log_prefix: impl Into<String>,
        temp_store: Arc<dyn TemporaryFileStore>,
        buffer: Box<dyn Buffer>,
    ) -> Collector {
        Self::with_options(log_prefix, temp_store, buffer, true, false)
    }

    /// Creates a collector whose spill files are fsynced after each flush
    /// and whose storage is kept after `load`, for callers that retry.
    pub fn new_critical(
        log_prefix: impl Into<String>,
        temp_store: Arc<dyn TemporaryFileStore>,
        buffer: Box<dyn Buffer>,
    ) -> Collector {
        Self::with_options(log_prefix, temp_store, buffer, false, true)
    }

    fn with_options(
        log_prefix: impl Into<String>,
        temp_store: Arc<dyn TemporaryFileStore>,
        buffer: Box<dyn Buffer>,
        auto_clean: bool,
        sync_spills: bool,
    ) -> Collector {
        let merge_dedup = buffer.requires_merge_dedup();
        Collector {
            log_prefix: log_prefix.into(),
            temp_store,
            buffer: Some(buffer),
            providers: Vec::new(),
            comparator: None,
            merge_dedup,
            all_flushed: false,
            auto_clean,
            sync_spills,
            loaded: false,
        }
    }

    /// Installs a custom key ordering. Must be called before any `collect`.
    pub fn set_comparator(&mut self, cmp: Option<Comparator>) {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.set_comparator(cmp.clone());
        }
        self.comparator = cmp;
    }

    /// Adds a pair to the collector, spilling the current buffer to the
    /// temporary store if it is full.
    pub fn collect(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.loaded {
            return Err(Error::invalid_operation("collect after load"));
        }
        let buffer = self
            .buffer
            .as_mut()
            .ok_or_else(|| Error::invalid_operation("collect on closed collector"))?;
        buffer.put(key, value)?;
        if buffer.is_full() {
            self.flush_buffer(false)?;
        }
        Ok(())
    }

    /// Sorts and seals the current buffer as a run. When
    /// `can_store_in_ram` is set and nothing was spilled yet, the run stays
    /// in memory without serialization.
    fn flush_buffer(&mut self, can_store_in_ram: bool) -> Result<()> {
        match self.buffer.as_mut() {
            None => return Ok(()),
            Some(buffer) if buffer.is_empty() => return Ok(()),
            Some(buffer) => buffer.sort(),
        }
        if can_store_in_ram
            && self.providers.is_empty()
            && let Some(buffer) = self.buffer.take()
        {
            self.providers.push(keep_in_ram(buffer));
            self.all_flushed = true;
            return Ok(());
        }
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(());
        };
        let provider = flush_to_disk(
            buffer.as_mut(),
            self.temp_store.as_ref(),
            self.sync_spills,
            &self.log_prefix,
        )?;
        self.providers.push(provider);
        Ok(())
    }

    /// Merges all runs and feeds every record through `load_fn` in globally
    /// sorted key order. Consumes the collected data: a collector can be
    /// loaded only once.
    pub fn load(
        &mut self,
        dest: &mut dyn LoadDestination,
        load_fn: &mut LoadFn,
        args: &LoadArgs,
    ) -> Result<()> {
        if self.loaded {
            return Err(Error::invalid_operation("load called twice"));
        }
        self.loaded = true;
        let result = self.load_inner(dest, load_fn, args);
        match &result {
            Err(e) if e.is_aborted() => {
                // Keep spill files around so the caller can inspect them.
            }
            _ => {
                if self.auto_clean {
                    self.close();
                }
            }
        }
        result
    }

    fn load_inner(
        &mut self,
        dest: &mut dyn LoadDestination,
        load_fn: &mut LoadFn,
        args: &LoadArgs,
    ) -> Result<()> {
        if !self.all_flushed {
            self.flush_buffer(true)?;
        }

        let mut heap = BinaryHeap::with_capacity(self.providers.len());
        for (i, provider) in self.providers.iter_mut().enumerate() {
            match provider.next()? {
                Some((key, value)) => heap.push(HeapElem {
                    key,
                    value,
                    provider: i,
                    comparator: self.comparator.clone(),
                }),
                None => {
                    return Err(Error::invalid_format(
                        "spill run",
                        format!("registered run {i} produced no records at merge start"),
                    ));
                }
            }
        }

        let mut emit = |key: &[u8], value: &[u8]| -> Result<()> {
            if value.is_empty() {
                dest.delete(key)
            } else {
                dest.put(key, value)
            }
        };

        let mut prev_key: Option<Vec<u8>> = None;
        while let Some(elem) = heap.pop() {
            if let Some(stop) = &args.stop
                && stop.load(AtomicOrdering::Relaxed)
            {
                return Err(Error::aborted(self.log_prefix.clone()));
            }
            let skip = self.merge_dedup
                && prev_key
                    .as_deref()
                    .is_some_and(|prev| compare_keys(&self.comparator, prev, &elem.key).is_eq());
            if !skip {
                log::trace!(
                    "[{}] merged record: {} key bytes from run {}",
                    self.log_prefix,
                    elem.key.len(),
                    elem.provider
                );
                load_fn(&elem.key, &elem.value, &mut emit)?;
            }
            let HeapElem {
                key,
                provider,
                comparator,
                ..
            } = elem;
            prev_key = Some(key);
            if let Some((key, value)) = self.providers[provider].next()? {
                heap.push(HeapElem {
                    key,
                    value,
                    provider,
                    comparator,
                });
            }
        }
        Ok(())
    }

    /// Disposes all runs, releasing their backing storage.
    pub fn close(&mut self) {
        let mut freed = 0u64;
        for provider in &mut self.providers {
            freed += provider.dispose();
        }
        self.providers.clear();
        self.buffer = None;
        if freed > 0 {
            log::debug!("[{}] released {freed} bytes of spill storage", self.log_prefix);
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        if self.auto_clean {
            self.close();
        }
    }
}
