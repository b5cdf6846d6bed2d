//! Registry of opened shard handles.

use std::sync::{Arc, Mutex};

use ahash::AHashMap;

use crate::read::{CompressedRandomAccessReader, OffsetIndex};

/// Opened read handles of one shard: its offsets table and its record reader.
///
/// Both are read-only after construction and shared by all concurrent readers
/// of the shard.
#[derive(Debug)]
pub struct ShardHandle {
    pub shard_id: u64,
    pub offsets: OffsetIndex,
    pub reader: CompressedRandomAccessReader,
}

/// Bounded cache of opened [`ShardHandle`]s keyed by shard id, evicting the least
/// recently used handle when full.
///
/// **Note**: this is not a data cache. Evicting a handle only drops the cache's
/// reference; readers still holding it keep it open until they are done.
pub struct ShardHandleCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    entries: AHashMap<u64, CacheEntry>,
    tick: u64,
}

struct CacheEntry {
    handle: Arc<ShardHandle>,
    last_used: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

impl ShardHandleCache {
    pub fn new(capacity: usize) -> ShardHandleCache {
        ShardHandleCache {
            capacity: capacity.max(1),
            state: Default::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("handle cache lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached handle of the shard, marking it as recently used.
    pub fn get(&self, shard_id: u64) -> Option<Arc<ShardHandle>> {
        let mut state = self.state.lock().expect("handle cache lock");
        let tick = state.next_tick();
        let entry = state.entries.get_mut(&shard_id)?;
        entry.last_used = tick;
        log::trace!("shard handle cache hit: {shard_id}");
        Some(entry.handle.clone())
    }

    /// Caches a newly opened handle and returns the handle to use.
    ///
    /// If another caller cached a handle for the same shard in the meantime, that
    /// handle is kept and returned instead.
    pub fn insert(&self, handle: ShardHandle) -> Arc<ShardHandle> {
        let mut state = self.state.lock().expect("handle cache lock");
        let tick = state.next_tick();
        if let Some(entry) = state.entries.get_mut(&handle.shard_id) {
            entry.last_used = tick;
            return entry.handle.clone();
        }

        if state.entries.len() >= self.capacity {
            let victim = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(&shard_id, _)| shard_id);
            if let Some(victim) = victim {
                state.entries.remove(&victim);
                log::debug!("evicted shard handle {victim}");
            }
        }

        let handle = Arc::new(handle);
        state.entries.insert(
            handle.shard_id,
            CacheEntry {
                handle: handle.clone(),
                last_used: tick,
            },
        );
        handle
    }

    /// Releases all cached handles.
    pub fn clear(&self) {
        self.state.lock().expect("handle cache lock").entries.clear();
    }
}
