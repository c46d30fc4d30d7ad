use std::collections::HashMap;

use crate::engine::{RawStatement, ffi};
use crate::error::Result;
use crate::sync::Mutex;

/// A prepared statement checked out of (or headed back into) a [`StatementCache`].
pub(crate) struct CachedStatement {
    pub(crate) raw: RawStatement,
    /// Set when a step failed; the statement is finalized instead of reset.
    pub(crate) dirty: bool,
}

impl CachedStatement {
    pub(crate) fn new(raw: RawStatement) -> Self {
        Self { raw, dirty: false }
    }
}

/// Statements kept per connection unless configured otherwise.
pub const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 16;

struct Parked {
    raw: RawStatement,
    last_used: u64,
}

struct Entries {
    capacity: usize,
    clock: u64,
    slots: HashMap<String, Parked>,
}

impl Entries {
    /// Drop the least recently returned statements until at most `capacity` remain.
    fn evict_over_capacity(&mut self) -> Vec<RawStatement> {
        let mut evicted = Vec::new();
        while self.slots.len() > self.capacity {
            let Some(oldest) = self
                .slots
                .iter()
                .min_by_key(|(_, parked)| parked.last_used)
                .map(|(sql, _)| sql.clone())
            else {
                break;
            };
            if let Some(parked) = self.slots.remove(&oldest) {
                tracing::trace!(sql = %oldest, "evicting least recently used statement");
                evicted.push(parked.raw);
            }
        }
        evicted
    }
}

/// SQL text → one reusable prepared statement, owned by a single connection.
///
/// A statement is *moved out* of the map while a caller executes it, so no two in-flight
/// calls ever share one. On the way back it is reset and reinserted only if the slot is still
/// empty; a concurrent caller that prepared its own copy in the meantime gets its copy
/// finalized instead. At most `capacity` statements are parked; the least recently returned
/// one is finalized to make room.
pub(crate) struct StatementCache {
    enabled: bool,
    entries: Mutex<Entries>,
}

impl StatementCache {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Mutex::new(Entries {
                capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
                clock: 0,
                slots: HashMap::new(),
            }),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            if let Err(err) = self.clear() {
                tracing::warn!(error = %err, "failed to clear statement cache");
            }
        }
    }

    pub(crate) fn capacity(&self) -> Result<usize> {
        self.entries.protect(|entries| entries.capacity)
    }

    /// Change the capacity, finalizing the least recently used statements that no longer fit.
    pub(crate) fn set_capacity(&self, capacity: usize) -> Result<()> {
        let evicted = self.entries.protect(|entries| {
            entries.capacity = capacity;
            entries.evict_over_capacity()
        })?;
        drop(evicted);
        Ok(())
    }

    /// Remove and return the cached statement for `sql`, if any.
    pub(crate) fn take(&self, sql: &str) -> Result<Option<CachedStatement>> {
        if !self.enabled {
            return Ok(None);
        }
        let hit = self.entries.protect(|entries| entries.slots.remove(sql))?;
        tracing::trace!(sql, hit = hit.is_some(), "statement cache lookup");
        Ok(hit.map(|parked| CachedStatement::new(parked.raw)))
    }

    /// Reset `stmt` and put it back, or finalize it when that is not possible.
    ///
    /// Must be called by the thread that is driving the owning connection.
    pub(crate) fn give_back(&self, sql: &str, mut stmt: CachedStatement) -> Result<()> {
        if !self.enabled || stmt.dirty {
            return Ok(());
        }
        if stmt.raw.reset() != ffi::SQLITE_OK {
            tracing::trace!(sql, "statement did not reset cleanly; finalizing");
            return Ok(());
        }
        stmt.raw.clear_bindings();

        let rejected = self.entries.protect(|entries| {
            if entries.slots.contains_key(sql) {
                tracing::trace!(sql, "statement already cached; finalizing duplicate");
                return vec![stmt.raw];
            }
            entries.clock += 1;
            let last_used = entries.clock;
            entries.slots.insert(
                sql.to_owned(),
                Parked {
                    raw: stmt.raw,
                    last_used,
                },
            );
            entries.evict_over_capacity()
        })?;
        // `rejected` drops (finalizes) here, outside the cache lock.
        drop(rejected);
        Ok(())
    }

    pub(crate) fn len(&self) -> Result<usize> {
        self.entries.protect(|entries| entries.slots.len())
    }

    pub(crate) fn contains(&self, sql: &str) -> Result<bool> {
        self.entries.protect(|entries| entries.slots.contains_key(sql))
    }

    /// Finalize every cached statement.
    pub(crate) fn clear(&self) -> Result<()> {
        let drained = self.entries.protect(|entries| std::mem::take(&mut entries.slots))?;
        drop(drained);
        Ok(())
    }
}
