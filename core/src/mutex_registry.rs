/*
 *   Copyright (c) 2022 R3BL LLC
 *   All rights reserved.
 *
 *   Licensed under the Apache License, Version 2.0 (the "License");
 *   you may not use this file except in compliance with the License.
 *   You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 *   Unless required by applicable law or agreed to in writing, software
 *   distributed under the License is distributed on an "AS IS" BASIS,
 *   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *   See the License for the specific language governing permissions and
 *   limitations under the License.
 */

//! Named mutex registry (4.7). Wraps a raw native mutex rather than
//! `std::sync::Mutex`'s RAII guard: `lock`/`unlock` are separate calls
//! because the release-before-block pattern requires dropping the
//! registry's own lock in between, which an RAII guard borrowed from the
//! registry couldn't outlive.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::HtableError;
use crate::htable::Htable;
use crate::thread_registry;

/// A raw POSIX mutex, locked/unlocked explicitly rather than through a
/// borrowed guard.
struct RawMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

impl RawMutex {
    fn new() -> Self {
        let mut inner: libc::pthread_mutex_t = unsafe { std::mem::zeroed() };
        unsafe {
            libc::pthread_mutex_init(&mut inner, std::ptr::null());
        }
        Self {
            inner: UnsafeCell::new(inner),
        }
    }

    fn try_lock(&self) -> bool {
        unsafe { libc::pthread_mutex_trylock(self.inner.get()) == 0 }
    }

    fn lock(&self) {
        unsafe {
            libc::pthread_mutex_lock(self.inner.get());
        }
    }

    fn unlock(&self) {
        unsafe {
            libc::pthread_mutex_unlock(self.inner.get());
        }
    }
}

impl Drop for RawMutex {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_destroy(self.inner.get());
        }
    }
}

pub const NO_OWNER: u64 = 0;

pub struct MutexRecord {
    pub id: u64,
    pub name: String,
    native: RawMutex,
    owner: AtomicU64,
}

impl MutexRecord {
    pub fn owner(&self) -> u64 {
        self.owner.load(Ordering::Acquire)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MutexError {
    #[error("no such mutex")]
    NotFound,
}

pub struct MutexRegistry {
    table: RwLock<Htable<Arc<MutexRecord>>>,
    next_id: AtomicU64,
}

impl Default for MutexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MutexRegistry {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Htable::new(32)),
            next_id: AtomicU64::new(1), // 0 is reserved for "none"
        }
    }

    /// Allocates a record, assigns the next monotonic id, initializes the
    /// native mutex, inserts it, and returns the id.
    pub fn create(&self, name: impl Into<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = Arc::new(MutexRecord {
            id,
            name: name.into(),
            native: RawMutex::new(),
            owner: AtomicU64::new(NO_OWNER),
        });
        self.table
            .write()
            .unwrap()
            .insert(id.to_be_bytes().to_vec(), record)
            .expect("mutex ids are monotonic and never reused");
        id
    }

    fn resolve(&self, id: u64) -> Option<Arc<MutexRecord>> {
        self.table.read().unwrap().get(&id.to_be_bytes()).cloned()
    }

    /// Acquire a read lock on the registry, resolve the record, release.
    /// Attempt a non-blocking native lock; on failure, release the
    /// registry lock *before* blocking on the native mutex (this is the
    /// pattern section 4.7 calls essential to avoid false-positive
    /// deadlock reports), then re-resolve afterward since the record may
    /// have been destroyed while we slept.
    pub fn lock(&self, id: u64) -> Result<(), MutexError> {
        let record = self.resolve(id).ok_or(MutexError::NotFound)?;
        let me = thread_registry::current();
        if let Some(me) = &me {
            me.set_awaited_mutex(id);
        }

        if record.native.try_lock() {
            self.mark_owned(&record, &me);
            return Ok(());
        }

        record.native.lock();

        if self.resolve(id).is_none() {
            return Err(MutexError::NotFound);
        }
        self.mark_owned(&record, &me);
        Ok(())
    }

    fn mark_owned(&self, record: &MutexRecord, me: &Option<Arc<thread_registry::ThreadRecord>>) {
        if let Some(me) = me {
            record.owner.store(me.handle, Ordering::Release);
            me.set_awaited_mutex(thread_registry::NO_MUTEX);
        }
    }

    pub fn unlock(&self, id: u64) -> Result<(), MutexError> {
        let record = self.resolve(id).ok_or(MutexError::NotFound)?;
        record.owner.store(NO_OWNER, Ordering::Release);
        record.native.unlock();
        Ok(())
    }

    pub fn destroy(&self, id: u64) -> Result<(), HtableError> {
        let mut table = self.table.write().unwrap();
        table.delete(&id.to_be_bytes(), |_record| {})
    }

    pub fn owner_of(&self, id: u64) -> Option<u64> {
        self.resolve(id).map(|r| r.owner())
    }

    pub fn dump(&self) -> String {
        let table = self.table.read().unwrap();
        let mut out = String::from("mutexes:\n");
        for (_, r) in table.iter() {
            out.push_str(&format!("  {:#x} {} owner={:#x}\n", r.id, r.name, r.owner()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn create_lock_unlock_tracks_owner() {
        let registry = MutexRegistry::new();
        let id = registry.create("m1");
        registry.lock(id).unwrap();
        // No thread record installed in this test thread, so owner stays
        // NO_OWNER, but the native lock itself must still hold (verified
        // by trylock failing if we had a second handle; here we just
        // check unlock succeeds and clears state).
        registry.unlock(id).unwrap();
        assert_eq!(registry.owner_of(id), Some(NO_OWNER));
    }

    #[test]
    fn destroy_removes_the_record() {
        let registry = MutexRegistry::new();
        let id = registry.create("m1");
        registry.destroy(id).unwrap();
        assert_eq!(registry.owner_of(id), None);
    }
}
