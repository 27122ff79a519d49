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

//! Per-thread record keyed by a stable, registry-assigned handle (4.6).
//! Each thread keeps an immutable reference to its own record in
//! thread-local storage, set once at thread start, so a signal handler
//! can read its own name/awaited-mutex without contending for the
//! registry lock.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use crate::htable::Htable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadKind {
    /// Started on behalf of the embedding application; joined by `wait_all`
    /// at shutdown.
    Client,
    /// Started and owned by the supervisor (health loop, accept loops);
    /// not joined via `wait_all`.
    Framework,
}

/// A registry-wide "no mutex" sentinel, matching the mutex registry's
/// reserved id 0.
pub const NO_MUTEX: u64 = 0;

pub struct ThreadRecord {
    pub handle: u64,
    pub name: String,
    log_enabled: AtomicBool,
    awaited_mutex: AtomicU64,
    pub kind: ThreadKind,
    #[cfg(unix)]
    pub native: std::sync::OnceLock<libc::pthread_t>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadRecord {
    pub fn log_enabled(&self) -> bool {
        self.log_enabled.load(Ordering::Acquire)
    }

    pub fn set_log_enabled(&self, on: bool) {
        self.log_enabled.store(on, Ordering::Release);
    }

    pub fn awaited_mutex(&self) -> u64 {
        self.awaited_mutex.load(Ordering::Acquire)
    }

    pub fn set_awaited_mutex(&self, id: u64) {
        self.awaited_mutex.store(id, Ordering::Release);
    }
}

thread_local! {
    static SELF_RECORD: RefCell<Option<Arc<ThreadRecord>>> = const { RefCell::new(None) };
}

/// Reads this thread's own record through the thread-local handle,
/// without taking the registry lock. Used by the signal handler.
pub fn current() -> Option<Arc<ThreadRecord>> {
    SELF_RECORD.with(|c| c.borrow().clone())
}

fn install_self(record: Arc<ThreadRecord>) {
    #[cfg(unix)]
    {
        let _ = record.native.set(unsafe { libc::pthread_self() });
    }
    SELF_RECORD.with(|c| *c.borrow_mut() = Some(record));
}

pub struct ThreadRegistry {
    table: RwLock<Htable<Arc<ThreadRecord>>>,
    next_handle: AtomicU64,
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Htable::new(32)),
            next_handle: AtomicU64::new(1),
        }
    }

    fn alloc_record(&self, name: impl Into<String>, kind: ThreadKind) -> Arc<ThreadRecord> {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        Arc::new(ThreadRecord {
            handle,
            name: name.into(),
            log_enabled: AtomicBool::new(true),
            awaited_mutex: AtomicU64::new(NO_MUTEX),
            kind,
            #[cfg(unix)]
            native: std::sync::OnceLock::new(),
            join: Mutex::new(None),
        })
    }

    fn insert(&self, record: Arc<ThreadRecord>) {
        let mut table = self.table.write().unwrap();
        table
            .insert(record.handle.to_be_bytes().to_vec(), record)
            .expect("handles are monotonic and never reused");
    }

    /// Synchronously inserts the main thread's record. Call once, from the
    /// main thread, before anything else touches the registry.
    pub fn register_main(&self) -> Arc<ThreadRecord> {
        let record = self.alloc_record("main", ThreadKind::Framework);
        install_self(record.clone());
        self.insert(record.clone());
        record
    }

    /// Allocates a record, inserts it, then starts the OS thread. The
    /// thread's entry point stores its own record in thread-local storage
    /// before invoking `f`. If the OS thread fails to start, the record is
    /// removed again.
    pub fn spawn<F>(&self, name: impl Into<String>, kind: ThreadKind, f: F) -> std::io::Result<u64>
    where
        F: FnOnce() + Send + 'static,
    {
        let record = self.alloc_record(name, kind);
        self.insert(record.clone());
        let handle = record.handle;
        let thread_record = record.clone();

        let spawned = std::thread::Builder::new()
            .name(record.name.clone())
            .spawn(move || {
                install_self(thread_record);
                f();
            });

        match spawned {
            Ok(jh) => {
                *record.join.lock().unwrap() = Some(jh);
                Ok(handle)
            }
            Err(e) => {
                self.table.write().unwrap().remove(&handle.to_be_bytes());
                Err(e)
            }
        }
    }

    fn resolve(&self, handle: u64) -> Option<Arc<ThreadRecord>> {
        self.table
            .read()
            .unwrap()
            .get(&handle.to_be_bytes())
            .cloned()
    }

    pub fn set_log(&self, handle: u64, on: bool) {
        let target = if handle == 0 { current() } else { self.resolve(handle) };
        if let Some(r) = target {
            r.set_log_enabled(on);
        }
    }

    pub fn set_log_all(&self, on: bool) {
        let table = self.table.read().unwrap();
        for (_, r) in table.iter() {
            r.set_log_enabled(on);
        }
    }

    pub fn get_log(&self, handle: u64) -> bool {
        let target = if handle == 0 { current() } else { self.resolve(handle) };
        target.map(|r| r.log_enabled()).unwrap_or(false)
    }

    pub fn awaited_mutex_of(&self, handle: u64) -> Option<u64> {
        self.resolve(handle).map(|r| r.awaited_mutex())
    }

    /// Repeatedly finds the first client thread, releases the registry
    /// lock, joins it, then removes and disposes its record, until no
    /// client threads remain.
    pub fn wait_all(&self) {
        loop {
            let next_client = {
                let table = self.table.read().unwrap();
                table
                    .iter()
                    .find(|(_, r)| r.kind == ThreadKind::Client)
                    .map(|(_, r)| r.clone())
            };
            let Some(record) = next_client else { break };
            let jh = record.join.lock().unwrap().take();
            if let Some(jh) = jh {
                let _ = jh.join();
            }
            self.table
                .write()
                .unwrap()
                .remove(&record.handle.to_be_bytes());
        }
    }

    pub fn dump(&self) -> String {
        let table = self.table.read().unwrap();
        let mut out = String::from("threads:\n");
        for (_, r) in table.iter() {
            out.push_str(&format!(
                "  {:#x} {} ({:?}) log={} awaited_mutex={:#x}\n",
                r.handle,
                r.name,
                r.kind,
                r.log_enabled(),
                r.awaited_mutex()
            ));
        }
        out
    }

    pub fn iter_handles(&self) -> Vec<u64> {
        self.table.read().unwrap().iter().map(|(_, r)| r.handle).collect()
    }

    #[cfg(unix)]
    pub fn send_diagnostic_signal(&self, handle: u64, signal: libc::c_int) -> bool {
        let Some(record) = self.resolve(handle) else {
            return false;
        };
        let Some(native) = record.native.get() else {
            return false;
        };
        unsafe { libc::pthread_kill(*native, signal) == 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;

    #[test]
    fn spawn_inserts_and_wait_all_joins_client_threads() {
        let registry = Arc::new(ThreadRegistry::new());
        registry.register_main();
        let (tx, rx) = mpsc::channel();
        let reg = registry.clone();
        reg.spawn("worker", ThreadKind::Client, move || {
            tx.send(()).unwrap();
        })
        .unwrap();
        rx.recv().unwrap();
        registry.wait_all();
        // Only the main thread's record remains.
        assert_eq!(registry.iter_handles().len(), 1);
    }

    #[test]
    fn set_log_all_affects_every_thread() {
        let registry = ThreadRegistry::new();
        let main = registry.register_main();
        registry.set_log_all(false);
        assert!(!registry.get_log(main.handle));
    }
}
