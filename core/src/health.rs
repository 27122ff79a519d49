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

//! Deadlock (health) loop (4.9): a dedicated framework thread sleeping one
//! second between scans. Each scan walks the wait-for chain
//! `thread -> awaited mutex -> owner thread -> ...` across the two
//! separately-locked registries, resolving each hop by stable id rather
//! than by holding both locks at once, to avoid deadlocking the
//! detector itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::mutex_registry::{MutexRegistry, NO_OWNER};
use crate::thread_registry::{ThreadRegistry, NO_MUTEX};

/// One scan. Returns the cycle of thread handles if a deadlock exists.
pub fn scan_for_deadlock(threads: &ThreadRegistry, mutexes: &MutexRegistry) -> Option<Vec<u64>> {
    for start in threads.iter_handles() {
        let mut chain = vec![start];
        let mut cursor = start;
        loop {
            let Some(awaited) = threads.awaited_mutex_of(cursor) else {
                break;
            };
            if awaited == NO_MUTEX {
                break;
            }
            let Some(owner) = mutexes.owner_of(awaited) else {
                break;
            };
            if owner == NO_OWNER {
                break;
            }
            if owner == start {
                return Some(chain);
            }
            if chain.contains(&owner) {
                break;
            }
            chain.push(owner);
            cursor = owner;
        }
    }
    None
}

/// Runs the health loop until shutdown is requested or a deadlock is
/// detected (detection is terminal; recovery is out of scope).
pub fn run(threads: Arc<ThreadRegistry>, mutexes: Arc<MutexRegistry>, shutdown: Arc<AtomicBool>) {
    tracing::info!("health loop: entering");
    loop {
        std::thread::sleep(Duration::from_secs(1));
        if shutdown.load(Ordering::Acquire) {
            tracing::info!("health loop: shutting down");
            return;
        }
        if let Some(cycle) = scan_for_deadlock(&threads, &mutexes) {
            tracing::error!(?cycle, "deadlock detected, dumping participant callstacks");
            #[cfg(unix)]
            for handle in &cycle {
                threads.send_diagnostic_signal(*handle, libc::SIGUSR1);
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Drives two threads into a genuine two-mutex deadlock (`t1` holds
    /// `m1` and blocks on `m2`; `t2` holds `m2` and blocks on `m1`) and
    /// polls `scan_for_deadlock` until it reports the cycle.
    #[test]
    fn two_thread_cycle_is_detected() {
        let threads = Arc::new(ThreadRegistry::new());
        let mutexes = Arc::new(MutexRegistry::new());

        let m1 = mutexes.create("m1");
        let m2 = mutexes.create("m2");

        let t1 = threads
            .spawn("t1", crate::thread_registry::ThreadKind::Client, {
                let mutexes = mutexes.clone();
                move || {
                    mutexes.lock(m1).unwrap();
                    std::thread::sleep(Duration::from_millis(50));
                    let _ = mutexes.lock(m2);
                }
            })
            .unwrap();

        let t2 = threads
            .spawn("t2", crate::thread_registry::ThreadKind::Client, {
                let mutexes = mutexes.clone();
                move || {
                    mutexes.lock(m2).unwrap();
                    std::thread::sleep(Duration::from_millis(50));
                    let _ = mutexes.lock(m1);
                }
            })
            .unwrap();

        let mut detected = None;
        for _ in 0..100 {
            if let Some(cycle) = scan_for_deadlock(&threads, &mutexes) {
                detected = Some(cycle);
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        let cycle = detected.expect("deadlock should be detected within the poll window");
        assert!(cycle.contains(&t1));
        assert!(cycle.contains(&t2));
    }

    /// Same shape with a third participant (`t1 -> m2 -> t2 -> m3 -> t3 ->
    /// m1 -> t1`), confirming the scan isn't hardcoded to two hops.
    #[test]
    fn three_thread_cycle_is_detected() {
        let threads = Arc::new(ThreadRegistry::new());
        let mutexes = Arc::new(MutexRegistry::new());

        let m1 = mutexes.create("m1");
        let m2 = mutexes.create("m2");
        let m3 = mutexes.create("m3");

        let spawn_link = |name: &'static str, own: u64, want: u64| {
            threads
                .spawn(name, crate::thread_registry::ThreadKind::Client, {
                    let mutexes = mutexes.clone();
                    move || {
                        mutexes.lock(own).unwrap();
                        std::thread::sleep(Duration::from_millis(50));
                        let _ = mutexes.lock(want);
                    }
                })
                .unwrap()
        };

        let t1 = spawn_link("t1", m1, m2);
        let t2 = spawn_link("t2", m2, m3);
        let t3 = spawn_link("t3", m3, m1);

        let mut detected = None;
        for _ in 0..100 {
            if let Some(cycle) = scan_for_deadlock(&threads, &mutexes) {
                detected = Some(cycle);
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        let cycle = detected.expect("deadlock should be detected within the poll window");
        assert!(cycle.contains(&t1));
        assert!(cycle.contains(&t2));
        assert!(cycle.contains(&t3));
    }

    #[test]
    fn single_thread_awaiting_an_unowned_mutex_is_not_a_cycle() {
        let threads = ThreadRegistry::new();
        let mutexes = MutexRegistry::new();
        let t1 = threads.register_main();
        let m1 = mutexes.create("m1");
        t1.set_awaited_mutex(m1);
        assert_eq!(scan_for_deadlock(&threads, &mutexes), None);
    }
}
