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

//! Supervisor (4.15): initializes every component in dependency order,
//! installs the signal handler, starts the command/web surfaces and the
//! health loop, invokes the caller's main callback, then sleeps until
//! told to shut down — at which point everything unwinds in reverse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::cfg;
use crate::cmd_tree::{self, CommandNode, Context as CmdContext, MemoryStats};
use crate::error::SupervisorError;
use crate::log_ring::LogRing;
use crate::mutex_registry::MutexRegistry;
use crate::thread_registry::ThreadRegistry;
use crate::valstore::ValueStore;
use crate::{cmd_srv, health, signal, web_srv};

/// Everything a running supervisor owns. Dropped in the reverse of the
/// order it was built, the way `Supervisor::start`'s init sequence reads
/// top to bottom (4.15).
pub struct Supervisor {
    pub threads: Arc<ThreadRegistry>,
    pub mutexes: Arc<MutexRegistry>,
    pub log: Arc<Mutex<LogRing>>,
    pub cfg: Arc<RwLock<ValueStore>>,
    pub memory: Arc<MemoryStats>,
    pub command_tree: Arc<CommandNode>,
    shutdown: Arc<AtomicBool>,
}

/// Extra built-in command nodes the embedder wants attached under the
/// root, alongside the framework's own (help, threads, mutexes, log,
/// memory, syslog, iwver, quit).
pub type MainCallback = Box<dyn FnOnce(&Supervisor) + Send>;

impl Supervisor {
    /// Runs the full init order from section 4.15, then blocks the
    /// calling (main) thread in a 1-second poll loop until shutdown is
    /// requested, either by signal or by the `quit` command.
    pub fn start(
        program_name: &str,
        program_version: &'static str,
        configure: impl FnOnce(&mut ValueStore),
        main_callback: MainCallback,
    ) -> Result<(), SupervisorError> {
        // 1. Configuration store; seed from code.
        let mut store = cfg::build_default_store();
        configure(&mut store);
        let cmd_port = store.get_number(cfg::CMD_PORT).unwrap_or(cfg::defaults::CMD_PORT) as u16;
        let web_port = store.get_number(cfg::WEBGUI_PORT).unwrap_or(cfg::defaults::WEBGUI_PORT) as u16;
        let webgui_enabled = store.get_number(cfg::WEBGUI_ENABLE).unwrap_or(0) != 0;
        let healthcheck_enabled = store.get_number(cfg::HEALTHCHECK_ENABLE).unwrap_or(0) != 0;
        let crashhandler_enabled = store.get_number(cfg::CRASHHANDLER_ENABLE).unwrap_or(0) != 0;
        let crash_file = store
            .get_string(cfg::CRASHHANDLER_FILE)
            .unwrap_or(cfg::defaults::CRASHHANDLER_FILE)
            .to_string();
        let syslog_size = store.get_number(cfg::SYSLOG_SIZE).unwrap_or(cfg::defaults::SYSLOG_SIZE) as usize;
        let loglevel = store.get_number(cfg::LOGLEVEL).unwrap_or(0);
        let cfg_store = Arc::new(RwLock::new(store));

        // 2. Log ring; initial log-level and sink come from configuration.
        crate::logging::init(loglevel);
        let log = Arc::new(Mutex::new(LogRing::new(syslog_size)));
        tracing::info!(program_name, "supervisor: starting");

        // 3. Thread registry; register main.
        let threads = Arc::new(ThreadRegistry::new());
        threads.register_main();

        // 4. Mutex registry.
        let mutexes = Arc::new(MutexRegistry::new());

        // 5. Log ring writer unblocked: nothing to do explicitly here, the
        // ring has been usable since step 2; any signal-path writes before
        // this point queued through `try_lock` and would simply have been
        // dropped on contention, which section 4.15 calls acceptable.
        if crashhandler_enabled {
            if let Err(e) = signal::install(threads.clone(), log.clone(), &crash_file, program_name) {
                tracing::warn!(error = %e, "supervisor: failed to install signal handler");
            }
        }

        let memory = Arc::new(MemoryStats::default());
        let cmd_ctx = CmdContext {
            threads: threads.clone(),
            mutexes: mutexes.clone(),
            log: log.clone(),
            cfg: cfg_store.clone(),
            memory: memory.clone(),
            prg_name: program_name.to_string(),
            prg_version: program_version,
        };
        let command_tree = Arc::new(cmd_tree::build_root(cmd_ctx));

        // 6. Command server and (optionally) web surface.
        cmd_srv::start(&threads, cmd_port, command_tree.clone())?;
        if webgui_enabled {
            let web_ctx = web_srv::WebContext {
                threads: threads.clone(),
                mutexes: mutexes.clone(),
                log: log.clone(),
                cfg: cfg_store.clone(),
                memory: memory.clone(),
            };
            web_srv::start(&threads, web_port, web_ctx)?;
        }

        // 7. Health loop.
        let shutdown = Arc::new(AtomicBool::new(false));
        if healthcheck_enabled {
            let health_threads = threads.clone();
            let health_mutexes = mutexes.clone();
            let health_shutdown = shutdown.clone();
            threads
                .spawn("health", crate::thread_registry::ThreadKind::Framework, move || {
                    health::run(health_threads, health_mutexes, health_shutdown);
                })
                .map_err(|source| SupervisorError::ThreadSpawnFailed {
                    name: "health",
                    source,
                })?;
        }

        let supervisor = Supervisor {
            threads,
            mutexes,
            log,
            cfg: cfg_store,
            memory,
            command_tree,
            shutdown,
        };

        // 8. Invoke the user's main callback.
        main_callback(&supervisor);

        supervisor.run_until_shutdown();
        supervisor.shutdown();
        Ok(())
    }

    /// Sleeps in 1-second increments until an interrupt or the `quit`
    /// command sets the shutdown flag (matches the health loop's own poll
    /// granularity, 4.9).
    fn run_until_shutdown(&self) {
        loop {
            std::thread::sleep(Duration::from_millis(200));
            if signal::shutdown_requested() || self.shutdown.load(Ordering::Acquire) {
                tracing::info!("supervisor: shutdown requested");
                return;
            }
        }
    }

    /// Reverse-order teardown (4.15): signal client threads to stop, join
    /// them, then let the registries drop.
    fn shutdown(&self) {
        tracing::info!("supervisor: shutting down");
        self.shutdown.store(true, Ordering::Release);
        self.threads.wait_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn start_runs_main_callback_and_shuts_down_immediately() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_inner = ran.clone();
        let result = Supervisor::start(
            "test-prg",
            "0.0.0",
            |store| {
                let _ = store.set_number(cfg::HEALTHCHECK_ENABLE, 0);
                let _ = store.set_number(cfg::CRASHHANDLER_ENABLE, 0);
                let _ = store.set_number(cfg::WEBGUI_ENABLE, 0);
                let _ = store.set_number(cfg::CMD_PORT, 0);
            },
            Box::new(move |sv| {
                ran_inner.store(true, Ordering::Release);
                sv.shutdown.store(true, Ordering::Release);
            }),
        );
        assert!(result.is_ok());
        assert!(ran.load(Ordering::Acquire));
    }
}
