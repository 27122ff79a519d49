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

//! Ambient structured logging (10.1), distinct from the in-memory log
//! ring (4.5): this is the binary's own startup/shutdown/error-path
//! diagnostics, wired through `tracing` and a compact stdout `fmt`
//! layer. One-shot global init; every component then logs through the
//! ordinary `tracing::{trace,debug,info,warn,error}!` macros directly.

use tracing_core::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Maps the configuration store's `loglvl` bitmask (a free-form number
/// matching `^[0-9]+$`) onto a `tracing_core::LevelFilter`. Bit 0 is the
/// lowest tier (error-only); each additional set bit widens the filter
/// one level, capping at `TRACE`. A bitmask of 0 disables logging.
fn level_filter_for_bitmask(bitmask: i32) -> LevelFilter {
    match bitmask {
        0 => LevelFilter::OFF,
        1 => LevelFilter::ERROR,
        2 => LevelFilter::WARN,
        3 => LevelFilter::INFO,
        4 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global subscriber once. Safe to call more than once in a
/// process (the second call is a no-op, matching `tracing`'s own
/// set-global-default semantics) but a fresh guard is only returned the
/// first time.
pub fn init(loglevel_bitmask: i32) {
    let filter = level_filter_for_bitmask(loglevel_bitmask);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_thread_names(true)
        .with_target(false)
        .with_writer(std::io::stdout)
        .with_filter(filter);

    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bitmask_zero_disables_logging() {
        assert_eq!(level_filter_for_bitmask(0), LevelFilter::OFF);
    }

    #[test]
    fn bitmask_above_range_saturates_at_trace() {
        assert_eq!(level_filter_for_bitmask(99), LevelFilter::TRACE);
    }

    #[test]
    fn init_does_not_panic_when_called_twice() {
        init(3);
        init(3);
    }
}
