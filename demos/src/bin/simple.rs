// Copyright (c) 2014-2015 Mattias Mattsson, 2022 R3BL LLC. Licensed
// under Apache License, Version 2.0.

//! Minimal supervisor-only demo (section 11): starts the full
//! supervisor with its default configuration and no extra threads,
//! useful as a smoke test of the command and web surfaces. Connect with
//! `instaworks threads dump` or point a browser at
//! `http://localhost:8080/`. Grounded in `examples/simple/main.c`,
//! stripped of its TCP-forwarding payload (which belongs to an
//! embedder, not to this framework).

use instaworks_core::cfg;

fn main() -> miette::Result<()> {
    instaworks_core::Supervisor::start(
        "simple",
        env!("CARGO_PKG_VERSION"),
        |store| {
            let _ = store.set_string(cfg::CRASHHANDLER_FILE, "/tmp/simple.txt");
        },
        Box::new(|_sv| {
            tracing::info!("simple: supervisor up, no additional threads started");
        }),
    )
    .map_err(|e| miette::miette!("{e}"))
}
