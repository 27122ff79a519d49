// Copyright (c) 2014 Mattias Mattsson, 2022 R3BL LLC. Licensed under
// Apache License, Version 2.0.

//! The dining philosophers example (section 11): five named mutexes
//! ("forks"), five worker threads each taking the fork to their left
//! and the fork to their right. Without `--safe`, each philosopher
//! picks a random order to take its two forks, which can deadlock; with
//! `--safe`, every philosopher takes the lower-numbered fork first,
//! which can't. Grounded in `examples/philosophers/main.c`'s
//! `philo_take_forks`.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use instaworks_core::cfg;
use instaworks_core::mutex_registry::MutexRegistry;
use instaworks_core::thread_registry::ThreadKind;
use rand::Rng;

#[derive(Debug, Parser)]
#[command(about = "Dining philosophers: showcases the deadlock detector")]
struct Args {
    /// Take forks in ascending-id order, which cannot deadlock.
    #[arg(long)]
    safe: bool,

    /// Number of philosophers (and forks).
    #[arg(default_value_t = 5)]
    num_philosophers: usize,
}

fn philosopher_loop(num: usize, left: u64, right: u64, safe: bool, mutexes: &MutexRegistry) {
    loop {
        let (fork1, fork2) = if safe {
            if left < right { (left, right) } else { (right, left) }
        } else if rand::thread_rng().gen_bool(0.5) {
            (left, right)
        } else {
            (right, left)
        };

        tracing::info!(philosopher = num, fork = fork1, "taking fork");
        mutexes.lock(fork1).expect("fork exists for the program's lifetime");
        std::thread::sleep(Duration::from_millis(rand::thread_rng().gen_range(0..100)));

        tracing::info!(philosopher = num, fork = fork2, "taking fork");
        mutexes.lock(fork2).expect("fork exists for the program's lifetime");
        tracing::info!(philosopher = num, fork1, fork2, "got both forks, eating");

        std::thread::sleep(Duration::from_millis(rand::thread_rng().gen_range(0..10)));

        mutexes.unlock(fork1).expect("this thread holds the lock");
        mutexes.unlock(fork2).expect("this thread holds the lock");
    }
}

fn main() -> miette::Result<()> {
    let args = Args::parse();
    let num_philosophers = args.num_philosophers;
    let safe = args.safe;

    instaworks_core::Supervisor::start(
        "philosophers",
        env!("CARGO_PKG_VERSION"),
        |store| {
            let _ = store.set_number(cfg::CMD_PORT, 10002);
            let _ = store.set_string(cfg::CRASHHANDLER_FILE, "/tmp/philo.txt");
        },
        Box::new(move |sv| {
            let fork_ids: Vec<u64> = (0..num_philosophers)
                .map(|i| sv.mutexes.create(format!("Fork {}", i + 1)))
                .collect();

            for i in 0..num_philosophers {
                let left = fork_ids[i];
                let right = fork_ids[(i + 1) % num_philosophers];
                let name = format!("Philosopher {}", i + 1);
                let mutexes: Arc<MutexRegistry> = sv.mutexes.clone();
                sv.threads
                    .spawn(name, ThreadKind::Client, move || {
                        philosopher_loop(i + 1, left, right, safe, &mutexes);
                    })
                    .expect("spawning a philosopher thread should not fail");
            }
        }),
    )
    .map_err(|e| miette::miette!("{e}"))
}
