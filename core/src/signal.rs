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

//! Signal/crash handler (4.8). One handler dispatches on signal number
//! into three paths: per-thread diagnostic dump into the log ring,
//! orderly-then-forced shutdown on interrupt, and an async-signal-safe
//! crash report on the fatal signals. The fatal set is registered via
//! `signal-hook`'s `register_sigaction` (`extended-siginfo` feature),
//! which installs with `SA_SIGINFO` so the handler receives the raw
//! `siginfo_t` and can read `si_addr` the way `iw_thread.c`'s
//! `sigaction`-based handler does; the diagnostic/interrupt set uses
//! the plain `register` entry point since it needs no siginfo.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::log_ring::LogRing;
use crate::thread_registry::ThreadRegistry;

static INTERRUPT_COUNT: AtomicI32 = AtomicI32::new(0);
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static CRASH_FILE_FD: AtomicI32 = AtomicI32::new(-1);

/// Leaked once at `install` time; reading a `OnceLock` already set never
/// blocks, so this is safe to read from the fatal-signal path.
static PRG_NAME: std::sync::OnceLock<&'static str> = std::sync::OnceLock::new();

/// Shared state the signal handler closure needs read access to without
/// allocating. Installed once by `install`.
struct Shared {
    threads: Arc<ThreadRegistry>,
    log: Arc<Mutex<LogRing>>,
}

static SHARED: std::sync::OnceLock<Shared> = std::sync::OnceLock::new();

/// Returns true once an interrupt has requested shutdown; the supervisor's
/// main loop polls this to begin orderly teardown.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Acquire)
}

/// Requests shutdown the same way the first interrupt delivery does.
/// Used by the `quit` command (4.10), which shuts down without going
/// through the signal path at all.
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::Release);
}

/// Registers the diagnostic, interrupt, and fatal signal sets. `crash_file_path`
/// is opened up front (not inside the handler, which must not allocate a
/// path string) with create+truncate so the fatal path only needs `write`.
#[cfg(unix)]
pub fn install(
    threads: Arc<ThreadRegistry>,
    log: Arc<Mutex<LogRing>>,
    crash_file_path: &str,
    program_name: &str,
) -> std::io::Result<()> {
    let _ = SHARED.set(Shared { threads, log });
    let _ = PRG_NAME.set(Box::leak(program_name.to_string().into_boxed_str()));

    let fd = unsafe {
        let path = std::ffi::CString::new(crash_file_path)
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
        libc::open(
            path.as_ptr(),
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
            0o644,
        )
    };
    if fd >= 0 {
        CRASH_FILE_FD.store(fd, Ordering::Release);
    }

    unsafe {
        signal_hook::low_level::register(libc::SIGUSR1, on_diagnostic)?;
        signal_hook::low_level::register(libc::SIGINT, on_interrupt)?;
        signal_hook::low_level::register(libc::SIGTERM, on_interrupt)?;
        for sig in [libc::SIGILL, libc::SIGABRT, libc::SIGFPE, libc::SIGBUS, libc::SIGSEGV] {
            signal_hook::low_level::register_sigaction(sig, move |info: &libc::siginfo_t| {
                on_fatal(sig, info);
            })?;
        }
    }
    Ok(())
}

fn on_diagnostic() {
    let Some(shared) = SHARED.get() else { return };
    let Some(me) = crate::thread_registry::current() else {
        return;
    };
    let mut line = String::new();
    line.push_str("diagnostic: thread=");
    line.push_str(&me.name);
    line.push_str(" awaited_mutex=0x");
    line.push_str(&format!("{:x}", me.awaited_mutex()));
    if let Ok(mut log) = shared.log.try_lock() {
        log.write(0, line.as_bytes());
        for frame in capture_backtrace() {
            log.write(0, frame.as_bytes());
        }
    }
    let _ = &shared.threads;
}

/// Captures the calling thread's backtrace via glibc's `execinfo.h`
/// functions (`backtrace`/`backtrace_symbols`), symbolicated where the
/// binary carries symbols and a raw hex frame address otherwise —
/// mirrors `iw_thread.c`'s own callstack dump.
fn capture_backtrace() -> Vec<String> {
    const MAX_FRAMES: usize = 64;
    let mut frames: [*mut libc::c_void; MAX_FRAMES] = [std::ptr::null_mut(); MAX_FRAMES];
    let count = unsafe { libc::backtrace(frames.as_mut_ptr(), MAX_FRAMES as libc::c_int) };
    if count <= 0 {
        return Vec::new();
    }
    let symbols = unsafe { libc::backtrace_symbols(frames.as_ptr(), count) };
    if symbols.is_null() {
        return Vec::new();
    }
    let mut lines = Vec::with_capacity(count as usize);
    for i in 0..count as isize {
        unsafe {
            let cstr = std::ffi::CStr::from_ptr(*symbols.offset(i));
            lines.push(cstr.to_string_lossy().into_owned());
        }
    }
    unsafe { libc::free(symbols.cast()) };
    lines
}

fn on_interrupt() {
    let prior = INTERRUPT_COUNT.fetch_add(1, Ordering::SeqCst);
    if prior == 0 {
        SHUTDOWN_REQUESTED.store(true, Ordering::Release);
        return;
    }
    unsafe { libc::_exit(130) };
}

/// Writes an unsigned integer as decimal into `buf`, returning the number
/// of bytes written (no allocation, no `itoa`-equivalent crate).
fn write_decimal(mut n: u64, buf: &mut [u8; 20]) -> usize {
    if n == 0 {
        buf[0] = b'0';
        return 1;
    }
    let mut tmp = [0u8; 20];
    let mut i = 0;
    while n > 0 {
        tmp[i] = b'0' + (n % 10) as u8;
        n /= 10;
        i += 1;
    }
    for j in 0..i {
        buf[j] = tmp[i - 1 - j];
    }
    i
}

/// Writes an unsigned integer as lowercase hex into `buf`, prefixed `0x`.
fn write_hex(mut n: u64, buf: &mut [u8; 18]) -> usize {
    buf[0] = b'0';
    buf[1] = b'x';
    if n == 0 {
        buf[2] = b'0';
        return 3;
    }
    let mut tmp = [0u8; 16];
    let mut i = 0;
    while n > 0 {
        let digit = (n & 0xf) as u8;
        tmp[i] = if digit < 10 { b'0' + digit } else { b'a' + (digit - 10) };
        n >>= 4;
        i += 1;
    }
    for j in 0..i {
        buf[2 + j] = tmp[i - 1 - j];
    }
    2 + i
}

fn raw_write(fd: i32, bytes: &[u8]) {
    unsafe {
        libc::write(fd, bytes.as_ptr() as *const libc::c_void, bytes.len());
    }
}

fn signal_name(sig: i32) -> &'static [u8] {
    match sig {
        libc::SIGILL => b"SIGILL",
        libc::SIGABRT => b"SIGABRT",
        libc::SIGFPE => b"SIGFPE",
        libc::SIGBUS => b"SIGBUS",
        libc::SIGSEGV => b"SIGSEGV",
        _ => b"SIG?",
    }
}

/// Fatal signal path. Every operation here is async-signal-safe: no
/// allocation, no locking, direct `write(2)` to a pre-opened fd, manual
/// integer formatting into stack buffers, and `backtrace`/
/// `backtrace_symbols_fd` (the latter writes straight to the fd with no
/// intermediate `malloc`, unlike `backtrace_symbols`). The process is
/// terminated with `_exit` once the report is written; no destructors run.
fn on_fatal(sig: i32, info: &libc::siginfo_t) {
    let fd = CRASH_FILE_FD.load(Ordering::Acquire);
    if fd >= 0 {
        raw_write(fd, b"Program: ");
        raw_write(fd, PRG_NAME.get().copied().unwrap_or("?").as_bytes());
        raw_write(fd, b"\r\nCaught signal: ");
        let mut dec = [0u8; 20];
        let n = write_decimal(sig as u64, &mut dec);
        raw_write(fd, &dec[..n]);
        raw_write(fd, b" (");
        raw_write(fd, signal_name(sig));
        raw_write(fd, b")\r\nAddress: ");

        let addr = info.si_addr() as u64;
        let mut hex = [0u8; 18];
        let n = write_hex(addr, &mut hex);
        raw_write(fd, &hex[..n]);

        raw_write(fd, b"\r\nCallstack:\r\n-------------------\r\n");
        const MAX_FRAMES: usize = 64;
        let mut frames: [*mut libc::c_void; MAX_FRAMES] = [std::ptr::null_mut(); MAX_FRAMES];
        let count = unsafe { libc::backtrace(frames.as_mut_ptr(), MAX_FRAMES as libc::c_int) };
        if count > 0 {
            unsafe { libc::backtrace_symbols_fd(frames.as_ptr(), count, fd) };
        }
        unsafe {
            libc::close(fd);
        }
    }
    unsafe { libc::_exit(128 + sig) };
}

/// Non-Unix targets have no signal handling surface; shutdown is only
/// ever requested by the supervisor's own Ctrl-C handling via the
/// platform console API, out of scope here.
#[cfg(not(unix))]
pub fn install(
    _threads: Arc<ThreadRegistry>,
    _log: Arc<Mutex<LogRing>>,
    _crash_file_path: &str,
    _program_name: &str,
) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decimal_formatting_matches_std() {
        let mut buf = [0u8; 20];
        for n in [0u64, 7, 42, 65535, 4294967295] {
            let len = write_decimal(n, &mut buf);
            assert_eq!(std::str::from_utf8(&buf[..len]).unwrap(), n.to_string());
        }
    }

    #[test]
    fn hex_formatting_matches_std_format() {
        let mut buf = [0u8; 18];
        for n in [0u64, 255, 0xdead_beef] {
            let len = write_hex(n, &mut buf);
            assert_eq!(
                std::str::from_utf8(&buf[..len]).unwrap(),
                format!("{n:#x}")
            );
        }
    }
}
