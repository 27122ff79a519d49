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

//! Command server (4.12): one framework accept-loop thread on loopback,
//! each connection served synchronously, one request per connection.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::buff::ByteBuffer;
use crate::cmd_tree::{CommandNode, Tokenizer};
use crate::error::SupervisorError;
use crate::thread_registry::{ThreadKind, ThreadRegistry};

const MAX_REQUEST: usize = 4096;
const RESPONSE_SENTINEL: u8 = 0;
/// Gives the client time to initiate close first, so the client (not the
/// server) ends up in TIME_WAIT (4.12).
const CLOSE_DELAY: Duration = Duration::from_millis(20);

/// Starts the accept loop on a framework thread. The root command tree is
/// shared read-only across connections.
pub fn start(
    threads: &ThreadRegistry,
    port: u16,
    root: Arc<CommandNode>,
) -> Result<(), SupervisorError> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = TcpListener::bind(addr).map_err(|source| SupervisorError::BindFailed {
        what: "command server",
        addr,
        source,
    })?;

    threads
        .spawn("cmd-srv-accept", ThreadKind::Framework, move || {
            accept_loop(listener, root);
        })
        .map_err(|source| SupervisorError::ThreadSpawnFailed {
            name: "cmd-srv-accept",
            source,
        })?;
    Ok(())
}

fn accept_loop(listener: TcpListener, root: Arc<CommandNode>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let root = root.clone();
                if let Err(e) = serve_one(stream, &root) {
                    tracing::warn!(error = %e, "command server: connection failed");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "command server: accept failed");
            }
        }
    }
}

fn serve_one(mut stream: TcpStream, root: &CommandNode) -> std::io::Result<()> {
    let mut buf = ByteBuffer::new(256, MAX_REQUEST);
    let mut read_chunk = [0u8; 256];

    let line = loop {
        let n = stream.read(&mut read_chunk)?;
        if n == 0 {
            return Ok(()); // peer closed before sending a full line
        }
        if buf.append(&read_chunk[..n]).is_err() {
            tracing::warn!("command server: request exceeded maximum size");
            return Ok(());
        }
        if let Some(idx) = find_crlf(buf.as_slice()) {
            break String::from_utf8_lossy(&buf.as_slice()[..idx]).into_owned();
        }
    };

    let mut out = Vec::new();
    let mut tokens = Tokenizer::new(&line);
    root.dispatch(&mut out, &mut tokens);
    out.push(RESPONSE_SENTINEL);

    stream.write_all(&out)?;
    std::thread::sleep(CLOSE_DELAY);
    stream.shutdown(std::net::Shutdown::Both)?;
    Ok(())
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::BufRead;

    #[test]
    fn find_crlf_locates_terminator() {
        assert_eq!(find_crlf(b"threads\r\nmore"), Some(7));
        assert_eq!(find_crlf(b"threads"), None);
    }

    #[test]
    fn start_binds_and_spawns_the_accept_thread() {
        let threads = ThreadRegistry::new();
        threads.register_main();
        let cfg = Arc::new(std::sync::RwLock::new(crate::cfg::build_default_store()));
        let ctx = crate::cmd_tree::Context {
            threads: Arc::new(ThreadRegistry::new()),
            mutexes: Arc::new(crate::mutex_registry::MutexRegistry::new()),
            log: Arc::new(std::sync::Mutex::new(crate::log_ring::LogRing::new(1024))),
            cfg,
            memory: Arc::new(crate::cmd_tree::MemoryStats::default()),
            prg_name: "InstaWorks".to_string(),
            prg_version: "0.1.0",
        };
        let root = Arc::new(crate::cmd_tree::build_root(ctx));
        start(&threads, 0, root).unwrap();
    }

    #[test]
    fn command_line_dispatch_via_real_socket() {
        let threads = ThreadRegistry::new();
        threads.register_main();
        let cfg = Arc::new(std::sync::RwLock::new(crate::cfg::build_default_store()));
        let ctx = crate::cmd_tree::Context {
            threads: Arc::new(ThreadRegistry::new()),
            mutexes: Arc::new(crate::mutex_registry::MutexRegistry::new()),
            log: Arc::new(std::sync::Mutex::new(crate::log_ring::LogRing::new(1024))),
            cfg,
            memory: Arc::new(crate::cmd_tree::MemoryStats::default()),
            prg_name: "InstaWorks".to_string(),
            prg_version: "0.1.0",
        };
        let root = Arc::new(crate::cmd_tree::build_root(ctx));
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || accept_loop(listener, root));

        let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        client.write_all(b"iwver\r\n").unwrap();
        let mut response = Vec::new();
        let mut reader = std::io::BufReader::new(client);
        reader.read_until(0, &mut response).unwrap();
        let text = String::from_utf8_lossy(&response);
        assert!(text.contains("InstaWorks version"));
    }
}
