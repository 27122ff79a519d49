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

//! Command client (4.13). Deliberately does not go through `tracing`:
//! this process is alive only long enough to send one request and print
//! the response, so any diagnostic belongs on stdout/stderr directly,
//! the way `iw_cmd_clnt.c` explains in its own file header.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};

use crate::error::TransportError;

/// Joins `argv` with single spaces, sends it terminated by CRLF, and
/// copies every byte of the response to `out` until the NUL sentinel,
/// then shuts the socket down from this side so the client (not the
/// server) enters TIME_WAIT.
pub fn run(port: u16, argv: &[String], out: &mut dyn Write) -> Result<(), TransportError> {
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))?;

    let line = argv.join(" ");
    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\r\n")?;

    let mut chunk = [0u8; 256];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        if let Some(idx) = chunk[..n].iter().position(|&b| b == 0) {
            let _ = out.write_all(&chunk[..idx]);
            break;
        }
        let _ = out.write_all(&chunk[..n]);
    }

    stream.shutdown(std::net::Shutdown::Both)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::TcpListener;

    #[test]
    fn sends_joined_argv_and_stops_reading_at_nul_sentinel() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"threads dump\r\n");
            stream.write_all(b"ok\0").unwrap();
        });

        let mut out = Vec::new();
        run(port, &["threads".to_string(), "dump".to_string()], &mut out).unwrap();
        assert_eq!(out, b"ok");
        server.join().unwrap();
    }

    #[test]
    fn connection_failure_is_reported_as_transport_error() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener); // nothing listening anymore
        let mut out = Vec::new();
        assert!(run(port, &["x".to_string()], &mut out).is_err());
    }
}
