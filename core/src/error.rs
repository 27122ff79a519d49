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

//! One `thiserror` enum per error kind, matching the kinds this substrate
//! distinguishes: resource exhaustion, validation, protocol, transport, and
//! supervisor startup failure.

use thiserror::Error;

/// Byte buffer failures. Always non-fatal: the caller is expected to back
/// off or shrink the request.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum BufferError {
    #[error("requested {requested} bytes, which would exceed the buffer's maximum of {max}")]
    CapacityExceeded { requested: usize, max: usize },
}

/// Open-chain hash table failures.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum HtableError {
    #[error("key already present")]
    DuplicateKey,
    #[error("no such key")]
    NotFound,
}

/// Configuration / value-store validation failures.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ValStoreError {
    #[error("no such value: {name}")]
    NoSuchValue { name: String },
    #[error("incorrect type for {name}")]
    IncorrectType { name: String },
    #[error("{name} failed its validation callback")]
    FailedCallback { name: String },
    #[error("{name}: {message}")]
    FailedRegexp { name: String, message: String },
}

/// Parse-primitive and command/HTTP parser failures.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ParseError {
    #[error("input exhausted before a match was found")]
    Incomplete,
    #[error("malformed input: {0}")]
    Malformed(String),
}

/// Socket/transport failures during serve (command server, web surface).
/// Always logged and the connection closed; the accept loop continues.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request exceeded the server's maximum buffer size")]
    RequestTooLarge,
}

/// Supervisor initialization failures. These propagate out of
/// `Supervisor::start` with a startup-failed exit.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to bind {what} on {addr}: {source}")]
    BindFailed {
        what: &'static str,
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start framework thread {name}: {source}")]
    ThreadSpawnFailed {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration error: {0}")]
    Config(#[from] ValStoreError),
}
