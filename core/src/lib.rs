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

//! Embeddable operations substrate: thread/mutex registries with
//! deadlock detection, a crash/signal handler, an in-memory log ring, a
//! typed and validated configuration store, a hierarchical command
//! dispatcher, an incremental HTTP/1.1 parser, and the command/web
//! surfaces and supervisor built on top of them.

pub mod buff;
pub mod cfg;
pub mod cmd_clnt;
pub mod cmd_srv;
pub mod cmd_tree;
pub mod error;
pub mod health;
pub mod htable;
pub mod ip;
pub mod log_ring;
pub mod logging;
pub mod mutex_registry;
pub mod parse;
pub mod signal;
pub mod supervisor;
pub mod thread_registry;
pub mod valstore;
pub mod value;
pub mod web_req;
pub mod web_srv;

pub use error::{BufferError, HtableError, ParseError, SupervisorError, TransportError, ValStoreError};
pub use supervisor::{MainCallback, Supervisor};
