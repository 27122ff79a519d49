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

//! Web surface (4.14): an HTTP/1.1 accept loop with built-in routes over
//! the configuration store, log ring, registries, and memory accounting.
//! Each connection feeds bytes through `web_req::HttpRequest` until
//! complete, then a handler callback (built-in or user-supplied)
//! produces the response.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, RwLock};

use crate::buff::ByteBuffer;
use crate::cmd_tree::MemoryStats;
use crate::error::SupervisorError;
use crate::log_ring::LogRing;
use crate::mutex_registry::MutexRegistry;
use crate::thread_registry::{ThreadKind, ThreadRegistry};
use crate::valstore::ValueStore;
use crate::web_req::HttpRequest;

const MAX_REQUEST: usize = 64 * 1024;

pub struct WebContext {
    pub threads: Arc<ThreadRegistry>,
    pub mutexes: Arc<MutexRegistry>,
    pub log: Arc<Mutex<LogRing>>,
    pub cfg: Arc<RwLock<ValueStore>>,
    pub memory: Arc<MemoryStats>,
}

fn html_page(title: &str, body: &str) -> Vec<u8> {
    format!("<html><head><title>{title}</title></head><body><h1>{title}</h1>{body}</body></html>")
        .into_bytes()
}

fn respond(stream: &mut TcpStream, status: &str, content_type: &str, body: &[u8]) -> std::io::Result<()> {
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)
}

fn route(ctx: &WebContext, req: &HttpRequest, buff: &[u8]) -> (String, String, Vec<u8>) {
    let path = req.path.map(|p| String::from_utf8_lossy(p.resolve(buff)).into_owned());
    match path.as_deref() {
        Some("/") | Some("/Configuration") => {
            if req.method == Some(crate::web_req::Method::Post) {
                let mut store = ctx.cfg.write().unwrap();
                for (name, value) in req.decoded_params(buff) {
                    let _ = store.set_existing(&name, &value);
                }
            }
            let store = ctx.cfg.read().unwrap();
            let mut rows = String::new();
            for (name, value) in store.iter() {
                rows.push_str(&format!("<tr><td>{name}</td><td>{}</td></tr>", value.to_display_string()));
            }
            ("200 OK".into(), "text/html".into(), html_page("Configuration", &format!("<table>{rows}</table>")))
        }
        Some("/syslog") => {
            let log = ctx.log.lock().unwrap();
            let body = html_page("Log ring", &format!("<pre>{}</pre>", log.dump()));
            ("200 OK".into(), "text/html".into(), body)
        }
        Some("/threads") => {
            let body = html_page("Threads", &format!("<pre>{}</pre>", ctx.threads.dump()));
            ("200 OK".into(), "text/html".into(), body)
        }
        Some("/mutexes") => {
            let body = html_page("Mutexes", &format!("<pre>{}</pre>", ctx.mutexes.dump()));
            ("200 OK".into(), "text/html".into(), body)
        }
        Some("/memory") => {
            let body = html_page(
                "Memory",
                &format!(
                    "allocations={} bytes={} high_water_mark={}",
                    ctx.memory.total_allocations.load(std::sync::atomic::Ordering::Relaxed),
                    ctx.memory.total_bytes.load(std::sync::atomic::Ordering::Relaxed),
                    ctx.memory.high_water_mark.load(std::sync::atomic::Ordering::Relaxed)
                ),
            );
            ("200 OK".into(), "text/html".into(), body)
        }
        _ => ("404 Not Found".into(), "text/plain".into(), b"not found".to_vec()),
    }
}

pub fn start(threads: &ThreadRegistry, port: u16, ctx: WebContext) -> Result<(), SupervisorError> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = TcpListener::bind(addr).map_err(|source| SupervisorError::BindFailed {
        what: "web surface",
        addr,
        source,
    })?;
    let ctx = Arc::new(ctx);

    threads
        .spawn("web-srv-accept", ThreadKind::Framework, move || {
            accept_loop(listener, ctx);
        })
        .map_err(|source| SupervisorError::ThreadSpawnFailed {
            name: "web-srv-accept",
            source,
        })?;
    Ok(())
}

fn accept_loop(listener: TcpListener, ctx: Arc<WebContext>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let ctx = ctx.clone();
                if let Err(e) = serve_one(stream, &ctx) {
                    tracing::warn!(error = %e, "web surface: connection failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "web surface: accept failed"),
        }
    }
}

fn serve_one(mut stream: TcpStream, ctx: &WebContext) -> std::io::Result<()> {
    let mut buf = ByteBuffer::new(512, MAX_REQUEST);
    let mut req = HttpRequest::new();
    let mut read_chunk = [0u8; 512];

    loop {
        let n = stream.read(&mut read_chunk)?;
        if n == 0 {
            return Ok(());
        }
        if buf.append(&read_chunk[..n]).is_err() {
            return respond(&mut stream, "413 Payload Too Large", "text/plain", b"request too large");
        }
        match req.parse(buf.as_slice()) {
            Ok(true) => break,
            Ok(false) => continue,
            Err(_) => return respond(&mut stream, "400 Bad Request", "text/plain", b"malformed request"),
        }
    }

    let (status, content_type, body) = route(ctx, &req, buf.as_slice());
    respond(&mut stream, &status, &content_type, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_ctx() -> WebContext {
        WebContext {
            threads: Arc::new(ThreadRegistry::new()),
            mutexes: Arc::new(MutexRegistry::new()),
            log: Arc::new(Mutex::new(LogRing::new(1024))),
            cfg: Arc::new(RwLock::new(crate::cfg::build_default_store())),
            memory: Arc::new(MemoryStats::default()),
        }
    }

    #[test]
    fn get_root_renders_config_table() {
        let ctx = test_ctx();
        let mut req = HttpRequest::new();
        let buff = b"GET / HTTP/1.1\r\n\r\n";
        req.parse(buff).unwrap();
        let (status, _, body) = route(&ctx, &req, buff);
        assert_eq!(status, "200 OK");
        assert!(String::from_utf8_lossy(&body).contains("cfg.cmdport"));
    }

    #[test]
    fn unknown_path_is_404() {
        let ctx = test_ctx();
        let mut req = HttpRequest::new();
        let buff = b"GET /nope HTTP/1.1\r\n\r\n";
        req.parse(buff).unwrap();
        let (status, _, _) = route(&ctx, &req, buff);
        assert_eq!(status, "404 Not Found");
    }

    #[test]
    fn post_to_config_applies_via_set_existing() {
        let ctx = test_ctx();
        let mut req = HttpRequest::new();
        let body = format!("{}=10005", crate::cfg::CMD_PORT);
        let buff = format!(
            "POST /Configuration HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
        .into_bytes();
        req.parse(&buff).unwrap();
        route(&ctx, &req, &buff);
        assert_eq!(ctx.cfg.read().unwrap().get_number(crate::cfg::CMD_PORT), Some(10005));
    }
}
