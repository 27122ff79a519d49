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

//! Address value helpers (the `address` variant of `Value`, section 3).
//! Grounded in `iw_ip_ipv4_to_addr` / `iw_ip_set_port` / `iw_ip_addr_to_str`:
//! this module only constructs and formats addresses. Actual socket
//! opening goes through `std::net` directly in `cmd_srv`/`web_srv`/`cmd_clnt` —
//! the platform socket API itself stays an external collaborator.

use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub ip: IpAddr,
    pub port: Option<u16>,
}

impl Address {
    pub fn loopback_v4() -> Self {
        Self {
            ip: IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            port: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// `A.B.C.D[:port]` or `[v6]:port`, matching the original's
    /// `iw_ip_addr_to_str`.
    pub fn render(&self) -> String {
        match (self.ip, self.port) {
            (IpAddr::V4(v4), Some(p)) => format!("{v4}:{p}"),
            (IpAddr::V4(v4), None) => format!("{v4}"),
            (IpAddr::V6(v6), Some(p)) => format!("[{v6}]:{p}"),
            (IpAddr::V6(v6), None) => format!("{v6}"),
        }
    }

    /// Parses `render`'s own output back into an `Address`.
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(rest) = s.strip_prefix('[') {
            let (v6, port) = rest.split_once(']')?;
            let ip: std::net::Ipv6Addr = v6.parse().ok()?;
            let port = match port.strip_prefix(':') {
                Some(p) => Some(p.parse().ok()?),
                None => None,
            };
            return Some(Self {
                ip: IpAddr::V6(ip),
                port,
            });
        }
        match s.rsplit_once(':') {
            Some((host, port)) if host.parse::<std::net::Ipv4Addr>().is_ok() => Some(Self {
                ip: IpAddr::V4(host.parse().ok()?),
                port: Some(port.parse().ok()?),
            }),
            _ => s.parse::<IpAddr>().ok().map(|ip| Self { ip, port: None }),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn loopback_with_port_renders_and_round_trips() {
        let a = Address::loopback_v4().with_port(10000);
        assert_eq!(a.render(), "127.0.0.1:10000");
        assert_eq!(Address::parse(&a.render()), Some(a));
    }
}
