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

//! Incremental, restartable, zero-copy HTTP/1.1 request parser (4.11).
//! Resumes at `parse_point` on every call, so the caller can feed bytes
//! one at a time or all at once and get the same result. Only the body
//! phase, and on-demand value decoding, ever allocate.

use crate::error::ParseError;
use crate::parse::{casecmp, find, is, read_to, Match, Slice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Trace,
    Connect,
}

impl Method {
    fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"GET" => Some(Method::Get),
            b"HEAD" => Some(Method::Head),
            b"POST" => Some(Method::Post),
            b"PUT" => Some(Method::Put),
            b"DELETE" => Some(Method::Delete),
            b"TRACE" => Some(Method::Trace),
            b"CONNECT" => Some(Method::Connect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    RequestLine,
    Headers,
    Body,
    Complete,
}

/// A `name=value` (or bare `name`) query/form entry, stored as raw slices.
/// Decoding happens on demand, not while parsing.
pub type RawParam = (Slice, Option<Slice>);

#[derive(Debug, Default)]
pub struct HttpRequest {
    phase_is_complete: bool,
    phase: PhaseState,
    parse_point: usize,
    pub method: Option<Method>,
    pub uri: Option<Slice>,
    pub path: Option<Slice>,
    pub version: Option<Slice>,
    pub headers: Vec<(Slice, Slice)>,
    pub content_length: usize,
    pub body: Option<Slice>,
    pub params: Vec<RawParam>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PhaseState(Phase);

impl Default for PhaseState {
    fn default() -> Self {
        PhaseState(Phase::RequestLine)
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.phase_is_complete
    }

    /// Feeds the full buffer received so far (including previously-parsed
    /// bytes; the parser tracks its own resume point). Returns `Ok(true)`
    /// once the request is complete, `Ok(false)` if more bytes are needed,
    /// `Err` on a structurally invalid request.
    pub fn parse(&mut self, buff: &[u8]) -> Result<bool, ParseError> {
        loop {
            match self.phase.0 {
                Phase::RequestLine => match self.try_parse_request_line(buff)? {
                    true => self.phase.0 = Phase::Headers,
                    false => return Ok(false),
                },
                Phase::Headers => match self.try_parse_headers(buff)? {
                    true => {
                        self.phase.0 = if self.content_length > 0 {
                            Phase::Body
                        } else {
                            Phase::Complete
                        }
                    }
                    false => return Ok(false),
                },
                Phase::Body => match self.try_parse_body(buff)? {
                    true => self.phase.0 = Phase::Complete,
                    false => return Ok(false),
                },
                Phase::Complete => {
                    self.phase_is_complete = true;
                    return Ok(true);
                }
            }
        }
    }

    fn try_parse_request_line(&mut self, buff: &[u8]) -> Result<bool, ParseError> {
        let mut probe = self.parse_point;
        if find(buff, &mut probe, b"\r\n") == Match::NotFound {
            return Ok(false);
        }

        let mut cursor = self.parse_point;
        let method_slice = read_to(buff, &mut cursor, b" ", false)
            .ok_or_else(|| ParseError::Malformed("missing method".into()))?;
        let method = Method::parse(method_slice.resolve(buff))
            .ok_or_else(|| ParseError::Malformed("unrecognized method".into()))?;

        let uri_slice = read_to(buff, &mut cursor, b" ", false)
            .ok_or_else(|| ParseError::Malformed("missing URI".into()))?;
        let version_slice = read_to(buff, &mut cursor, b"\r\n", false)
            .ok_or_else(|| ParseError::Malformed("missing version".into()))?;

        let (path, query_params) = split_uri(buff, uri_slice);

        self.method = Some(method);
        self.uri = Some(uri_slice);
        self.path = Some(path);
        self.version = Some(version_slice);
        self.params.extend(query_params);
        self.parse_point = cursor;
        Ok(true)
    }

    fn try_parse_headers(&mut self, buff: &[u8]) -> Result<bool, ParseError> {
        loop {
            let mut blank_probe = self.parse_point;
            if is(buff, &mut blank_probe, b"\r\n") == Match::Found {
                self.parse_point = blank_probe;
                return Ok(true);
            }

            let mut line_probe = self.parse_point;
            if find(buff, &mut line_probe, b"\r\n") == Match::NotFound {
                return Ok(false);
            }

            let mut cursor = self.parse_point;
            let line = read_to(buff, &mut cursor, b"\r\n", false)
                .expect("CRLF presence already confirmed above");
            let line_bytes = line.resolve(buff);
            let colon = line_bytes
                .iter()
                .position(|&b| b == b':')
                .ok_or_else(|| ParseError::Malformed("header missing ':'".into()))?;

            let name = trim_one(buff, Slice::new(line.start, colon));
            let value_start = line.start + colon + 1;
            let value = trim_one(buff, Slice::new(value_start, line.end() - value_start));

            if casecmp(b"content-length", buff, name) {
                let text = std::str::from_utf8(value.resolve(buff))
                    .map_err(|_| ParseError::Malformed("non-UTF8 content-length".into()))?;
                self.content_length = text
                    .trim()
                    .parse()
                    .map_err(|_| ParseError::Malformed("invalid content-length".into()))?;
            }

            self.headers.push((name, value));
            self.parse_point = cursor;
        }
    }

    fn try_parse_body(&mut self, buff: &[u8]) -> Result<bool, ParseError> {
        if buff.len() - self.parse_point < self.content_length {
            return Ok(false);
        }
        let body = Slice::new(self.parse_point, self.content_length);
        self.body = Some(body);
        self.parse_point += self.content_length;

        if self.content_type_is_form_urlencoded(buff) {
            self.params
                .extend(parse_query_string(buff, body.start, body.end()));
        }
        Ok(true)
    }

    fn content_type_is_form_urlencoded(&self, buff: &[u8]) -> bool {
        self.headers.iter().any(|(name, value)| {
            casecmp(b"content-type", buff, *name)
                && casecmp(b"application/x-www-form-urlencoded", buff, *value)
        })
    }

    /// Decodes every parameter (`%XX` -> byte, `+` -> space) into owned
    /// `(name, value)` pairs. Decoding is deliberately deferred to here,
    /// not performed while scanning the query/body.
    pub fn decoded_params(&self, buff: &[u8]) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(name, value)| {
                let name = url_decode(name.resolve(buff));
                let value = value.map(|v| url_decode(v.resolve(buff))).unwrap_or_default();
                (name, value)
            })
            .collect()
    }

    pub fn header(&self, buff: &[u8], name: &[u8]) -> Option<Slice> {
        self.headers
            .iter()
            .find(|(n, _)| casecmp(name, buff, *n))
            .map(|(_, v)| *v)
    }
}

fn trim_one(buff: &[u8], slice: Slice) -> Slice {
    let mut start = slice.start;
    let mut end = slice.end();
    if end > start && (buff[start] == b' ' || buff[start] == b'\t') {
        start += 1;
    }
    if end > start && (buff[end - 1] == b' ' || buff[end - 1] == b'\t') {
        end -= 1;
    }
    Slice::new(start, end - start)
}

/// Splits a URI slice at the first `?` into `(path, query_params)`.
fn split_uri(buff: &[u8], uri: Slice) -> (Slice, Vec<RawParam>) {
    let bytes = uri.resolve(buff);
    match bytes.iter().position(|&b| b == b'?') {
        Some(q) => {
            let path = Slice::new(uri.start, q);
            let query_start = uri.start + q + 1;
            let params = parse_query_string(buff, query_start, uri.end());
            (path, params)
        }
        None => (uri, Vec::new()),
    }
}

/// Walks `name=value` pairs separated by `&` within `[start, end)`. A
/// trailing pair with no `&` runs through `end`; a bare `name` with no `=`
/// is recorded with no value.
fn parse_query_string(buff: &[u8], start: usize, end: usize) -> Vec<RawParam> {
    let mut out = Vec::new();
    let scope = &buff[..end];
    let mut offset = start;

    while offset < end {
        let mut amp_probe = offset;
        let has_amp = find(scope, &mut amp_probe, b"&") == Match::Found;
        let pair_end = if has_amp { amp_probe - 1 } else { end };

        let sub = &scope[..pair_end];
        let mut eq_probe = offset;
        if find(sub, &mut eq_probe, b"=") == Match::Found {
            let name = Slice::new(offset, eq_probe - 1 - offset);
            let value = Slice::new(eq_probe, pair_end - eq_probe);
            out.push((name, Some(value)));
        } else {
            out.push((Slice::new(offset, pair_end - offset), None));
        }

        offset = if has_amp { amp_probe } else { end };
    }
    out
}

/// `%XX` -> byte, `+` -> space, everything else passed through.
fn url_decode(bytes: &[u8]) -> String {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_get_with_query_string_in_one_call() {
        let buff = b"GET /path?a=1&b=2 HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut req = HttpRequest::new();
        assert_eq!(req.parse(buff), Ok(true));
        assert_eq!(req.method, Some(Method::Get));
        assert_eq!(req.path.unwrap().resolve(buff), b"/path");
        assert_eq!(
            req.decoded_params(buff),
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn byte_at_a_time_feed_yields_same_result_as_one_shot() {
        let full = b"GET /x HTTP/1.1\r\nHost: h\r\n\r\n".to_vec();
        let mut incremental = HttpRequest::new();
        let mut buff = Vec::new();
        let mut done = false;
        for &b in &full {
            buff.push(b);
            if incremental.parse(&buff).unwrap() {
                done = true;
                break;
            }
        }
        assert!(done);
        assert_eq!(incremental.path.unwrap().resolve(&full), b"/x");
    }

    #[test]
    fn post_with_form_body_merges_params() {
        let body = b"c=3&bare";
        let mut buff = format!(
            "POST /submit HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        buff.extend_from_slice(body);
        let mut req = HttpRequest::new();
        assert_eq!(req.parse(&buff), Ok(true));
        assert_eq!(
            req.decoded_params(&buff),
            vec![
                ("c".to_string(), "3".to_string()),
                ("bare".to_string(), "".to_string())
            ]
        );
    }

    #[test]
    fn incomplete_body_reports_not_complete() {
        let buff = b"POST /x HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        let mut req = HttpRequest::new();
        assert_eq!(req.parse(buff), Ok(false));
    }

    #[test]
    fn unrecognized_method_is_an_error() {
        let buff = b"FOO / HTTP/1.1\r\n\r\n";
        let mut req = HttpRequest::new();
        assert!(req.parse(buff).is_err());
    }

    #[test]
    fn percent_and_plus_decode_on_demand_not_during_parse() {
        let buff = b"GET /x?q=a%20b+c HTTP/1.1\r\n\r\n";
        let mut req = HttpRequest::new();
        req.parse(buff).unwrap();
        assert_eq!(req.decoded_params(buff), vec![("q".to_string(), "a b c".to_string())]);
    }
}
