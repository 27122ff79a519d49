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

//! Variable-length record ring buffer with oldest-first eviction (4.5).
//! Direct port of the write/evict/wrap algorithm in `iw_syslog.c`; records
//! never wrap across the buffer end — a zero sentinel marks "restart at
//! buffer start" instead.

const HDR_LEN: usize = 4 + 8; // u32 length + i64 microsecond timestamp

pub struct LogRecord {
    pub timestamp_micros: i64,
    pub payload: Vec<u8>,
}

pub struct LogRing {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    first_msg: bool,
}

impl LogRing {
    pub fn new(size: usize) -> Self {
        let size = if size == 0 { 10_000 } else { size };
        Self {
            buf: vec![0u8; size],
            read_pos: 0,
            write_pos: 0,
            first_msg: true,
        }
    }

    fn buff_end(&self) -> usize {
        self.buf.len()
    }

    /// Tries to place a record at `start` within `avail` bytes. On success
    /// returns the total record length written; `None` means "didn't fit,
    /// caller must make room and retry".
    fn try_write_entry(
        &mut self,
        start: usize,
        avail: usize,
        timestamp_micros: i64,
        payload: &[u8],
    ) -> Option<usize> {
        let body_avail = avail.saturating_sub(HDR_LEN);
        let needed_body = payload.len() + 1; // + NUL terminator
        if needed_body > body_avail {
            return None;
        }
        let total = HDR_LEN + needed_body;
        self.buf[start..start + 4].copy_from_slice(&(total as u32).to_be_bytes());
        self.buf[start + 4..start + 12].copy_from_slice(&timestamp_micros.to_be_bytes());
        self.buf[start + 12..start + 12 + payload.len()].copy_from_slice(payload);
        self.buf[start + 12 + payload.len()] = 0;
        Some(total)
    }

    /// Appends a formatted log message. Drops it silently (logged at the
    /// ambient `tracing::warn!` level) if it can never fit.
    pub fn write(&mut self, timestamp_micros: i64, payload: &[u8]) {
        let buff_end = self.buff_end();
        let remainder = if self.write_pos > self.read_pos || self.first_msg {
            buff_end - self.write_pos
        } else {
            self.read_pos - self.write_pos
        };

        if let Some(len) = self.try_write_entry(self.write_pos, remainder, timestamp_micros, payload) {
            self.first_msg = false;
            self.write_pos += len;
            return;
        }

        let needed = HDR_LEN + payload.len() + 1;
        if needed >= self.buf.len() {
            tracing::warn!(len = needed, "log ring: message too large to fit in buffer");
            return;
        }

        if self.write_pos + needed > buff_end {
            let sentinel_len = (buff_end - self.write_pos).min(4);
            for b in &mut self.buf[self.write_pos..self.write_pos + sentinel_len] {
                *b = 0;
            }
            self.write_pos = 0;
            self.read_pos = 0;
        }

        while self.read_pos - self.write_pos < needed {
            if self.read_pos + 4 > buff_end {
                self.read_pos = 0;
                break;
            }
            let msg_len =
                u32::from_be_bytes(self.buf[self.read_pos..self.read_pos + 4].try_into().unwrap())
                    as usize;
            if msg_len == 0 {
                self.read_pos = 0;
                break;
            }
            if self.read_pos + msg_len <= buff_end {
                self.read_pos += msg_len;
            } else {
                break;
            }
        }

        let remainder = if self.read_pos == 0 {
            buff_end - self.write_pos
        } else {
            self.read_pos - self.write_pos
        };

        if let Some(len) = self.try_write_entry(self.write_pos, remainder, timestamp_micros, payload) {
            self.first_msg = false;
            self.write_pos += len;
        }
    }

    /// All live records, oldest first. Mirrors `iw_syslog_display`'s
    /// one-or-two-pass walk.
    pub fn records(&self) -> Vec<LogRecord> {
        let mut out = Vec::new();
        let buff_end = self.buff_end();
        let passes = if self.read_pos > 0 { 2 } else { 1 };
        let mut ptr = self.read_pos;

        for _ in 0..passes {
            let end = if self.write_pos > ptr {
                self.write_pos
            } else {
                buff_end
            };
            while ptr + HDR_LEN < end {
                let length =
                    u32::from_be_bytes(self.buf[ptr..ptr + 4].try_into().unwrap()) as usize;
                if length == 0 {
                    break;
                }
                let start = ptr;
                let timestamp_micros =
                    i64::from_be_bytes(self.buf[ptr + 4..ptr + 12].try_into().unwrap());
                let payload_end = start + length - 1; // exclude the trailing NUL
                let payload = self.buf[start + 12..payload_end].to_vec();
                out.push(LogRecord {
                    timestamp_micros,
                    payload,
                });
                ptr = start + length;
            }
            ptr = 0;
        }
        out
    }

    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.first_msg = true;
        self.buf.iter_mut().for_each(|b| *b = 0);
    }

    /// `LOG: [YYYY-MM-DD HH:MM:SS.uuuuuu] <payload>\n` per record, or a
    /// single `<no messages>\n` line when empty (section 6).
    pub fn dump(&self) -> String {
        let records = self.records();
        if records.is_empty() {
            return "<no messages>\n".to_string();
        }
        let mut out = String::new();
        for r in records {
            let ts = chrono::DateTime::from_timestamp_micros(r.timestamp_micros)
                .unwrap_or_default()
                .format("%Y-%m-%d %H:%M:%S%.6f");
            out.push_str(&format!(
                "LOG: [{}] {}\n",
                ts,
                String::from_utf8_lossy(&r.payload)
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn oldest_record_evicted_when_ring_holds_exactly_three() {
        let record_size = HDR_LEN + "A1".len() + 1;
        let mut ring = LogRing::new(record_size * 3);
        for payload in ["A1", "A2", "A3", "A4"] {
            ring.write(0, payload.as_bytes());
        }
        let got: Vec<String> = ring
            .records()
            .into_iter()
            .map(|r| String::from_utf8(r.payload).unwrap())
            .collect();
        assert_eq!(got, vec!["A2", "A3", "A4"]);
    }

    #[test]
    fn oversized_record_is_dropped_and_ring_unchanged() {
        let mut ring = LogRing::new(32);
        ring.write(0, b"fits");
        let before = ring.records().len();
        ring.write(0, &vec![b'x'; 1000]);
        assert_eq!(ring.records().len(), before);
    }

    #[test]
    fn clear_empties_the_ring() {
        let mut ring = LogRing::new(128);
        ring.write(0, b"hello");
        ring.clear();
        assert!(ring.records().is_empty());
        assert_eq!(ring.dump(), "<no messages>\n");
    }

    #[test]
    fn partial_overflow_matches_documented_scenario() {
        let record_size = HDR_LEN + 3 + 1; // 3-byte payloads
        let mut ring = LogRing::new(record_size * 3);
        for p in [
            "XA1", "XA2", "XA3", "XA4", "XA5", "XA6", "X1_", "X2_", "X3_", "XB1", "XB2", "XB3",
        ] {
            ring.write(0, p.as_bytes());
        }
        let got: Vec<String> = ring
            .records()
            .into_iter()
            .map(|r| String::from_utf8(r.payload).unwrap())
            .collect();
        assert_eq!(got, vec!["XB1", "XB2", "XB3"]);
    }
}
