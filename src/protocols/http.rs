//! HTTP application-layer state
//!
//! Incremental HTTP/1.x request parsing into numbered transactions. Data
//! arrives in arbitrary fragments; a request line, its headers, and its
//! body may each span several packets, and pipelined requests open new
//! transactions on the same flow. Multipart bodies are scanned for file
//! parts so file-interested signatures can be evaluated.
//!
//! Only what detection inspects is kept: method, URI, raw header lines,
//! cookie, body bytes, and per-direction file containers.

use std::any::Any;

use tracing::trace;

use crate::core::{AppProto, Direction};
use crate::detect::state::TxDetectState;
use crate::error::{DetectError, Result};
use crate::files::FileContainer;
use crate::signatures::matcher::find_bytes;

use super::AppLayerState;

/// Request-side parse progress
pub const REQUEST_STARTED: u8 = 0;
pub const REQUEST_HEADERS: u8 = 1;
pub const REQUEST_BODY: u8 = 2;
pub const REQUEST_COMPLETE: u8 = 3;

/// Response-side parse progress
pub const RESPONSE_STARTED: u8 = 0;
pub const RESPONSE_COMPLETE: u8 = 1;

/// One request/response pair
#[derive(Debug, Default)]
pub struct HttpTransaction {
    pub id: u64,

    pub method: Option<Vec<u8>>,
    pub uri: Option<Vec<u8>>,

    /// Raw `Name: value` header lines, as seen on the wire
    pub raw_headers: Vec<u8>,

    pub cookie: Option<Vec<u8>>,

    pub request_body: Vec<u8>,
    pub response_body: Vec<u8>,

    pub request_progress: u8,
    pub response_progress: u8,

    pub files_ts: FileContainer,
    pub files_tc: FileContainer,

    /// Detect state parked on this transaction, if any
    pub detect_state: Option<TxDetectState>,

    content_length: Option<usize>,
    body_received: usize,

    /// Multipart file parts already opened
    parts_seen: usize,
}

impl HttpTransaction {
    fn new(id: u64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn request_complete(&self) -> bool {
        self.request_progress >= REQUEST_COMPLETE
    }

    fn finish_request(&mut self) {
        self.request_progress = REQUEST_COMPLETE;
        self.files_ts.close_all();
    }

    /// Scan the body for multipart file parts; returns true when a new
    /// file was opened
    fn scan_multipart(&mut self) -> bool {
        const MARKER: &[u8] = b"filename=\"";

        let mut found = 0usize;
        let mut opened = false;
        let mut search = 0usize;

        while let Some(pos) = find_bytes(&self.request_body[search..], MARKER) {
            let name_start = search + pos + MARKER.len();
            let Some(name_len) = find_bytes(&self.request_body[name_start..], b"\"") else {
                break;
            };
            found += 1;
            if found > self.parts_seen {
                let name = self.request_body[name_start..name_start + name_len].to_vec();
                trace!(tx_id = self.id, "multipart file part: {}", String::from_utf8_lossy(&name));
                self.files_ts.start_file(name);
                self.parts_seen = found;
                opened = true;
            }
            search = name_start + name_len;
        }

        if opened {
            if let Some(state) = self.detect_state.as_mut() {
                state.set_file_new(Direction::ToServer);
            }
        }
        opened
    }
}

/// Per-flow HTTP state
#[derive(Debug, Default)]
pub struct HttpState {
    txs: Vec<HttpTransaction>,

    inspect_id: [u64; 2],
    alversion: [u16; 2],

    /// Unconsumed request-side bytes
    req_buf: Vec<u8>,

    /// Any request byte has been seen; before that the state is not
    /// inspectable
    started: bool,
}

impl HttpState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tx(&self, tx_id: u64) -> Option<&HttpTransaction> {
        self.txs.get(tx_id as usize)
    }

    pub fn tx_mut(&mut self, tx_id: u64) -> Option<&mut HttpTransaction> {
        self.txs.get_mut(tx_id as usize)
    }

    fn bump_version(&mut self, direction: Direction) {
        self.alversion[direction.index()] = self.alversion[direction.index()].wrapping_add(1);
    }

    /// Feed request-side bytes
    pub fn request_data(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.started = true;
        self.req_buf.extend_from_slice(data);
        self.parse_requests();
        self.bump_version(Direction::ToServer);
    }

    /// Feed response-side bytes; responses are attached whole to the
    /// transaction awaiting one
    pub fn response_data(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let tx = match self
            .txs
            .iter_mut()
            .find(|tx| tx.response_progress < RESPONSE_COMPLETE)
        {
            Some(tx) => tx,
            None => {
                let id = self.txs.len() as u64;
                self.txs.push(HttpTransaction::new(id));
                self.txs.last_mut().expect("just pushed")
            }
        };
        tx.response_body.extend_from_slice(data);
        tx.response_progress = RESPONSE_COMPLETE;
        tx.files_tc.close_all();
        self.bump_version(Direction::ToClient);
    }

    fn parse_requests(&mut self) {
        loop {
            let need_new_tx = self
                .txs
                .last()
                .map(|tx| tx.request_complete())
                .unwrap_or(true);
            if need_new_tx {
                if self.req_buf.is_empty() {
                    break;
                }
                let id = self.txs.len() as u64;
                trace!(tx_id = id, "new http transaction");
                self.txs.push(HttpTransaction::new(id));
            }

            let tx = self.txs.last_mut().expect("transaction exists");
            match tx.request_progress {
                REQUEST_STARTED => {
                    let Some(line) = take_line(&mut self.req_buf) else {
                        break;
                    };
                    let text = String::from_utf8_lossy(&line);
                    let mut parts = text.split_whitespace();
                    tx.method = parts.next().map(|s| s.as_bytes().to_vec());
                    tx.uri = parts.next().map(|s| s.as_bytes().to_vec());
                    tx.request_progress = REQUEST_HEADERS;
                }
                REQUEST_HEADERS => {
                    let Some(line) = take_line(&mut self.req_buf) else {
                        break;
                    };
                    if line.is_empty() {
                        // end of headers
                        if tx.content_length.unwrap_or(0) > 0 {
                            tx.request_progress = REQUEST_BODY;
                        } else {
                            tx.finish_request();
                        }
                        continue;
                    }
                    tx.raw_headers.extend_from_slice(&line);
                    tx.raw_headers.extend_from_slice(b"\r\n");

                    if let Some(colon) = line.iter().position(|&b| b == b':') {
                        let name = String::from_utf8_lossy(&line[..colon])
                            .trim()
                            .to_lowercase();
                        let value = &line[colon + 1..];
                        let value: &[u8] = trim_bytes(value);
                        match name.as_str() {
                            "cookie" => tx.cookie = Some(value.to_vec()),
                            "content-length" => {
                                tx.content_length =
                                    String::from_utf8_lossy(value).trim().parse().ok();
                            }
                            _ => {}
                        }
                    }
                }
                REQUEST_BODY => {
                    if self.req_buf.is_empty() {
                        break;
                    }
                    let want = tx.content_length.unwrap_or(0) - tx.body_received;
                    let take = want.min(self.req_buf.len());
                    tx.request_body.extend(self.req_buf.drain(..take));
                    tx.body_received += take;

                    tx.scan_multipart();
                    if let Some(file) = tx.files_ts.current_mut() {
                        file.append(take as u64);
                    }

                    if tx.body_received >= tx.content_length.unwrap_or(0) {
                        tx.finish_request();
                    }
                }
                _ => break,
            }
        }
    }
}

impl AppLayerState for HttpState {
    fn alproto(&self) -> AppProto {
        AppProto::Http
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn state_valid(&self) -> bool {
        self.started
    }

    fn supports_txs(&self) -> bool {
        true
    }

    fn alversion(&self, direction: Direction) -> u16 {
        self.alversion[direction.index()]
    }

    fn tx_count(&self) -> u64 {
        self.txs.len() as u64
    }

    fn inspect_id(&self, direction: Direction) -> u64 {
        self.inspect_id[direction.index()]
    }

    fn set_inspect_id(&mut self, direction: Direction) {
        let completion = self.completion_status(direction);
        let mut id = self.inspect_id[direction.index()];
        while (id as usize) < self.txs.len() {
            match self.tx_progress(id, direction) {
                Some(progress) if progress >= completion => id += 1,
                _ => break,
            }
        }
        self.inspect_id[direction.index()] = id;
    }

    fn tx_progress(&self, tx_id: u64, direction: Direction) -> Option<u8> {
        let tx = self.tx(tx_id)?;
        Some(match direction {
            Direction::ToServer => tx.request_progress,
            Direction::ToClient => tx.response_progress,
        })
    }

    fn completion_status(&self, direction: Direction) -> u8 {
        match direction {
            Direction::ToServer => REQUEST_COMPLETE,
            Direction::ToClient => RESPONSE_COMPLETE,
        }
    }

    fn tx_detect_state(&self, tx_id: u64) -> Option<&TxDetectState> {
        self.tx(tx_id)?.detect_state.as_ref()
    }

    fn tx_detect_state_mut(&mut self, tx_id: u64) -> Option<&mut TxDetectState> {
        self.tx_mut(tx_id)?.detect_state.as_mut()
    }

    fn attach_tx_detect_state(&mut self, tx_id: u64, state: TxDetectState) -> Result<()> {
        let tx = self
            .tx_mut(tx_id)
            .ok_or(DetectError::StateAttach(tx_id))?;
        tx.detect_state = Some(state);
        Ok(())
    }

    fn tx_files(&self, tx_id: u64, direction: Direction) -> Option<&FileContainer> {
        let tx = self.tx(tx_id)?;
        Some(match direction {
            Direction::ToServer => &tx.files_ts,
            Direction::ToClient => &tx.files_tc,
        })
    }

    fn tx_files_mut(&mut self, tx_id: u64, direction: Direction) -> Option<&mut FileContainer> {
        let tx = self.tx_mut(tx_id)?;
        Some(match direction {
            Direction::ToServer => &mut tx.files_ts,
            Direction::ToClient => &mut tx.files_tc,
        })
    }
}

/// Take one CRLF-terminated line off the front of the buffer
fn take_line(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let pos = find_bytes(buf, b"\r\n")?;
    let line = buf[..pos].to_vec();
    buf.drain(..pos + 2);
    Some(line)
}

fn trim_bytes(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}
