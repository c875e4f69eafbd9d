//! Inspection dispatcher
//!
//! Drives the per-signature inspection engines in a fixed order, folds
//! their verdicts into an inspect-flags bitmap, and reports whether the
//! signature alerted, can never match, or needs more data.
//!
//! Engines are registered per (protocol, direction). An engine is skipped
//! when the signature does not use its match list, or when its bit is
//! already set in the progress record being resumed.

use std::collections::HashMap;

use crate::core::{AppProto, Direction};
use crate::detect::state::InspectFlags;
use crate::protocols::http::{HttpState, REQUEST_HEADERS, RESPONSE_COMPLETE};
use crate::protocols::AppLayerState;
use crate::signatures::{match_all, FileMatch, Signature, SmList};

/// Verdict of one inspection engine for one signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineVerdict {
    /// The engine's buffer satisfied the signature
    Match,
    /// Not decidable yet; park and retry with more data
    MoreData,
    /// The signature can never match this transaction
    CantMatch,
    /// As `CantMatch`, and the signature was file-interested
    CantMatchFilestore,
}

/// Engine callback: evaluate one signature against one transaction
pub type EngineCallback =
    fn(&Signature, &dyn AppLayerState, u64, Direction) -> EngineVerdict;

/// One registered inspection engine
pub struct InspectEngine {
    pub name: &'static str,
    pub sm_list: SmList,
    pub inspect_flag: InspectFlags,
    pub callback: EngineCallback,
}

/// Inspection engines indexed by (protocol, direction), in fixed order
#[derive(Default)]
pub struct EngineTable {
    engines: HashMap<(AppProto, Direction), Vec<InspectEngine>>,
}

impl EngineTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, alproto: AppProto, direction: Direction, engine: InspectEngine) {
        self.engines
            .entry((alproto, direction))
            .or_default()
            .push(engine);
    }

    pub fn engines(&self, alproto: AppProto, direction: Direction) -> &[InspectEngine] {
        self.engines
            .get(&(alproto, direction))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The built-in HTTP engine set
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        let ts = Direction::ToServer;
        let tc = Direction::ToClient;

        table.register(AppProto::Http, ts, InspectEngine {
            name: "http_uri",
            sm_list: SmList::Uri,
            inspect_flag: InspectFlags::URI,
            callback: inspect_uri,
        });
        table.register(AppProto::Http, ts, InspectEngine {
            name: "http_method",
            sm_list: SmList::Method,
            inspect_flag: InspectFlags::METHOD,
            callback: inspect_method,
        });
        table.register(AppProto::Http, ts, InspectEngine {
            name: "http_headers",
            sm_list: SmList::Headers,
            inspect_flag: InspectFlags::HEADERS,
            callback: inspect_headers,
        });
        table.register(AppProto::Http, ts, InspectEngine {
            name: "http_cookie",
            sm_list: SmList::Cookie,
            inspect_flag: InspectFlags::COOKIE,
            callback: inspect_cookie,
        });
        table.register(AppProto::Http, ts, InspectEngine {
            name: "http_request_body",
            sm_list: SmList::RequestBody,
            inspect_flag: InspectFlags::REQUEST_BODY,
            callback: inspect_request_body,
        });
        table.register(AppProto::Http, ts, InspectEngine {
            name: "files_ts",
            sm_list: SmList::Files,
            inspect_flag: InspectFlags::FILE_TS,
            callback: inspect_files,
        });

        table.register(AppProto::Http, tc, InspectEngine {
            name: "http_response_body",
            sm_list: SmList::ResponseBody,
            inspect_flag: InspectFlags::RESPONSE_BODY,
            callback: inspect_response_body,
        });
        table.register(AppProto::Http, tc, InspectEngine {
            name: "files_tc",
            sm_list: SmList::Files,
            inspect_flag: InspectFlags::FILE_TC,
            callback: inspect_files,
        });

        table
    }
}

/// Folded result of dispatching one signature over one transaction
#[derive(Debug, Clone, Copy, Default)]
pub struct InspectOutcome {
    /// Bits accumulated this pass
    pub flags: InspectFlags,

    /// Engines that returned `Match` this pass
    pub total_matches: u32,

    /// File-interested cannot-match conclusions this pass
    pub file_no_match: u16,

    /// Every applicable engine was walked without stopping
    pub exhausted: bool,
}

impl InspectOutcome {
    /// The signature fully matched this transaction
    pub fn alert(&self) -> bool {
        self.exhausted && self.total_matches > 0
    }

    pub fn cant_match(&self) -> bool {
        self.flags.contains(InspectFlags::SIG_CANT_MATCH)
    }

    /// Something final happened: alert or cannot-match
    pub fn definitive(&self) -> bool {
        self.alert() || self.cant_match()
    }
}

/// Run the applicable engines over one transaction, skipping engines whose
/// bit is already set in `skip`
pub fn inspect_tx(
    engines: &[InspectEngine],
    sig: &Signature,
    alstate: &dyn AppLayerState,
    tx_id: u64,
    direction: Direction,
    skip: InspectFlags,
) -> InspectOutcome {
    let mut outcome = InspectOutcome::default();
    let mut stopped = false;

    for engine in engines {
        if skip.intersects(engine.inspect_flag) {
            continue;
        }
        if !sig.has_list(engine.sm_list) {
            continue;
        }
        match (engine.callback)(sig, alstate, tx_id, direction) {
            EngineVerdict::Match => {
                outcome.flags |= engine.inspect_flag;
                outcome.total_matches += 1;
            }
            EngineVerdict::CantMatch => {
                outcome.flags |= InspectFlags::SIG_CANT_MATCH | engine.inspect_flag;
                stopped = true;
                break;
            }
            EngineVerdict::CantMatchFilestore => {
                outcome.flags |= InspectFlags::SIG_CANT_MATCH | engine.inspect_flag;
                outcome.file_no_match += 1;
                stopped = true;
                break;
            }
            EngineVerdict::MoreData => {
                stopped = true;
                break;
            }
        }
    }

    outcome.exhausted = !stopped;
    if outcome.alert() || outcome.cant_match() {
        outcome.flags |= InspectFlags::FULL_INSPECT;
    }
    outcome
}

fn http_state(alstate: &dyn AppLayerState) -> Option<&HttpState> {
    alstate.as_any().downcast_ref::<HttpState>()
}

/// Cannot-match verdict, file-aware: the arbiter must learn when a
/// file-interested signature gives up, regardless of which engine
/// concluded it
fn cant_match(sig: &Signature) -> EngineVerdict {
    if sig.is_file_interested() {
        EngineVerdict::CantMatchFilestore
    } else {
        EngineVerdict::CantMatch
    }
}

fn inspect_uri(
    sig: &Signature,
    alstate: &dyn AppLayerState,
    tx_id: u64,
    _direction: Direction,
) -> EngineVerdict {
    let Some(tx) = http_state(alstate).and_then(|s| s.tx(tx_id)) else {
        return EngineVerdict::MoreData;
    };
    match &tx.uri {
        Some(uri) if match_all(sig.contents(SmList::Uri), uri) => EngineVerdict::Match,
        Some(_) => cant_match(sig),
        None if tx.request_progress >= REQUEST_HEADERS => cant_match(sig),
        None => EngineVerdict::MoreData,
    }
}

fn inspect_method(
    sig: &Signature,
    alstate: &dyn AppLayerState,
    tx_id: u64,
    _direction: Direction,
) -> EngineVerdict {
    let Some(tx) = http_state(alstate).and_then(|s| s.tx(tx_id)) else {
        return EngineVerdict::MoreData;
    };
    match &tx.method {
        Some(method) if match_all(sig.contents(SmList::Method), method) => EngineVerdict::Match,
        Some(_) => cant_match(sig),
        None if tx.request_progress >= REQUEST_HEADERS => cant_match(sig),
        None => EngineVerdict::MoreData,
    }
}

fn inspect_headers(
    sig: &Signature,
    alstate: &dyn AppLayerState,
    tx_id: u64,
    _direction: Direction,
) -> EngineVerdict {
    let Some(tx) = http_state(alstate).and_then(|s| s.tx(tx_id)) else {
        return EngineVerdict::MoreData;
    };
    if tx.request_progress <= REQUEST_HEADERS {
        // header block still open
        return EngineVerdict::MoreData;
    }
    if match_all(sig.contents(SmList::Headers), &tx.raw_headers) {
        EngineVerdict::Match
    } else {
        cant_match(sig)
    }
}

fn inspect_cookie(
    sig: &Signature,
    alstate: &dyn AppLayerState,
    tx_id: u64,
    _direction: Direction,
) -> EngineVerdict {
    let Some(tx) = http_state(alstate).and_then(|s| s.tx(tx_id)) else {
        return EngineVerdict::MoreData;
    };
    if tx.request_progress <= REQUEST_HEADERS {
        return EngineVerdict::MoreData;
    }
    match &tx.cookie {
        Some(cookie) if match_all(sig.contents(SmList::Cookie), cookie) => EngineVerdict::Match,
        _ => cant_match(sig),
    }
}

fn inspect_request_body(
    sig: &Signature,
    alstate: &dyn AppLayerState,
    tx_id: u64,
    _direction: Direction,
) -> EngineVerdict {
    let Some(tx) = http_state(alstate).and_then(|s| s.tx(tx_id)) else {
        return EngineVerdict::MoreData;
    };
    if !tx.request_complete() {
        return EngineVerdict::MoreData;
    }
    if match_all(sig.contents(SmList::RequestBody), &tx.request_body) {
        EngineVerdict::Match
    } else {
        cant_match(sig)
    }
}

fn inspect_response_body(
    sig: &Signature,
    alstate: &dyn AppLayerState,
    tx_id: u64,
    _direction: Direction,
) -> EngineVerdict {
    let Some(tx) = http_state(alstate).and_then(|s| s.tx(tx_id)) else {
        return EngineVerdict::MoreData;
    };
    if tx.response_progress < RESPONSE_COMPLETE {
        return EngineVerdict::MoreData;
    }
    if match_all(sig.contents(SmList::ResponseBody), &tx.response_body) {
        EngineVerdict::Match
    } else {
        cant_match(sig)
    }
}

/// File inspection, shared by both directions: name conditions must be
/// satisfied by some tracked file; storage conditions are satisfied by
/// any file existing at all
fn inspect_files(
    sig: &Signature,
    alstate: &dyn AppLayerState,
    tx_id: u64,
    direction: Direction,
) -> EngineVerdict {
    let Some(files) = alstate.tx_files(tx_id, direction) else {
        return EngineVerdict::MoreData;
    };
    let tx_done = alstate
        .tx_progress(tx_id, direction)
        .map(|p| p >= alstate.completion_status(direction))
        .unwrap_or(false);

    if files.is_empty() {
        return if tx_done {
            cant_match(sig)
        } else {
            EngineVerdict::MoreData
        };
    }

    let satisfied = sig.files.iter().all(|fm| match fm {
        FileMatch::Name(cm) => files.iter().any(|f| cm.matches(&f.name)),
        FileMatch::Store => true,
    });

    if satisfied {
        EngineVerdict::Match
    } else if files.all_closed() && tx_done {
        cant_match(sig)
    } else {
        EngineVerdict::MoreData
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AppProto;
    use crate::signatures::Signature;

    fn http_with_request(fragments: &[&[u8]]) -> HttpState {
        let mut http = HttpState::new();
        for frag in fragments {
            http.request_data(frag);
        }
        http
    }

    #[test]
    fn test_engine_table_order() {
        let table = EngineTable::with_defaults();
        let names: Vec<&str> = table
            .engines(AppProto::Http, Direction::ToServer)
            .iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(
            names,
            [
                "http_uri",
                "http_method",
                "http_headers",
                "http_cookie",
                "http_request_body",
                "files_ts"
            ]
        );
    }

    #[test]
    fn test_fold_stops_on_more_data() {
        let table = EngineTable::with_defaults();
        let http = http_with_request(&[b"POST / HTTP/1.0\r\n"]);
        let sig = Signature::new(1, AppProto::Http, "r")
            .method_is("POST")
            .header_contains("Mozilla");

        let outcome = inspect_tx(
            table.engines(AppProto::Http, Direction::ToServer),
            &sig,
            &http,
            0,
            Direction::ToServer,
            InspectFlags::empty(),
        );

        // method decided, headers pending
        assert!(outcome.flags.contains(InspectFlags::METHOD));
        assert!(!outcome.exhausted);
        assert!(!outcome.definitive());
        assert_eq!(outcome.total_matches, 1);
    }

    #[test]
    fn test_fold_alert_on_exhaustion() {
        let table = EngineTable::with_defaults();
        let http = http_with_request(&[
            b"POST / HTTP/1.0\r\n",
            b"User-Agent: Mozilla/1.0\r\n",
            b"Cookie: dummy\r\n\r\n",
        ]);
        let sig = Signature::new(1, AppProto::Http, "r")
            .method_is("POST")
            .header_contains("Mozilla")
            .cookie_contains("dummy");

        let outcome = inspect_tx(
            table.engines(AppProto::Http, Direction::ToServer),
            &sig,
            &http,
            0,
            Direction::ToServer,
            InspectFlags::empty(),
        );

        assert!(outcome.alert());
        assert!(outcome.flags.contains(InspectFlags::FULL_INSPECT));
        assert_eq!(outcome.total_matches, 3);
    }

    #[test]
    fn test_fold_cant_match_stops_early() {
        let table = EngineTable::with_defaults();
        let http = http_with_request(&[b"POST / HTTP/1.0\r\n"]);
        let sig = Signature::new(1, AppProto::Http, "r")
            .method_is("GET")
            .header_contains("Firefox");

        let outcome = inspect_tx(
            table.engines(AppProto::Http, Direction::ToServer),
            &sig,
            &http,
            0,
            Direction::ToServer,
            InspectFlags::empty(),
        );

        assert!(outcome.cant_match());
        assert!(outcome.flags.contains(InspectFlags::METHOD));
        assert!(outcome.flags.contains(InspectFlags::FULL_INSPECT));
        assert!(!outcome.alert());
        assert_eq!(outcome.file_no_match, 0);
    }

    #[test]
    fn test_file_interested_cant_match_counts() {
        let table = EngineTable::with_defaults();
        let http = http_with_request(&[b"POST /upload.cgi HTTP/1.0\r\n"]);
        let sig = Signature::new(1, AppProto::Http, "r")
            .method_is("GET")
            .filestore();

        let outcome = inspect_tx(
            table.engines(AppProto::Http, Direction::ToServer),
            &sig,
            &http,
            0,
            Direction::ToServer,
            InspectFlags::empty(),
        );

        assert!(outcome.cant_match());
        assert_eq!(outcome.file_no_match, 1);
    }

    #[test]
    fn test_skip_flags_prevent_rerun() {
        // engines already decided are not re-entered
        let table = EngineTable::with_defaults();
        let http = http_with_request(&[
            b"POST / HTTP/1.0\r\n",
            b"Cookie: dummy\r\n\r\n",
        ]);
        // method list would fail, but its bit is already set
        let sig = Signature::new(1, AppProto::Http, "r")
            .method_is("GET")
            .cookie_contains("dummy");

        let outcome = inspect_tx(
            table.engines(AppProto::Http, Direction::ToServer),
            &sig,
            &http,
            0,
            Direction::ToServer,
            InspectFlags::METHOD,
        );

        assert!(outcome.alert());
        assert_eq!(outcome.total_matches, 1);
    }
}
