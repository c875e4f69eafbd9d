//! End-to-end continuation scenarios over fragmented HTTP traffic

mod common;

use common::{upload_request, Harness};
use sigflow::files::StoreVerdict;
use sigflow::protocols::AppLayerState;
use sigflow::{AlertFlags, AppProto, Direction, Signature};

const TS: Direction = Direction::ToServer;

#[test]
fn header_and_cookie_arrive_late() {
    let mut h = Harness::http(vec![Signature::new(1, AppProto::Http, "post mozilla dummy")
        .method_is("POST")
        .header_contains("Mozilla")
        .cookie_contains("dummy")]);

    assert!(h.packet(TS, b"POST / HTTP/1.0\r\n").is_empty());
    assert!(h.packet(TS, b"User-Agent: Mozilla/1.0\r\n").is_empty());

    let alerts = h.packet(TS, b"Cookie: dummy\r\nContent-Length: 10\r\n\r\n");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].sid, 1);
    assert!(alerts[0].flags.contains(AlertFlags::STATE_MATCH));
    assert!(alerts[0].flags.contains(AlertFlags::TX));
    assert_eq!(alerts[0].tx_id, 0);

    // body completes the transaction without re-alerting
    assert!(h.packet(TS, b"Http Body!").is_empty());
}

#[test]
fn pipelined_requests_alert_independently() {
    let mut h = Harness::http(vec![
        Signature::new(1, AppProto::Http, "post mozilla dummy")
            .method_is("POST")
            .header_contains("Mozilla")
            .cookie_contains("dummy"),
        Signature::new(2, AppProto::Http, "get firefox dummy2")
            .method_is("GET")
            .header_contains("Firefox")
            .cookie_contains("dummy2"),
    ]);

    // first request: rule 1 fires on the cookie packet
    assert!(h.packet(TS, b"POST / HTTP/1.0\r\n").is_empty());
    assert!(h.packet(TS, b"User-Agent: Mozilla/1.0\r\n").is_empty());
    let alerts = h.packet(TS, b"Cookie: dummy\r\nContent-Length: 10\r\n\r\n");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].sid, 1);
    assert!(h.packet(TS, b"Http Body!").is_empty());

    // pipelined second request: only rule 2, only on the final packet
    assert!(h.packet(TS, b"GET /?var=val HTTP/1.1\r\n").is_empty());
    assert!(h.packet(TS, b"User-Agent: Firefox/1.0\r\n").is_empty());
    let alerts = h.packet(
        TS,
        b"Cookie: dummy2\r\nContent-Length: 10\r\n\r\nHttp Body!",
    );
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].sid, 2);
    assert_eq!(alerts[0].tx_id, 1);
}

#[test]
fn upload_with_filestore_marks_file_for_storing() {
    let mut h = Harness::http(vec![Signature::new(1, AppProto::Http, "upload filestore")
        .method_is("POST")
        .uri_contains("upload.cgi")
        .filestore()]);

    let alerts = h.packet(TS, &upload_request());
    assert_eq!(alerts.len(), 1);
    assert_eq!(h.file_verdicts(0), vec![StoreVerdict::Store]);
}

#[test]
fn negative_method_rules_out_storage() {
    let mut h = Harness::http(vec![Signature::new(1, AppProto::Http, "get filestore")
        .method_is("GET")
        .uri_contains("upload.cgi")
        .filestore()]);

    let alerts = h.packet(TS, &upload_request());
    assert!(alerts.is_empty());
    assert_eq!(h.file_verdicts(0), vec![StoreVerdict::NoStore]);
}

#[test]
fn filename_mismatch_rules_out_storage() {
    let mut h = Harness::http(vec![Signature::new(1, AppProto::Http, "wrong name")
        .method_is("GET")
        .uri_contains("upload.cgi")
        .filename_contains("nomatch")]);

    let alerts = h.packet(TS, &upload_request());
    assert!(alerts.is_empty());
    assert_eq!(h.file_verdicts(0), vec![StoreVerdict::NoStore]);
}

#[test]
fn file_spanning_packets_is_not_stored() {
    let mut h = Harness::http(vec![Signature::new(1, AppProto::Http, "get filestore")
        .method_is("GET")
        .uri_contains("upload.cgi")
        .filestore()]);

    let request = upload_request();
    // split between the HTTP headers and the multipart body
    let split = request.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;

    assert!(h.packet(TS, &request[..split]).is_empty());
    assert!(h.packet(TS, &request[split..]).is_empty());

    assert!(h
        .file_verdicts(0)
        .iter()
        .all(|v| *v != StoreVerdict::Store));
}

#[test]
fn short_circuit_pass_changes_nothing() {
    let mut h = Harness::http(vec![Signature::new(1, AppProto::Http, "pending")
        .method_is("POST")
        .cookie_contains("dummy")]);

    assert!(h.packet(TS, b"POST / HTTP/1.0\r\n").is_empty());

    // an unchanged pass: same version, no new parse results
    let alversion = h.flow.alstate().unwrap().alversion(TS);
    assert_eq!(
        h.engine.has_inspectable_state(&h.flow, TS, alversion),
        sigflow::detect::InspectableState::Unchanged
    );

    let record_before = h
        .flow
        .alstate()
        .unwrap()
        .tx_detect_state(0)
        .unwrap()
        .dir(TS)
        .store
        .get(0)
        .copied()
        .unwrap();

    let mut packet = sigflow::Packet::new(1, TS, b"".to_vec());
    h.thread.reset_for_packet();
    h.engine
        .continue_detection(&mut h.thread, &mut h.flow, &mut packet, TS, alversion);

    let record_after = h
        .flow
        .alstate()
        .unwrap()
        .tx_detect_state(0)
        .unwrap()
        .dir(TS)
        .store
        .get(0)
        .copied()
        .unwrap();

    assert_eq!(record_before, record_after);
    assert!(h.thread.alerts.is_empty());
}

#[test]
fn storage_decision_is_terminal() {
    let mut h = Harness::http(vec![Signature::new(1, AppProto::Http, "get filestore")
        .method_is("GET")
        .uri_contains("upload.cgi")
        .filestore()]);

    let request = upload_request();
    let split = request.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;

    // headers alone are enough for the arbiter to give up on storage
    assert!(h.packet(TS, &request[..split]).is_empty());

    // the file arriving afterwards is born no-store
    assert!(h.packet(TS, &request[split..]).is_empty());
    assert_eq!(h.file_verdicts(0), vec![StoreVerdict::NoStore]);

    let state = h.flow.alstate().unwrap().tx_detect_state(0).unwrap();
    assert!(state
        .dir(TS)
        .flags
        .contains(sigflow::detect::DirStateFlags::FILE_STORE_DISABLED));
}

#[test]
fn response_body_rule_fires_on_response() {
    let mut h = Harness::http(vec![Signature::new(1, AppProto::Http, "response body")
        .response_body_contains("secret")]);

    assert!(h.packet(TS, b"GET / HTTP/1.0\r\n\r\n").is_empty());
    let alerts = h.packet(
        Direction::ToClient,
        b"HTTP/1.0 200 OK\r\n\r\nthe secret payload",
    );
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].sid, 1);
}
