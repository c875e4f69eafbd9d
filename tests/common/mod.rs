//! Shared test harness: drives packets through the parser and the
//! start/continue paths the way the enclosing engine does per packet.
#![allow(dead_code)]

use sigflow::detect::InspectableState;
use sigflow::files::StoreVerdict;
use sigflow::protocols::{AppLayerState, HttpState};
use sigflow::{
    AppProto, DetectConfig, DetectEngine, Direction, Flow, Packet, PacketAlert, Signature,
    ThreadCtx,
};

pub struct Harness {
    pub engine: DetectEngine,
    pub thread: ThreadCtx,
    pub flow: Flow,
}

impl Harness {
    pub fn http(sigs: Vec<Signature>) -> Self {
        let mut engine = DetectEngine::new(DetectConfig::default());
        for sig in sigs {
            engine.add_signature(sig);
        }
        let thread = engine.thread_ctx();
        let mut flow = Flow::new(1, AppProto::Http);
        flow.set_alstate(Box::new(HttpState::new()));
        Self {
            engine,
            thread,
            flow,
        }
    }

    /// One packet: parse, short-circuit check, continue parked records,
    /// then offer every signature that may still produce state to the
    /// start path, and finally advance the inspect cursor.
    pub fn packet(&mut self, direction: Direction, data: &[u8]) -> Vec<PacketAlert> {
        {
            let alstate = self.flow.alstate_mut().expect("http state");
            let http = alstate
                .as_any_mut()
                .downcast_mut::<HttpState>()
                .expect("http state");
            match direction {
                Direction::ToServer => http.request_data(data),
                Direction::ToClient => http.response_data(data),
            }
        }
        let alversion = self.flow.alstate().expect("http state").alversion(direction);

        self.thread.reset_for_packet();
        let mut packet = Packet::new(self.flow.id, direction, data.to_vec());

        if self
            .engine
            .has_inspectable_state(&self.flow, direction, alversion)
            == InspectableState::NewState
        {
            self.engine.continue_detection(
                &mut self.thread,
                &mut self.flow,
                &mut packet,
                direction,
                alversion,
            );
        }

        for num in 0..self.engine.sig_count() as u32 {
            if !self.thread.has_new_state(num) {
                continue;
            }
            self.engine
                .start_detection(
                    &mut self.thread,
                    &mut self.flow,
                    &mut packet,
                    num,
                    direction,
                    alversion,
                )
                .expect("start detection");
        }

        self.engine.update_inspect_tx_id(&mut self.flow, direction);
        self.thread.alerts.drain()
    }

    /// Store verdicts of the files of one transaction, to-server side
    pub fn file_verdicts(&self, tx_id: u64) -> Vec<StoreVerdict> {
        self.flow
            .alstate()
            .and_then(|s| s.tx_files(tx_id, Direction::ToServer))
            .map(|files| files.iter().map(|f| f.store).collect())
            .unwrap_or_default()
    }
}

/// A complete multipart upload request, as one byte vector
pub fn upload_request() -> Vec<u8> {
    let body = b"-----------------------------277531038314945\r\n\
        Content-Disposition: form-data; name=\"uploadfile_0\"; filename=\"somepicture1.jpg\"\r\n\
        Content-Type: image/jpeg\r\n\r\n\
        filecontent\r\n\
        -----------------------------277531038314945--"
        .to_vec();
    let mut request = format!(
        "POST /upload.cgi HTTP/1.1\r\nHost: www.server.lan\r\n\
         Content-Type: multipart/form-data; boundary=---------------------------277531038314945\r\n\
         Content-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(&body);
    request
}
