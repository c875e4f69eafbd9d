//! Compact signature model for stateful detection
//!
//! The rule compiler hands the stateful engine an array of signatures,
//! each reduced to what continuation needs: a compact index, per-engine
//! match lists, an optional generic application-layer program, and
//! post-match side effects. Rule parsing lives upstream; nothing here
//! touches rule text.

pub mod matcher;

pub use matcher::{match_all, ContentMatch};

use bitflags::bitflags;

use crate::core::{Action, AppProto};

/// Compact signature index assigned by the rule compiler.
///
/// Used as an index into the engine's signature array and stored in
/// progress records; no signature body is ever copied into state.
pub type SigIntId = u32;

bitflags! {
    /// Signature attributes relevant to the stateful engine
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SignatureFlags: u8 {
        /// Suppress alert enqueue, still apply packet actions
        const NOALERT = 1 << 0;
        /// Signature asks for file storage on match
        const FILESTORE = 1 << 1;
    }
}

/// Match-list slots a signature may populate, one per inspection concern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmList {
    Uri,
    Method,
    Headers,
    Cookie,
    RequestBody,
    ResponseBody,
    Files,
    AppLayerGeneric,
    DcePayload,
}

/// File-related match condition
#[derive(Debug, Clone)]
pub enum FileMatch {
    /// File name must contain the pattern
    Name(ContentMatch),
    /// Any tracked file satisfies the condition; storage is requested
    /// through the post-match list
    Store,
}

/// One instruction of a generic application-layer match program.
///
/// These run sequentially against flow-global state (message-oriented
/// protocols without per-transaction buffers) and may suspend mid-program;
/// the resumption cursor is an index into this list, never a borrow.
#[derive(Debug, Clone)]
pub enum AppLayerOp {
    /// DCERPC bound interface UUID must equal
    DceIface([u8; 16]),
    /// DCERPC operation number must equal
    DceOpnum(u16),
    /// DCERPC stub data must contain the pattern
    DceStubContains(ContentMatch),
}

/// Side effect applied after a signature matches
#[derive(Debug, Clone)]
pub enum PostMatchOp {
    /// Set a flow variable
    SetFlowVar(String, String),
    /// Flag the transaction's files for storage
    FileStore,
}

/// A compiled signature as seen by the stateful engine
#[derive(Debug, Clone, Default)]
pub struct Signature {
    /// Compact index into the signature array; assigned at registration
    pub num: SigIntId,

    /// Rule signature id, as written in the rule
    pub sid: u32,

    /// Alert message
    pub msg: String,

    /// Application protocol this signature applies to
    pub alproto: AppProto,

    /// Attributes
    pub flags: SignatureFlags,

    /// Packet action on match
    pub action: Action,

    pub uri: Vec<ContentMatch>,
    pub method: Vec<ContentMatch>,
    pub headers: Vec<ContentMatch>,
    pub cookie: Vec<ContentMatch>,
    pub request_body: Vec<ContentMatch>,
    pub response_body: Vec<ContentMatch>,
    pub files: Vec<FileMatch>,

    /// Generic application-layer program (flow-scoped continuation)
    pub app_generic: Vec<AppLayerOp>,

    /// Single-shot DCE payload match list
    pub dce_payload: Vec<ContentMatch>,

    /// Side effects on match
    pub post_match: Vec<PostMatchOp>,
}

impl Signature {
    /// Create a signature for a protocol
    pub fn new(sid: u32, alproto: AppProto, msg: impl Into<String>) -> Self {
        Self {
            sid,
            alproto,
            msg: msg.into(),
            action: Action::Alert,
            ..Default::default()
        }
    }

    /// Whether the given match list is populated
    pub fn has_list(&self, list: SmList) -> bool {
        match list {
            SmList::Uri => !self.uri.is_empty(),
            SmList::Method => !self.method.is_empty(),
            SmList::Headers => !self.headers.is_empty(),
            SmList::Cookie => !self.cookie.is_empty(),
            SmList::RequestBody => !self.request_body.is_empty(),
            SmList::ResponseBody => !self.response_body.is_empty(),
            SmList::Files => !self.files.is_empty(),
            SmList::AppLayerGeneric => !self.app_generic.is_empty(),
            SmList::DcePayload => !self.dce_payload.is_empty(),
        }
    }

    /// Content patterns for a buffer-matching list
    pub fn contents(&self, list: SmList) -> &[ContentMatch] {
        match list {
            SmList::Uri => &self.uri,
            SmList::Method => &self.method,
            SmList::Headers => &self.headers,
            SmList::Cookie => &self.cookie,
            SmList::RequestBody => &self.request_body,
            SmList::ResponseBody => &self.response_body,
            SmList::DcePayload => &self.dce_payload,
            SmList::Files | SmList::AppLayerGeneric => &[],
        }
    }

    /// Whether this signature cares about files (name match or storage)
    pub fn is_file_interested(&self) -> bool {
        !self.files.is_empty()
    }

    // Builder-style helpers used by the rule compiler and tests.

    pub fn uri_contains(mut self, pattern: impl Into<Vec<u8>>) -> Self {
        self.uri.push(ContentMatch::new(pattern));
        self
    }

    pub fn method_is(mut self, pattern: impl Into<Vec<u8>>) -> Self {
        self.method.push(ContentMatch::new(pattern));
        self
    }

    pub fn header_contains(mut self, pattern: impl Into<Vec<u8>>) -> Self {
        self.headers.push(ContentMatch::new(pattern));
        self
    }

    pub fn cookie_contains(mut self, pattern: impl Into<Vec<u8>>) -> Self {
        self.cookie.push(ContentMatch::new(pattern));
        self
    }

    pub fn request_body_contains(mut self, pattern: impl Into<Vec<u8>>) -> Self {
        self.request_body.push(ContentMatch::new(pattern));
        self
    }

    pub fn response_body_contains(mut self, pattern: impl Into<Vec<u8>>) -> Self {
        self.response_body.push(ContentMatch::new(pattern));
        self
    }

    pub fn filename_contains(mut self, pattern: impl Into<Vec<u8>>) -> Self {
        self.files.push(FileMatch::Name(ContentMatch::new(pattern)));
        self
    }

    /// Ask for file storage: adds the file condition, the attribute bit and
    /// the post-match side effect
    pub fn filestore(mut self) -> Self {
        self.files.push(FileMatch::Store);
        self.flags |= SignatureFlags::FILESTORE;
        self.post_match.push(PostMatchOp::FileStore);
        self
    }

    pub fn app_op(mut self, op: AppLayerOp) -> Self {
        self.app_generic.push(op);
        self
    }

    pub fn dce_payload_contains(mut self, pattern: impl Into<Vec<u8>>) -> Self {
        self.dce_payload.push(ContentMatch::new(pattern));
        self
    }

    pub fn no_alert(mut self) -> Self {
        self.flags |= SignatureFlags::NOALERT;
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn set_flowvar(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.post_match
            .push(PostMatchOp::SetFlowVar(key.into(), value.into()));
        self
    }
}
