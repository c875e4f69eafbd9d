//! Progress records and their chunked stores
//!
//! A signature that could not be decided on one packet parks a progress
//! record here and is resumed on later packets of the same flow. Records
//! are kept in append-only chunked stores, one per direction, attached
//! either to a transaction or to the flow itself (legacy generic matchers).

use bitflags::bitflags;

use crate::core::Direction;
use crate::signatures::SigIntId;

/// Records per chunk. Appends allocate a chunk every `CHUNK_SIZE` records,
/// keeping per-record overhead small on the packet hot path.
pub const CHUNK_SIZE: usize = 15;

bitflags! {
    /// Accumulated inspection progress of one signature on one
    /// transaction (or flow) in one direction.
    ///
    /// One bit per inspection engine, set when that engine returned a
    /// decisive verdict, plus the two terminal bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InspectFlags: u32 {
        const URI = 1 << 0;
        const METHOD = 1 << 1;
        const HEADERS = 1 << 2;
        const COOKIE = 1 << 3;
        const REQUEST_BODY = 1 << 4;
        const RESPONSE_BODY = 1 << 5;
        const FILE_TS = 1 << 6;
        const FILE_TC = 1 << 7;
        const GENERIC = 1 << 8;

        /// At least one engine concluded the signature cannot match
        const SIG_CANT_MATCH = 1 << 14;
        /// Every engine the signature uses has been decided
        const FULL_INSPECT = 1 << 15;
    }
}

impl InspectFlags {
    /// The per-direction file inspection bits
    pub const FILE_BITS: InspectFlags = InspectFlags::FILE_TS.union(InspectFlags::FILE_TC);

    /// File inspection bit for a direction
    pub fn file_bit(direction: Direction) -> InspectFlags {
        match direction {
            Direction::ToServer => InspectFlags::FILE_TS,
            Direction::ToClient => InspectFlags::FILE_TC,
        }
    }
}

bitflags! {
    /// Per-direction state flags, kept next to the record store
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DirStateFlags: u8 {
        /// A new to-server file arrived since records were last evaluated
        const FILE_TS_NEW = 1 << 0;
        /// A new to-client file arrived since records were last evaluated
        const FILE_TC_NEW = 1 << 1;
        /// File storage has been ruled out for this transaction/direction
        const FILE_STORE_DISABLED = 1 << 2;
    }
}

impl DirStateFlags {
    /// New-file flag for a direction
    pub fn file_new_bit(direction: Direction) -> DirStateFlags {
        match direction {
            Direction::ToServer => DirStateFlags::FILE_TS_NEW,
            Direction::ToClient => DirStateFlags::FILE_TC_NEW,
        }
    }
}

/// Transaction-scoped progress record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredSig {
    pub sid: SigIntId,
    pub flags: InspectFlags,
}

/// Flow-scoped progress record, for generic application-layer programs.
///
/// `cursor` is the index of the next program instruction to try; it is
/// resolved against the signature array at dispatch time so an engine
/// reload can never leave it dangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredFlowSig {
    pub sid: SigIntId,
    pub flags: InspectFlags,
    pub cursor: usize,
}

/// Append-only chunked record store.
///
/// Append is O(1) amortized; iteration yields records in insertion order,
/// which equals rule evaluation order. Individual records are never
/// removed; `clear` empties the store but keeps chunk allocations for
/// reuse.
#[derive(Debug, Clone)]
pub struct SigStore<T> {
    chunks: Vec<Vec<T>>,
    cnt: u32,
}

impl<T> Default for SigStore<T> {
    fn default() -> Self {
        Self {
            chunks: Vec::new(),
            cnt: 0,
        }
    }
}

impl<T> SigStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record
    pub fn append(&mut self, record: T) {
        let chunk_idx = self.cnt as usize / CHUNK_SIZE;
        if chunk_idx == self.chunks.len() {
            self.chunks.push(Vec::with_capacity(CHUNK_SIZE));
        }
        self.chunks[chunk_idx].push(record);
        self.cnt += 1;
    }

    pub fn len(&self) -> usize {
        self.cnt as usize
    }

    pub fn is_empty(&self) -> bool {
        self.cnt == 0
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        if idx >= self.cnt as usize {
            return None;
        }
        self.chunks.get(idx / CHUNK_SIZE)?.get(idx % CHUNK_SIZE)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        if idx >= self.cnt as usize {
            return None;
        }
        self.chunks
            .get_mut(idx / CHUNK_SIZE)?
            .get_mut(idx % CHUNK_SIZE)
    }

    /// Records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.chunks.iter().flat_map(|c| c.iter())
    }

    /// Occupied chunks in order
    pub fn chunks(&self) -> impl Iterator<Item = &[T]> {
        self.chunks
            .iter()
            .filter(|c| !c.is_empty())
            .map(|c| c.as_slice())
    }

    /// Drop all records, keeping chunk allocations
    pub fn clear(&mut self) {
        for chunk in &mut self.chunks {
            chunk.clear();
        }
        self.cnt = 0;
    }
}

impl SigStore<StoredSig> {
    /// Whether a record for this signature exists
    pub fn contains_sig(&self, sid: SigIntId) -> bool {
        self.iter().any(|r| r.sid == sid)
    }
}

/// One direction of a transaction's detect state
#[derive(Debug, Clone, Default)]
pub struct DirState {
    pub store: SigStore<StoredSig>,
    pub flags: DirStateFlags,

    /// Number of file-interested signatures that concluded they cannot
    /// match this transaction
    pub filestore_cnt: u16,
}

impl DirState {
    fn reset(&mut self) {
        self.store.clear();
        self.flags = DirStateFlags::empty();
        self.filestore_cnt = 0;
    }
}

/// Detect state owned by one transaction, created lazily the first time a
/// signature parks on it
#[derive(Debug, Clone, Default)]
pub struct TxDetectState {
    dirs: [DirState; 2],
}

impl TxDetectState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(&self, direction: Direction) -> &DirState {
        &self.dirs[direction.index()]
    }

    pub fn dir_mut(&mut self, direction: Direction) -> &mut DirState {
        &mut self.dirs[direction.index()]
    }

    /// Parser-side notification: a new file appeared in this direction,
    /// concluded records may need to be reconsidered
    pub fn set_file_new(&mut self, direction: Direction) {
        self.dirs[direction.index()].flags |= DirStateFlags::file_new_bit(direction);
    }

    /// Zero counters and flags in both directions (engine reload)
    pub fn reset(&mut self) {
        for dir in &mut self.dirs {
            dir.reset();
        }
    }
}

/// One direction of the flow-scoped detect state
#[derive(Debug, Clone, Default)]
pub struct FlowDirState {
    pub store: SigStore<StoredFlowSig>,
    pub flags: DirStateFlags,
}

/// Detect state owned by the flow itself, used only for signatures with a
/// generic application-layer program. Does not participate in the
/// file-store arbiter.
#[derive(Debug, Clone, Default)]
pub struct FlowDetectState {
    dirs: [FlowDirState; 2],
}

impl FlowDetectState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(&self, direction: Direction) -> &FlowDirState {
        &self.dirs[direction.index()]
    }

    pub fn dir_mut(&mut self, direction: Direction) -> &mut FlowDirState {
        &mut self.dirs[direction.index()]
    }

    /// Zero one direction's counters and flags
    pub fn reset(&mut self, direction: Direction) {
        let dir = &mut self.dirs[direction.index()];
        dir.store.clear();
        dir.flags = DirStateFlags::empty();
    }
}
