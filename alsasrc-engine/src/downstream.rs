//! The downstream source interface: a typed capability handle rather
//! than a table of function pointers wired onto the source object at
//! runtime.

use std::sync::Arc;

/// A reference-counted, pool-allocated byte range.
#[derive(Clone)]
pub struct PooledChunk {
    data: Arc<[u8]>,
    len: usize,
}

impl PooledChunk {
    pub fn from_vec(mut data: Vec<u8>, len: usize) -> Self {
        data.truncate(len);
        PooledChunk { data: Arc::from(data), len }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Thread-safe allocator supplied externally.
pub trait MemoryPool: Send + Sync {
    /// Largest block the pool is willing to allocate at once; the mmap
    /// path caps each commit's frame count so a chunk never exceeds this.
    fn max_block_size(&self) -> usize;

    fn alloc(&self, len: usize) -> PooledChunk;

    /// Hand back a raw, writable buffer of `len` bytes for the copy path
    /// to read into directly, before it's frozen into a
    /// `PooledChunk` of the actually-read length.
    fn alloc_buf(&self, len: usize) -> Vec<u8> {
        vec![0u8; len]
    }
}

/// A plain heap allocator, for callers (tests, the demo binary) that
/// don't need a real pooled allocator.
pub struct HeapPool {
    max_block_size: usize,
}

impl HeapPool {
    pub fn new(max_block_size: usize) -> Self {
        HeapPool { max_block_size }
    }
}

impl MemoryPool for HeapPool {
    fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    fn alloc(&self, len: usize) -> PooledChunk {
        PooledChunk::from_vec(vec![0u8; len], len)
    }
}

/// A chunk of captured audio posted downstream.
///
/// The `Fixed` variant borrows directly from the driver's mmap region
/// and is only valid for as long as that borrow lives — which, because
/// `Driver::mmap_begin` takes `&mut self`, ends no later than the next
/// call to `mmap_commit`. A `DownstreamSource` that needs the bytes
/// beyond the `post` call must copy them out before returning; it
/// cannot retain the borrow, because there is nowhere to retain it to —
/// the compiler will not let a `MemoryChunk::Fixed<'a>` outlive `'a`.
pub enum MemoryChunk<'a> {
    Fixed(&'a [u8]),
    Pooled(PooledChunk),
}

impl<'a> MemoryChunk<'a> {
    pub fn bytes(&self) -> &[u8] {
        match self {
            MemoryChunk::Fixed(bytes) => bytes,
            MemoryChunk::Pooled(chunk) => chunk.bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Messages the downstream source's message protocol dispatches to the
/// engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMsg {
    GetLatency,
    SetState(crate::message::RequestedState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceReply {
    Latency(u64),
    Ack,
}

/// Capability interface the capture engine holds a shared reference to.
pub trait DownstreamSource: Send + Sync {
    /// Append `chunk` to the outbound stream. Fire-and-forget.
    fn post(&self, chunk: MemoryChunk<'_>);

    /// Verify the source object is still live. The engine calls this
    /// before posting; a `false` here is not itself fatal, but signals
    /// the caller should stop feeding this source.
    fn assert_ref(&self) -> bool;

    /// The latency currently requested by whatever sits downstream of
    /// this source, if any.
    fn requested_latency_within_thread(&self) -> Option<u64>;

    fn min_latency(&self) -> u64;
    fn max_latency(&self) -> u64;

    /// Called by the overrun adjuster and by sw-param
    /// recomputation when the achievable latency range
    /// changes.
    fn set_latency_range_within_thread(&self, min_usec: u64, max_usec: u64);

    /// Re-apply a previously known virtual volume, e.g. after a
    /// suspend/resume cycle: resume must not silently drop the last
    /// known volume.
    fn apply_volume(&self, volume: u32);

    fn process_msg(&self, msg: SourceMsg) -> SourceReply;
}
