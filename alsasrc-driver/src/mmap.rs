use std::marker::PhantomData;

/// A borrowed view into a driver's mmap ring buffer.
///
/// This is valid only until the borrow of the driver that produced it
/// ends — which, because `mmap_begin` takes `&mut self`, means only until
/// the region (and anything built from it) is dropped. A caller cannot
/// call `mmap_commit` (which also needs `&mut self`) while a region from
/// the same `mmap_begin` call is still alive: the borrow checker rejects
/// it — the borrow makes the fixed-chunk lifetime a compile error
/// rather than a runtime assertion.
pub struct MmapRegion<'driver> {
    data: *const u8,
    len_bytes: usize,
    offset_frames: u64,
    frames_granted: u64,
    frame_stride_bits: u32,
    first_bit: u32,
    _borrow: PhantomData<&'driver ()>,
}

impl<'driver> MmapRegion<'driver> {
    /// # Safety
    /// `data` must point to at least `len_bytes` readable bytes, valid
    /// for the lifetime `'driver`, i.e. until the next mutable access to
    /// the driver that produced this region.
    pub unsafe fn new(
        data: *const u8,
        len_bytes: usize,
        offset_frames: u64,
        frames_granted: u64,
        frame_stride_bits: u32,
        first_bit: u32,
    ) -> Self {
        MmapRegion {
            data,
            len_bytes,
            offset_frames,
            frames_granted,
            frame_stride_bits,
            first_bit,
            _borrow: PhantomData,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        // SAFETY: constructor's contract guarantees `data..data+len_bytes`
        // is readable for at least `'driver`, which outlives `self`.
        unsafe { std::slice::from_raw_parts(self.data, self.len_bytes) }
    }

    pub fn offset_frames(&self) -> u64 {
        self.offset_frames
    }

    pub fn frames_granted(&self) -> u64 {
        self.frames_granted
    }

    /// Assert the alignment invariants: the area's first-bit offset is
    /// zero and the channel stride equals `frame_size * 8`. A violation
    /// is a driver-adapter bug, not a recoverable runtime condition.
    pub fn assert_alignment(&self, frame_size_bits: u32) {
        assert_eq!(self.first_bit, 0, "mmap region first-bit offset must be zero");
        assert_eq!(
            self.frame_stride_bits, frame_size_bits,
            "mmap region channel stride must equal frame_size * 8",
        );
    }

    /// Narrow this region to at most `max_frames`, e.g. to respect the
    /// memory pool's maximum block size.
    pub fn capped(self, max_frames: u64, bytes_per_frame: usize) -> Self {
        let frames = self.frames_granted.min(max_frames);
        let len_bytes = (frames as usize) * bytes_per_frame;
        MmapRegion { frames_granted: frames, len_bytes, ..self }
    }
}
