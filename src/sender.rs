//! Send-side segmentation.
//!
//! A [`Segmenter`] slices one application message into numbered segments
//! that fit the negotiated segment capacity.  It only manages state; the
//! stop-and-wait transmission loop (send, await ACK, retransmit) lives in
//! [`crate::connection`].
//!
//! Sequence numbers start at 0 for every message and equal the segment's
//! index, so a retransmission reuses the same number.  An empty message
//! still produces a single empty segment — the receiver needs the LAST flag
//! to know the message is complete.

/// One slice of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    /// Segment index within the message.
    pub seq: u32,
    /// The window of the caller's buffer this segment carries.
    pub payload: &'a [u8],
    /// Set on the final segment of the message.
    pub last: bool,
}

/// Iterator over the segments of one message.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter<'a> {
    data: &'a [u8],
    seg_size: usize,
    count: usize,
    next: usize,
}

impl<'a> Segmenter<'a> {
    /// Plan the segmentation of `data` into `seg_size`-byte slices.
    ///
    /// Returns `None` when the message would need more segments than the
    /// 32-bit sequence space can number.
    pub fn new(data: &'a [u8], seg_size: usize) -> Option<Self> {
        debug_assert!(seg_size > 0, "segment capacity must be positive");
        let count = if data.is_empty() {
            1
        } else {
            data.len().div_ceil(seg_size)
        };
        if count > u32::MAX as usize {
            return None;
        }
        Some(Self {
            data,
            seg_size,
            count,
            next: 0,
        })
    }

    /// Total number of segments this message needs.
    pub fn count(&self) -> usize {
        self.count
    }
}

impl<'a> Iterator for Segmenter<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Segment<'a>> {
        if self.next == self.count {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let start = index * self.seg_size;
        let end = (start + self.seg_size).min(self.data.len());
        Some(Segment {
            seq: index as u32,
            payload: &self.data[start..end],
            last: index + 1 == self.count,
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
