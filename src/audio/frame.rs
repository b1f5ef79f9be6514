//! Media frame types shared by both legs of a bridged call.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

/// Wire encoding a frame is carrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEncoding {
    /// Narrow-band encoding used on the telephony leg (G.711 mu-law, 8 kHz).
    Legacy,
    /// Encoding used on the realtime speech leg (PCM16, 16 kHz).
    Target,
}

/// One frame of audio plus its encoding tag and a diagnostic sequence number.
///
/// Frames are never mutated in place; a transform produces a new frame that
/// keeps the original sequence number.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub payload: Bytes,
    pub encoding: FrameEncoding,
    pub seq: u64,
}

impl MediaFrame {
    pub fn new(payload: Bytes, encoding: FrameEncoding, seq: u64) -> Self {
        Self {
            payload,
            encoding,
            seq,
        }
    }

    /// Produce the transformed counterpart of this frame, preserving `seq`.
    pub fn transformed(&self, payload: Bytes, encoding: FrameEncoding) -> Self {
        Self {
            payload,
            encoding,
            seq: self.seq,
        }
    }
}

/// Monotonic per-direction sequence counter.
///
/// Sequence numbers exist for diagnostic ordering only; relay order is
/// guaranteed by the channels carrying the frames, not by reordering on `seq`.
#[derive(Debug, Default)]
pub struct FrameSequence(AtomicU64);

impl FrameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_monotonic() {
        let seq = FrameSequence::new();
        let first = seq.next();
        let second = seq.next();
        let third = seq.next();
        assert!(first < second && second < third);
    }

    #[test]
    fn transform_preserves_sequence_number() {
        let seq = FrameSequence::new();
        let frame = MediaFrame::new(Bytes::from_static(b"\x01\x02"), FrameEncoding::Legacy, seq.next());
        let out = frame.transformed(Bytes::from_static(b"\x03\x04\x05\x06"), FrameEncoding::Target);
        assert_eq!(out.seq, frame.seq);
        assert_eq!(out.encoding, FrameEncoding::Target);
        // the original frame is untouched
        assert_eq!(frame.payload.as_ref(), b"\x01\x02");
    }
}
