//! Reassembles BMS frames from notification chunks
//!
//! Notifications arrive at arbitrary boundaries: a frame may be split over
//! several chunks, several frames may share one chunk, and bytes are
//! sometimes duplicated or lost. The reassembler accumulates bytes and
//! yields every complete, checksum-valid frame it can find.
//!
//! # Recovery
//!
//! - Bytes before the first start marker are discarded.
//! - The frame end is located from the declared length byte. If the byte
//!   there is not the end marker the length is not trusted: only the start
//!   marker is skipped and the scan resumes at the next one. An end marker
//!   value inside a payload therefore never truncates a frame.
//! - A frame with a bad checksum is dropped the same way.
//!
//! The buffer never holds more than one maximum-length frame, so a corrupt
//! length byte can delay but not stall the stream.

use crate::frame::{Frame, END_MARKER, FRAME_OVERHEAD, START_MARKER};

/// Counters for the lifetime of a reassembler
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub frames: u64,
    pub rejected: u64,
    pub discarded_bytes: u64,
}

#[derive(Debug, Default)]
pub struct FrameReassembler {
    buffer: Vec<u8>,
    stats: ReassemblyStats,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame completed by it, in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let Some(start) = self.buffer.iter().position(|&b| b == START_MARKER) else {
                self.discard(self.buffer.len());
                return None;
            };
            self.discard(start);

            // Wait for the length byte
            if self.buffer.len() < 4 {
                return None;
            }

            let frame_len = self.buffer[3] as usize + FRAME_OVERHEAD;
            if self.buffer.len() < frame_len {
                return None;
            }

            if self.buffer[frame_len - 1] != END_MARKER {
                log::debug!(
                    "BMS: no end marker at declared length {frame_len}, resyncing: {}",
                    hex::encode(&self.buffer[..frame_len])
                );
                self.stats.rejected += 1;
                self.discard(1);
                continue;
            }

            match Frame::parse(&self.buffer[..frame_len]) {
                Ok(frame) => {
                    self.buffer.drain(..frame_len);
                    self.stats.frames += 1;
                    return Some(frame);
                }
                Err(e) => {
                    log::debug!(
                        "BMS: dropping frame: {e}: {}",
                        hex::encode(&self.buffer[..frame_len])
                    );
                    self.stats.rejected += 1;
                    self.discard(1);
                }
            }
        }
    }

    fn discard(&mut self, n: usize) {
        if n > 0 {
            self.buffer.drain(..n);
            self.stats.discarded_bytes += n as u64;
        }
    }

    /// Number of bytes waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MAX_FRAME_LEN;

    const CELL_FRAME: &str = "dd0400020fa0ff4f77";

    fn cell_frame() -> Vec<u8> {
        hex::decode(CELL_FRAME).unwrap()
    }

    #[test]
    fn whole_frame_in_one_chunk() {
        let mut r = FrameReassembler::new();
        let frames = r.feed(&cell_frame());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![0x0f, 0xa0]);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn frame_split_over_chunks() {
        let bytes = cell_frame();
        let mut r = FrameReassembler::new();
        assert!(r.feed(&bytes[..3]).is_empty());
        assert!(r.feed(&bytes[3..6]).is_empty());
        let frames = r.feed(&bytes[6..]);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn two_frames_in_one_chunk() {
        let first = cell_frame();
        let second = Frame::new(0x04, 0x00, &[0x0f, 0xa1, 0x0f, 0x9f]).unwrap().to_bytes();
        let mut chunk = first.clone();
        chunk.extend_from_slice(&second);

        let mut r = FrameReassembler::new();
        let frames = r.feed(&chunk);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].to_bytes(), first);
        assert_eq!(frames[1].to_bytes(), second);
    }

    #[test]
    fn leading_garbage_is_skipped() {
        let mut chunk = vec![0x00, 0x77, 0x12];
        chunk.extend_from_slice(&cell_frame());
        let mut r = FrameReassembler::new();
        assert_eq!(r.feed(&chunk).len(), 1);
        assert_eq!(r.stats().discarded_bytes, 3);
    }

    #[test]
    fn garbage_without_start_marker_is_cleared() {
        let mut r = FrameReassembler::new();
        assert!(r.feed(&[0x01, 0x02, 0x77, 0x03]).is_empty());
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn end_marker_inside_payload() {
        // 0x0f77 = 3959 mV
        let frame = Frame::new(0x04, 0x00, &[0x0f, 0x77]).unwrap().to_bytes();
        let mut r = FrameReassembler::new();
        let frames = r.feed(&frame);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![0x0f, 0x77]);
    }

    #[test]
    fn bad_checksum_is_dropped_and_next_frame_found() {
        let mut chunk = hex::decode("dd0400020fa0ff5077").unwrap();
        chunk.extend_from_slice(&cell_frame());
        let mut r = FrameReassembler::new();
        let frames = r.feed(&chunk);
        assert_eq!(frames.len(), 1);
        assert_eq!(r.stats().rejected, 1);
    }

    #[test]
    fn truncated_frame_followed_by_good_frame() {
        let good = cell_frame();
        let mut chunk = good[..5].to_vec();
        chunk.extend_from_slice(&good);
        let mut r = FrameReassembler::new();
        let frames = r.feed(&chunk);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].to_bytes(), good);
    }

    #[test]
    fn corrupt_length_delays_good_frames_until_max_frame_len() {
        let mut r = FrameReassembler::new();
        // Declares 255 bytes, so nothing is emitted until 262 are buffered
        r.feed(&[0xdd, 0x04, 0x00, 0xff]);
        for _ in 0..28 {
            assert!(r.feed(&cell_frame()).is_empty());
        }
        assert_eq!(r.buffered(), 4 + 28 * CELL_FRAME.len() / 2);
        assert!(r.buffered() < MAX_FRAME_LEN);

        // Crossing the bound rejects the header and recovers every frame
        let frames = r.feed(&cell_frame());
        assert_eq!(frames.len(), 29);
        assert!(frames.iter().all(|f| f.payload == vec![0x0f, 0xa0]));
        assert_eq!(r.stats().rejected, 1);
        assert_eq!(r.stats().discarded_bytes, 4);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn buffer_stays_bounded() {
        let mut r = FrameReassembler::new();
        // Start marker with the largest declared length, then filler
        r.feed(&[0xdd, 0x03, 0x00, 0xff]);
        for _ in 0..100 {
            r.feed(&[0x11; 16]);
            assert!(r.buffered() < MAX_FRAME_LEN);
        }
    }
}
