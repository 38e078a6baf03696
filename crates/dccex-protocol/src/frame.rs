//! Frame reassembly for the serial byte stream.
//!
//! Frames are delimited by `<` and `>`:
//!
//! ```text
//! junk <s> \n <@ 0 3 "Ready"> \n
//!      ^^^    ^^^^^^^^^^^^^^^
//! ```
//!
//! Anything outside the delimiters is discarded; the command station emits
//! occasional diagnostic text between frames. Newlines are a framing
//! redundancy and are dropped in every state.

use bytes::BytesMut;

/// Initial capacity of the frame accumulator.
const FRAME_BUFFER_CAPACITY: usize = 128;

/// A codec reassembling `<...>` frames from a byte stream.
///
/// Feed received bytes with [`FrameCodec::push`]; each call returns the
/// frame bodies (without delimiters) completed by those bytes.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Accumulates the body of the frame currently being read.
    buffer: BytesMut,
    /// Whether a `<` has been seen and the body is accumulating.
    reading: bool,
}

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new() -> Self {
        FrameCodec {
            buffer: BytesMut::with_capacity(FRAME_BUFFER_CAPACITY),
            reading: false,
        }
    }

    /// Consume received bytes, returning any frame bodies they complete.
    ///
    /// A `<` always starts a fresh frame, discarding whatever partial body
    /// was accumulated before it. A `>` outside a frame is ignored.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut frames = Vec::new();

        for &byte in data {
            match byte {
                b'<' => {
                    self.reading = true;
                    self.buffer.clear();
                }
                b'>' if self.reading => {
                    frames.push(String::from_utf8_lossy(&self.buffer).into_owned());
                    self.buffer.clear();
                    self.reading = false;
                }
                b'\n' => {}
                _ if self.reading => self.buffer.extend_from_slice(&[byte]),
                _ => {}
            }
        }

        frames
    }

    /// Get the number of buffered bytes of an incomplete frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partially accumulated frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.reading = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut codec = FrameCodec::new();
        assert_eq!(codec.push(b"<s>\n"), vec!["s"]);
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut codec = FrameCodec::new();
        assert_eq!(codec.push(b"<O>\n<X>\n"), vec!["O", "X"]);
    }

    #[test]
    fn test_frame_split_across_pushes() {
        let mut codec = FrameCodec::new();
        assert!(codec.push(b"<@ 0 3 \"Rea").is_empty());
        assert_eq!(codec.buffered_len(), 11);
        assert_eq!(codec.push(b"dy\">\n"), vec!["@ 0 3 \"Ready\""]);
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn test_junk_between_frames_is_discarded() {
        let mut codec = FrameCodec::new();
        assert_eq!(codec.push(b"noise\n<s>garbage<i x>\n"), vec!["s", "i x"]);
    }

    #[test]
    fn test_restart_on_open_delimiter() {
        let mut codec = FrameCodec::new();
        assert_eq!(codec.push(b"<par<t 3 0 1>"), vec!["t 3 0 1"]);
    }

    #[test]
    fn test_close_delimiter_outside_frame_is_ignored() {
        let mut codec = FrameCodec::new();
        assert!(codec.push(b">>\n").is_empty());
        assert_eq!(codec.push(b"<s>"), vec!["s"]);
    }

    #[test]
    fn test_newlines_inside_frame_are_dropped() {
        let mut codec = FrameCodec::new();
        assert_eq!(codec.push(b"<Q\n 7>"), vec!["Q 7"]);
    }

    #[test]
    fn test_clear_drops_partial_frame() {
        let mut codec = FrameCodec::new();
        assert!(codec.push(b"<partial").is_empty());
        codec.clear();
        assert_eq!(codec.push(b"rest><s>"), vec!["s"]);
    }
}
