//! Newline framing.
//!
//! A frame is the payload bytes followed by a single `\n`. Several frames may
//! arrive in one read and one frame may be split across many reads, so the
//! reader accumulates bytes in a [`FrameBuffer`] and drains complete frames.

use crate::transport::WireError;

/// Terminates every frame.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Append the delimiter to a payload.
pub fn encode_frame(payload: &str) -> Result<Vec<u8>, WireError> {
    if payload.as_bytes().contains(&FRAME_DELIMITER) {
        return Err(WireError::EmbeddedDelimiter);
    }
    let mut bytes = Vec::with_capacity(payload.len() + 1);
    bytes.extend_from_slice(payload.as_bytes());
    bytes.push(FRAME_DELIMITER);
    Ok(bytes)
}

/// Reassembles frames from an arbitrary sequence of reads.
///
/// An oversized frame is reported once and then skipped up to its
/// delimiter, so one bad frame does not cost the frames after it.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    /// Bytes at the front of `buf` already known to contain no delimiter.
    scanned: usize,
    max_frame: usize,
    /// Inside an oversized frame whose head was already thrown away.
    skipping: bool,
}

impl FrameBuffer {
    /// `max_frame` bounds the payload length, delimiter excluded.
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_frame,
            skipping: false,
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, without its delimiter.
    ///
    /// Returns `Ok(None)` when the buffered bytes hold no complete frame yet.
    /// `FrameTooLarge` is returned once per oversized frame; the buffer stays
    /// usable and later calls resume after that frame's delimiter.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        loop {
            let found = self.buf[self.scanned..]
                .iter()
                .position(|b| *b == FRAME_DELIMITER);

            match found {
                Some(offset) => {
                    let end = self.scanned + offset;
                    let mut frame: Vec<u8> = self.buf.drain(..=end).collect();
                    self.scanned = 0;
                    if self.skipping {
                        // Tail of a frame already reported.
                        self.skipping = false;
                        continue;
                    }
                    if end > self.max_frame {
                        return Err(WireError::FrameTooLarge {
                            size: end,
                            max: self.max_frame,
                        });
                    }
                    frame.pop();
                    return Ok(Some(frame));
                }
                None if self.skipping => {
                    self.buf.clear();
                    self.scanned = 0;
                    return Ok(None);
                }
                None if self.buf.len() > self.max_frame => {
                    let size = self.buf.len();
                    self.buf.clear();
                    self.scanned = 0;
                    self.skipping = true;
                    return Err(WireError::FrameTooLarge {
                        size,
                        max: self.max_frame,
                    });
                }
                None => {
                    self.scanned = self.buf.len();
                    return Ok(None);
                }
            }
        }
    }

    /// Bytes of an incomplete trailing frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(buf: &mut FrameBuffer) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(frame) = buf.next_frame().unwrap() {
            out.push(String::from_utf8(frame).unwrap());
        }
        out
    }

    #[test]
    fn test_encode_frame_appends_delimiter() {
        assert_eq!(encode_frame("0 1 2 0").unwrap(), b"0 1 2 0\n".to_vec());
    }

    #[test]
    fn test_encode_frame_rejects_newline() {
        assert!(matches!(
            encode_frame("a\nb"),
            Err(WireError::EmbeddedDelimiter)
        ));
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut buf = FrameBuffer::new(1024);
        buf.extend(b"0 1 1 0\n1 2 3 0\n2 0 4 0\n");
        assert_eq!(drain(&mut buf), vec!["0 1 1 0", "1 2 3 0", "2 0 4 0"]);
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut buf = FrameBuffer::new(1024);
        buf.extend(b"0 1");
        assert!(drain(&mut buf).is_empty());
        buf.extend(b" 17 ");
        assert!(drain(&mut buf).is_empty());
        buf.extend(b"0\n1 ");
        assert_eq!(drain(&mut buf), vec!["0 1 17 0"]);
        assert_eq!(buf.pending(), 2);
    }

    #[test]
    fn test_empty_frame() {
        let mut buf = FrameBuffer::new(16);
        buf.extend(b"\n");
        assert_eq!(drain(&mut buf), vec![""]);
    }

    #[test]
    fn test_oversized_partial_frame_is_skipped() {
        let mut buf = FrameBuffer::new(4);
        buf.extend(b"123456");
        assert!(matches!(
            buf.next_frame(),
            Err(WireError::FrameTooLarge { size: 6, max: 4 })
        ));
        assert_eq!(buf.pending(), 0);

        // The rest of the bad frame arrives over several reads.
        buf.extend(b"789");
        assert!(drain(&mut buf).is_empty());
        buf.extend(b"0\nok\n");
        assert_eq!(drain(&mut buf), vec!["ok"]);
    }

    #[test]
    fn test_oversized_complete_frame_is_skipped() {
        let mut buf = FrameBuffer::new(4);
        buf.extend(b"12345\n1 2\n");
        assert!(matches!(
            buf.next_frame(),
            Err(WireError::FrameTooLarge { size: 5, max: 4 })
        ));
        assert_eq!(drain(&mut buf), vec!["1 2"]);
    }

    #[test]
    fn test_frame_at_limit_accepted() {
        let mut buf = FrameBuffer::new(4);
        buf.extend(b"1234\n");
        assert_eq!(drain(&mut buf), vec!["1234"]);
    }
}
