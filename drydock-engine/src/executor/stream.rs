//! Multiplexed log stream handling
//!
//! Containers started without a TTY emit one multiplexed stream in which
//! stdout and stderr frames interleave, each prefixed with an 8-byte
//! header: `[stream_type, 0, 0, 0, len_be32]`. Reading that stream
//! naively produces garbled lines with header bytes embedded in them.
//!
//! `FrameDecoder` reassembles frames from arbitrary read boundaries;
//! `LineAssembler` turns frame payloads into complete, sanitized lines
//! (frames are not line-aligned, so a line can span frames and one frame
//! can hold many lines).

/// Which half of the container's output a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One demultiplexed payload chunk
#[derive(Debug, Clone)]
pub struct LogChunk {
    pub kind: StreamKind,
    pub data: Vec<u8>,
}

const HEADER_LEN: usize = 8;

/// Incremental decoder for the 8-byte framed stream
///
/// Feed raw bytes with `push`, drain complete frames with `next_frame`.
/// Partial headers and payloads are buffered until the rest arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes from the stream
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<LogChunk> {
        if self.buf.len() < HEADER_LEN {
            return None;
        }

        let payload_len =
            u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
        if self.buf.len() < HEADER_LEN + payload_len {
            return None;
        }

        // Stream types: 0 = stdin, 1 = stdout, 2 = stderr. Stdin never
        // appears on the read side; treat anything unexpected as stdout.
        let kind = match self.buf[0] {
            2 => StreamKind::Stderr,
            _ => StreamKind::Stdout,
        };

        let data = self.buf[HEADER_LEN..HEADER_LEN + payload_len].to_vec();
        self.buf.drain(..HEADER_LEN + payload_len);
        Some(LogChunk { kind, data })
    }

    /// Decodes every complete frame currently buffered
    pub fn drain_frames(&mut self) -> Vec<LogChunk> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }
}

/// Assembles payload chunks into sanitized lines
///
/// NUL bytes are removed, trailing `\r` is dropped, and empty lines are
/// skipped, matching what the log sink is allowed to persist.
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a chunk and returns every line completed by it
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in data {
            if byte == b'\n' {
                if let Some(line) = take_line(&mut self.partial) {
                    lines.push(line);
                }
            } else {
                self.partial.push(byte);
            }
        }
        lines
    }

    /// Flushes a trailing line that never received its newline
    pub fn finish(&mut self) -> Option<String> {
        take_line(&mut self.partial)
    }
}

fn take_line(partial: &mut Vec<u8>) -> Option<String> {
    let mut raw = std::mem::take(partial);
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    raw.retain(|&b| b != 0);
    if raw.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&raw).into_owned())
}

/// Encodes one frame in the engine's wire format
///
/// The inverse of `FrameDecoder`; used to build realistic streams in
/// tests and fixtures.
pub fn encode_frame(kind: StreamKind, payload: &[u8]) -> Vec<u8> {
    let stream_type: u8 = match kind {
        StreamKind::Stdout => 1,
        StreamKind::Stderr => 2,
    };
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(stream_type);
    frame.extend_from_slice(&[0, 0, 0]);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_single_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&encode_frame(StreamKind::Stdout, b"hello\n"));

        let frame = decoder.next_frame().unwrap();
        assert_eq!(frame.kind, StreamKind::Stdout);
        assert_eq!(frame.data, b"hello\n");
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn test_decode_frame_split_across_reads() {
        let encoded = encode_frame(StreamKind::Stderr, b"boom");
        let mut decoder = FrameDecoder::new();

        // Split in the middle of the header, then the middle of the payload.
        decoder.push(&encoded[..3]);
        assert!(decoder.next_frame().is_none());
        decoder.push(&encoded[3..10]);
        assert!(decoder.next_frame().is_none());
        decoder.push(&encoded[10..]);

        let frame = decoder.next_frame().unwrap();
        assert_eq!(frame.kind, StreamKind::Stderr);
        assert_eq!(frame.data, b"boom");
    }

    #[test]
    fn test_decode_multiple_frames_in_one_read() {
        let mut bytes = encode_frame(StreamKind::Stdout, b"a\n");
        bytes.extend(encode_frame(StreamKind::Stderr, b"b\n"));
        bytes.extend(encode_frame(StreamKind::Stdout, b"c\n"));

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        let frames = decoder.drain_frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].kind, StreamKind::Stderr);
    }

    #[test]
    fn test_naive_read_would_garble() {
        // The header bytes of the second frame land inside what a naive
        // reader would treat as text.
        let mut bytes = encode_frame(StreamKind::Stdout, b"first");
        bytes.extend(encode_frame(StreamKind::Stdout, b"second\n"));

        let naive = String::from_utf8_lossy(&bytes);
        assert_ne!(naive, "firstsecond\n");

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        let text: Vec<u8> = decoder
            .drain_frames()
            .into_iter()
            .flat_map(|f| f.data)
            .collect();
        assert_eq!(text, b"firstsecond\n");
    }

    #[test]
    fn test_line_assembler_spanning_chunks() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(b"par").is_empty());
        let lines = assembler.push(b"tial\nnext");
        assert_eq!(lines, vec!["partial"]);
        assert_eq!(assembler.finish(), Some("next".to_string()));
    }

    #[test]
    fn test_line_assembler_many_lines_per_chunk() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"one\ntwo\nthree\n");
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert_eq!(assembler.finish(), None);
    }

    #[test]
    fn test_line_assembler_strips_nul_and_cr() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"he\x00llo\r\n");
        assert_eq!(lines, vec!["hello"]);
    }

    #[test]
    fn test_line_assembler_skips_empty_lines() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"a\n\n\x00\nb\n");
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_line_assembler_lossy_utf8() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"ok \xff\xfe bytes\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ok "));
    }
}
