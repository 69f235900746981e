//! Demultiplexer for the container engine's framed output stream.
//!
//! With the TTY disabled, the engine multiplexes stdout and stderr onto one
//! byte stream. Each frame starts with an 8-byte header: byte 0 tags the
//! stream (1 = stdout, 2 = stderr), bytes 4..8 hold the payload length as a
//! big-endian u32. Frames are never concatenated: a stderr frame between two
//! stdout frames keeps its place in the combined view but stays separable by
//! sink. Payload bytes are opaque here; lossy UTF-8 decoding happens at the
//! sink boundary.
//!
//! The header is inspected only at header positions. The tag byte is never
//! searched for inside payload bytes, so payloads containing 0x01 or 0x02
//! parse intact.

use bollard::container::LogOutput;
use bytes::{Buf, Bytes, BytesMut};

use crate::{CoderunnerError, CoderunnerResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Length of a frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 8;

const STDOUT_TAG: u8 = 1;
const STDERR_TAG: u8 = 2;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Which standard stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// The sandboxed process's standard output.
    Stdout,

    /// The sandboxed process's standard error.
    Stderr,
}

/// One demultiplexed frame: a stream tag and its payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The stream the payload belongs to.
    pub kind: StreamKind,

    /// The payload, exactly as produced inside the sandbox.
    pub payload: Bytes,
}

/// Incremental decoder for the framed byte stream.
///
/// Feed raw bytes as they arrive and pop complete frames; call
/// [`FrameDecoder::finish`] at end-of-stream so a frame cut short by the
/// engine is reported as [`CoderunnerError::TruncatedFrame`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

//--------------------------------------------------------------------------------------------------
// Implementations
//--------------------------------------------------------------------------------------------------

impl StreamKind {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            STDOUT_TAG => Some(StreamKind::Stdout),
            STDERR_TAG => Some(StreamKind::Stderr),
            _ => None,
        }
    }
}

impl Frame {
    /// Lossy UTF-8 view of the payload, for delivery to text sinks.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw stream bytes to the decode buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> CoderunnerResult<Option<Frame>> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let kind = StreamKind::from_tag(self.buf[0]).ok_or_else(|| {
            CoderunnerError::TruncatedFrame(format!("unexpected stream tag {:#04x}", self.buf[0]))
        })?;
        let length = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;

        if self.buf.len() < FRAME_HEADER_LEN + length {
            return Ok(None);
        }

        self.buf.advance(FRAME_HEADER_LEN);
        let payload = self.buf.split_to(length).freeze();

        Ok(Some(Frame { kind, payload }))
    }

    /// Assert the stream ended on a frame boundary.
    pub fn finish(&self) -> CoderunnerResult<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CoderunnerError::TruncatedFrame(format!(
                "{} bytes of partial frame at end of stream",
                self.buf.len()
            )))
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Split a complete framed blob into its frames.
pub fn split_frames(blob: &[u8]) -> CoderunnerResult<Vec<Frame>> {
    let mut decoder = FrameDecoder::new();
    decoder.feed(blob);

    let mut frames = Vec::new();
    while let Some(frame) = decoder.next_frame()? {
        frames.push(frame);
    }
    decoder.finish()?;

    Ok(frames)
}

/// Fold a complete framed blob into the single combined string used by the
/// batch response, preserving frame order across both streams.
pub fn collect_text(blob: &[u8]) -> CoderunnerResult<String> {
    let frames = split_frames(blob)?;
    Ok(frames.iter().map(Frame::text).collect())
}

/// Map one live engine frame into a demultiplexed [`Frame`].
///
/// The engine client parses headers on attached streams itself; stdin echo
/// frames carry no program output and yield `None`.
pub fn frame_from_log(output: LogOutput) -> Option<Frame> {
    match output {
        LogOutput::StdOut { message } => Some(Frame {
            kind: StreamKind::Stdout,
            payload: message,
        }),
        LogOutput::StdErr { message } => Some(Frame {
            kind: StreamKind::Stderr,
            payload: message,
        }),
        LogOutput::Console { message } => Some(Frame {
            kind: StreamKind::Stdout,
            payload: message,
        }),
        LogOutput::StdIn { .. } => None,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_frame(kind: StreamKind, payload: &[u8]) -> Vec<u8> {
        let tag = match kind {
            StreamKind::Stdout => STDOUT_TAG,
            StreamKind::Stderr => STDERR_TAG,
        };
        let mut bytes = vec![tag, 0, 0, 0];
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    fn encode_frames(frames: &[(StreamKind, &[u8])]) -> Vec<u8> {
        frames
            .iter()
            .flat_map(|(kind, payload)| encode_frame(*kind, payload))
            .collect()
    }

    #[test]
    fn round_trip_is_bit_exact() {
        let expected: Vec<(StreamKind, &[u8])> = vec![
            (StreamKind::Stdout, b"hello "),
            (StreamKind::Stderr, b"warning: odd\n"),
            (StreamKind::Stdout, b"world\n"),
            (StreamKind::Stdout, b""),
            (StreamKind::Stderr, &[0xff, 0xfe, 0x00, 0x07]),
        ];
        let blob = encode_frames(&expected);

        let frames = split_frames(&blob).unwrap();

        assert_eq!(frames.len(), expected.len());
        for (frame, (kind, payload)) in frames.iter().zip(&expected) {
            assert_eq!(frame.kind, *kind);
            assert_eq!(&frame.payload[..], *payload);
        }
    }

    #[test]
    fn frames_are_never_concatenated_across_stream_switches() {
        let blob = encode_frames(&[
            (StreamKind::Stdout, b"a"),
            (StreamKind::Stderr, b"b"),
            (StreamKind::Stdout, b"c"),
        ]);

        let frames = split_frames(&blob).unwrap();

        let kinds: Vec<StreamKind> = frames.iter().map(|frame| frame.kind).collect();
        assert_eq!(
            kinds,
            vec![StreamKind::Stdout, StreamKind::Stderr, StreamKind::Stdout]
        );
        assert_eq!(collect_text(&blob).unwrap(), "abc");
    }

    #[test]
    fn tag_bytes_inside_payloads_do_not_terminate_the_scan() {
        let payload = [b'x', STDOUT_TAG, STDERR_TAG, 0, 0, 0, 0, STDOUT_TAG, b'y'];
        let blob = encode_frame(StreamKind::Stdout, &payload);

        let frames = split_frames(&blob).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], &payload[..]);
    }

    #[test]
    fn incremental_feeding_yields_the_same_frames() {
        let blob = encode_frames(&[
            (StreamKind::Stdout, b"split"),
            (StreamKind::Stderr, b"across feeds"),
        ]);

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in &blob {
            decoder.feed(std::slice::from_ref(byte));
            while let Some(frame) = decoder.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        decoder.finish().unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].payload[..], b"split");
        assert_eq!(frames[1].kind, StreamKind::Stderr);
    }

    #[test]
    fn partial_header_at_end_of_stream_is_a_truncated_frame() {
        let mut blob = encode_frame(StreamKind::Stdout, b"ok");
        blob.extend_from_slice(&[STDERR_TAG, 0, 0]);

        let result = split_frames(&blob);

        assert!(matches!(result, Err(CoderunnerError::TruncatedFrame(_))));
    }

    #[test]
    fn partial_payload_at_end_of_stream_is_a_truncated_frame() {
        let mut blob = encode_frame(StreamKind::Stderr, b"full frame");
        let cut = encode_frame(StreamKind::Stdout, b"cut short");
        blob.extend_from_slice(&cut[..cut.len() - 3]);

        let result = split_frames(&blob);

        assert!(matches!(result, Err(CoderunnerError::TruncatedFrame(_))));
    }

    #[test]
    fn unknown_stream_tags_are_rejected() {
        let mut blob = vec![7u8, 0, 0, 0];
        blob.extend_from_slice(&2u32.to_be_bytes());
        blob.extend_from_slice(b"??");

        let result = split_frames(&blob);

        assert!(matches!(result, Err(CoderunnerError::TruncatedFrame(_))));
    }

    #[test]
    fn empty_blob_holds_no_frames() {
        assert!(split_frames(&[]).unwrap().is_empty());
        assert_eq!(collect_text(&[]).unwrap(), "");
    }

    #[test]
    fn invalid_utf8_is_replaced_at_the_sink_boundary() {
        let blob = encode_frame(StreamKind::Stdout, &[b'o', b'k', 0xff, b'!']);

        let text = collect_text(&blob).unwrap();

        assert_eq!(text, "ok\u{fffd}!");
    }

    #[test]
    fn live_frames_map_onto_their_sinks() {
        let stdout = frame_from_log(LogOutput::StdOut {
            message: Bytes::from_static(b"out"),
        })
        .unwrap();
        let stderr = frame_from_log(LogOutput::StdErr {
            message: Bytes::from_static(b"err"),
        })
        .unwrap();

        assert_eq!(stdout.kind, StreamKind::Stdout);
        assert_eq!(stderr.kind, StreamKind::Stderr);
        assert!(frame_from_log(LogOutput::StdIn {
            message: Bytes::from_static(b"typed"),
        })
        .is_none());
    }
}
