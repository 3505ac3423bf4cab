use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

/// One inbound unit produced by [`FrameCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    Line(String),
    /// A line that was dropped before JSON decoding, with the reason.
    Discarded(&'static str),
}

/// Newline framing that survives bad lines.
///
/// `FramedRead` ends the stream after the first decoder error, so oversized
/// and non-UTF-8 lines are surfaced as [`Frame::Discarded`] items instead.
/// `LinesCodec` keeps skipping an oversized line until its terminating
/// newline on its own.
pub(crate) struct FrameCodec {
    lines: LinesCodec,
}

impl FrameCodec {
    pub(crate) fn new(max_line_len: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_line_len),
        }
    }

    fn map(result: Result<Option<String>, LinesCodecError>) -> Result<Option<Frame>, io::Error> {
        match result {
            Ok(Some(line)) => Ok(Some(Frame::Line(line))),
            Ok(None) => Ok(None),
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Ok(Some(Frame::Discarded("line exceeds maximum frame length")))
            }
            // LinesCodec consumes the line before validating UTF-8.
            Err(LinesCodecError::Io(err)) if err.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Frame::Discarded("line is not valid UTF-8")))
            }
            Err(LinesCodecError::Io(err)) => Err(err),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        Self::map(self.lines.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        Self::map(self.lines.decode_eof(src))
    }
}
