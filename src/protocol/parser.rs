//! Command Frame Decoder
//!
//! Clients send every command as a RESP array of bulk strings:
//!
//! ```text
//! *3\r\n$3\r\nSET\r\n$4\r\nname\r\n$5\r\nquartz\r\n
//! ```
//!
//! Anything else on the inbound side is a protocol violation. That includes
//! the other RESP types (`+`, `-`, `:`, a top-level `$`) and inline commands.
//!
//! ## Layers
//!
//! [`parse_command`] is a pure, incremental function over a byte slice. It
//! returns
//! - `Ok(Some((tokens, consumed)))` when a whole frame is available,
//! - `Ok(None)` when more bytes are needed,
//! - `Err(ParseError)` on malformed input.
//!
//! [`FrameDecoder`] wraps any `AsyncRead` and turns it into a sequence of
//! frames. The sequence is finite and can't be restarted: the first error or
//! the end of the stream ends it for good, there is no resynchronisation.

use crate::protocol::types::{prefix, CRLF};
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Errors that can occur while decoding command frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A frame started with something other than `*`
    #[error("expected '*', got '{}'", char::from(*.0).escape_default())]
    UnexpectedPrefix(u8),

    /// An array element was not a bulk string
    #[error("expected '$', got '{}'", char::from(*.0).escape_default())]
    ExpectedBulkString(u8),

    #[error("invalid multibulk length")]
    InvalidArrayLength,

    #[error("invalid bulk length")]
    InvalidBulkLength,

    /// Bulk payload not followed by CRLF
    #[error("bulk string missing trailing CRLF")]
    MissingTerminator,

    #[error("message too large: {size} (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The stream ended in the middle of a frame
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("read failed: {0}")]
    Io(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in one command frame
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Maximum number of buffered bytes for one incomplete frame
pub const MAX_FRAME_SIZE: usize = 1024 * 1024 * 1024;

/// Decodes one command frame from the start of `buf`.
///
/// A blank line or an array with a count of zero or less consumes bytes but
/// yields no tokens; callers skip such frames. A null element (`$-1`) becomes
/// an empty token.
///
/// # Example
///
/// ```
/// use quartzkv::protocol::parse_command;
///
/// let (tokens, consumed) = parse_command(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
///     .unwrap()
///     .unwrap();
/// assert_eq!(tokens, vec!["GET", "k"]);
/// assert_eq!(consumed, 20);
///
/// assert_eq!(parse_command(b"*2\r\n$3\r\nGE").unwrap(), None);
/// ```
pub fn parse_command(buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    let Some((count, mut consumed)) = parse_header(buf)? else {
        return Ok(None);
    };

    let mut tokens = Vec::with_capacity(count.min(64));
    while tokens.len() < count {
        match parse_bulk(&buf[consumed..])? {
            Some((token, used)) => {
                tokens.push(token);
                consumed += used;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((tokens, consumed)))
}

/// Decodes the start of a frame: the element count and the header length.
///
/// Blank lines and arrays with a count of zero or less report 0 elements.
fn parse_header(buf: &[u8]) -> ParseResult<Option<(usize, usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };

    match first {
        prefix::ARRAY => {}
        b'\r' => {
            return match buf.get(1) {
                None => Ok(None),
                Some(b'\n') => Ok(Some((0, 2))),
                Some(_) => Err(ParseError::UnexpectedPrefix(b'\r')),
            }
        }
        b'\n' => return Ok(Some((0, 1))),
        other => return Err(ParseError::UnexpectedPrefix(other)),
    }

    let Some(header_end) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };
    let count = parse_length(&buf[1..1 + header_end]).ok_or(ParseError::InvalidArrayLength)?;
    let consumed = 1 + header_end + CRLF.len();

    if count <= 0 {
        return Ok(Some((0, consumed)));
    }
    let count = count as usize;
    if count > MAX_ARRAY_LEN {
        return Err(ParseError::MessageTooLarge {
            size: count,
            max: MAX_ARRAY_LEN,
        });
    }
    Ok(Some((count, consumed)))
}

fn parse_bulk(buf: &[u8]) -> ParseResult<Option<(Bytes, usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    if first != prefix::BULK_STRING {
        return Err(ParseError::ExpectedBulkString(first));
    }

    let Some(header_end) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };
    let length = parse_length(&buf[1..1 + header_end]).ok_or(ParseError::InvalidBulkLength)?;
    let data_start = 1 + header_end + CRLF.len();

    if length == -1 {
        return Ok(Some((Bytes::new(), data_start)));
    }
    if length < 0 {
        return Err(ParseError::InvalidBulkLength);
    }
    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let total = data_start + length + CRLF.len();
    if buf.len() < total {
        return Ok(None);
    }
    if &buf[data_start + length..total] != CRLF {
        return Err(ParseError::MissingTerminator);
    }

    Ok(Some((
        Bytes::copy_from_slice(&buf[data_start..data_start + length]),
        total,
    )))
}

fn parse_length(digits: &[u8]) -> Option<i64> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|pair| pair == CRLF)
}

/// Turns a byte stream into a sequence of command frames.
///
/// # Example
///
/// ```
/// use quartzkv::protocol::FrameDecoder;
///
/// # tokio_test::block_on(async {
/// let input: &[u8] = b"*1\r\n$4\r\nPING\r\n";
/// let mut frames = FrameDecoder::new(input);
///
/// let frame = frames.next_frame().await.unwrap().unwrap();
/// assert_eq!(frame, vec!["PING"]);
/// assert!(frames.next_frame().await.is_none());
/// # });
/// ```
#[derive(Debug)]
pub struct FrameDecoder<R> {
    reader: R,
    buffer: BytesMut,
    /// Array whose header and leading elements have already been consumed
    pending: Option<PendingFrame>,
    finished: bool,
}

#[derive(Debug)]
struct PendingFrame {
    count: usize,
    tokens: Vec<Bytes>,
    /// Bytes of the frame already consumed from the buffer
    size: usize,
}

impl<R: AsyncRead + Unpin> FrameDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(4096),
            pending: None,
            finished: false,
        }
    }

    /// Returns the next frame, or `None` once the sequence has ended.
    ///
    /// An `Err` is always the last item: every later call returns `None`.
    pub async fn next_frame(&mut self) -> Option<ParseResult<Vec<Bytes>>> {
        loop {
            if self.finished {
                return None;
            }

            match self.decode() {
                Ok(Some(tokens)) => return Some(Ok(tokens)),
                Ok(None) => {}
                Err(err) => return self.fail(err),
            }

            let buffered = self.buffer.len() + self.pending.as_ref().map_or(0, |p| p.size);
            if buffered > MAX_FRAME_SIZE {
                return self.fail(ParseError::MessageTooLarge {
                    size: buffered,
                    max: MAX_FRAME_SIZE,
                });
            }

            match self.reader.read_buf(&mut self.buffer).await {
                Ok(0) => {
                    self.finished = true;
                    if self.buffer.is_empty() && self.pending.is_none() {
                        return None;
                    }
                    return Some(Err(ParseError::UnexpectedEof));
                }
                Ok(n) => trace!(bytes = n, buffered = self.buffer.len(), "Read data"),
                Err(err) => return self.fail(ParseError::Io(err.to_string())),
            }
        }
    }

    /// Decodes as much of the buffer as possible. Elements of an array are
    /// consumed as soon as they are complete, so a frame arriving over many
    /// reads is scanned once.
    fn decode(&mut self) -> ParseResult<Option<Vec<Bytes>>> {
        loop {
            let mut pending = match self.pending.take() {
                Some(pending) => pending,
                None => match parse_header(&self.buffer)? {
                    Some((0, consumed)) => {
                        self.buffer.advance(consumed);
                        continue;
                    }
                    Some((count, consumed)) => {
                        self.buffer.advance(consumed);
                        PendingFrame {
                            count,
                            tokens: Vec::with_capacity(count.min(64)),
                            size: consumed,
                        }
                    }
                    None => return Ok(None),
                },
            };

            while pending.tokens.len() < pending.count {
                match parse_bulk(&self.buffer)? {
                    Some((token, used)) => {
                        self.buffer.advance(used);
                        pending.tokens.push(token);
                        pending.size += used;
                    }
                    None => {
                        self.pending = Some(pending);
                        return Ok(None);
                    }
                }
            }

            trace!(tokens = pending.count, bytes = pending.size, "Decoded frame");
            return Ok(Some(pending.tokens));
        }
    }

    fn fail(&mut self, err: ParseError) -> Option<ParseResult<Vec<Bytes>>> {
        self.finished = true;
        Some(Err(err))
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn tokens(items: &[&str]) -> Vec<Bytes> {
        items.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    #[test]
    fn test_parse_set_command() {
        let input = b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$6\r\nquartz\r\n";
        let (frame, consumed) = parse_command(input).unwrap().unwrap();
        assert_eq!(frame, tokens(&["SET", "name", "quartz"]));
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_incomplete_frames() {
        let input = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
        for end in 0..input.len() {
            assert_eq!(parse_command(&input[..end]), Ok(None), "prefix of {} bytes", end);
        }
    }

    #[test]
    fn test_binary_safe_bulk() {
        let input = b"*1\r\n$4\r\n\x00\r\n\xff\r\n";
        let (frame, _) = parse_command(input).unwrap().unwrap();
        assert_eq!(frame, vec![Bytes::from_static(b"\x00\r\n\xff")]);
    }

    #[test]
    fn test_null_element_is_empty_token() {
        let input = b"*2\r\n$3\r\nGET\r\n$-1\r\n";
        let (frame, consumed) = parse_command(input).unwrap().unwrap();
        assert_eq!(frame, vec![Bytes::from("GET"), Bytes::new()]);
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_empty_and_null_arrays_yield_nothing() {
        assert_eq!(parse_command(b"*0\r\n"), Ok(Some((vec![], 4))));
        assert_eq!(parse_command(b"*-1\r\n"), Ok(Some((vec![], 5))));
        assert_eq!(parse_command(b"\r\n"), Ok(Some((vec![], 2))));
    }

    #[test]
    fn test_non_array_frames_are_rejected() {
        assert_eq!(parse_command(b"+OK\r\n"), Err(ParseError::UnexpectedPrefix(b'+')));
        assert_eq!(parse_command(b"-ERR\r\n"), Err(ParseError::UnexpectedPrefix(b'-')));
        assert_eq!(parse_command(b":1\r\n"), Err(ParseError::UnexpectedPrefix(b':')));
        assert_eq!(parse_command(b"$1\r\na\r\n"), Err(ParseError::UnexpectedPrefix(b'$')));
        assert_eq!(parse_command(b"PING\r\n"), Err(ParseError::UnexpectedPrefix(b'P')));
    }

    #[test]
    fn test_non_bulk_elements_are_rejected() {
        assert_eq!(
            parse_command(b"*1\r\n:1\r\n"),
            Err(ParseError::ExpectedBulkString(b':'))
        );
    }

    #[test]
    fn test_malformed_lengths() {
        assert_eq!(parse_command(b"*x\r\n"), Err(ParseError::InvalidArrayLength));
        assert_eq!(
            parse_command(b"*1\r\n$abc\r\n"),
            Err(ParseError::InvalidBulkLength)
        );
        assert_eq!(
            parse_command(b"*1\r\n$-2\r\n"),
            Err(ParseError::InvalidBulkLength)
        );
    }

    #[test]
    fn test_missing_terminator() {
        assert_eq!(
            parse_command(b"*1\r\n$3\r\nGETxx"),
            Err(ParseError::MissingTerminator)
        );
    }

    #[test]
    fn test_size_limits() {
        assert!(matches!(
            parse_command(b"*2000000\r\n"),
            Err(ParseError::MessageTooLarge { .. })
        ));
        assert!(matches!(
            parse_command(b"*1\r\n$999999999999\r\n"),
            Err(ParseError::MessageTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_decoder_splits_pipelined_frames() {
        let reader = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n\r\n*2\r\n$3\r\nGET")
            .read(b"\r\n$1\r\nk\r\n*0\r\n")
            .build();
        let mut frames = FrameDecoder::new(reader);

        assert_eq!(frames.next_frame().await, Some(Ok(tokens(&["PING"]))));
        assert_eq!(frames.next_frame().await, Some(Ok(tokens(&["GET", "k"]))));
        assert_eq!(frames.next_frame().await, None);
        assert_eq!(frames.next_frame().await, None);
    }

    #[tokio::test]
    async fn test_decoder_error_is_terminal() {
        let reader = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n+OK\r\n*1\r\n$4\r\nPING\r\n")
            .build();
        let mut frames = FrameDecoder::new(reader);

        assert_eq!(frames.next_frame().await, Some(Ok(tokens(&["PING"]))));
        assert_eq!(
            frames.next_frame().await,
            Some(Err(ParseError::UnexpectedPrefix(b'+')))
        );
        assert_eq!(frames.next_frame().await, None);
    }

    #[tokio::test]
    async fn test_decoder_truncated_stream() {
        let reader = Builder::new().read(b"*2\r\n$3\r\nGET\r\n").build();
        let mut frames = FrameDecoder::new(reader);

        assert_eq!(frames.next_frame().await, Some(Err(ParseError::UnexpectedEof)));
        assert_eq!(frames.next_frame().await, None);
    }

    #[tokio::test]
    async fn test_decoder_frame_over_many_reads() {
        let reader = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r")
            .read(b"\n$1\r\nk")
            .read(b"\r\n$5\r\nhel")
            .read(b"lo\r\n*1\r\n$4\r\nPING\r\n")
            .build();
        let mut frames = FrameDecoder::new(reader);

        assert_eq!(frames.next_frame().await, Some(Ok(tokens(&["SET", "k", "hello"]))));
        assert_eq!(frames.next_frame().await, Some(Ok(tokens(&["PING"]))));
        assert_eq!(frames.next_frame().await, None);
    }

    #[tokio::test]
    async fn test_decoder_consumes_completed_elements() {
        let mut frames = FrameDecoder::new(Builder::new().build());

        frames.buffer.extend_from_slice(b"*3\r\n$3\r\nSET\r\n$1\r\nk");
        assert_eq!(frames.decode(), Ok(None));
        assert_eq!(&frames.buffer[..], b"$1\r\nk");
        assert_eq!(frames.pending.as_ref().map(|p| p.tokens.len()), Some(1));

        frames.buffer.extend_from_slice(b"\r\n$5\r\nhel");
        assert_eq!(frames.decode(), Ok(None));
        assert_eq!(&frames.buffer[..], b"$5\r\nhel");

        frames.buffer.extend_from_slice(b"lo\r\n*1\r\n$4\r\nPING\r\n");
        assert_eq!(frames.decode(), Ok(Some(tokens(&["SET", "k", "hello"]))));
        assert!(frames.pending.is_none());
        assert_eq!(frames.decode(), Ok(Some(tokens(&["PING"]))));
        assert_eq!(frames.decode(), Ok(None));
    }

    #[tokio::test]
    async fn test_decoder_error_inside_pending_frame() {
        let reader = Builder::new()
            .read(b"*2\r\n$3\r\nGET\r\n")
            .read(b":1\r\n")
            .build();
        let mut frames = FrameDecoder::new(reader);

        assert_eq!(
            frames.next_frame().await,
            Some(Err(ParseError::ExpectedBulkString(b':')))
        );
        assert_eq!(frames.next_frame().await, None);
    }

    #[tokio::test]
    async fn test_decoder_empty_stream() {
        let reader = Builder::new().build();
        let mut frames = FrameDecoder::new(reader);
        assert_eq!(frames.next_frame().await, None);
    }
}
