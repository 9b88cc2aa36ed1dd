// https://redis.io/docs/reference/protocol-spec

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use std::string::FromUtf8Error;
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// How many arrays may be nested inside each other before parsing gives up.
pub const DEFAULT_MAX_DEPTH: usize = 64;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("invalid frame data type: {0}")]
    InvalidDataType(u8),
    #[error("protocol error; invalid length {0:?}")]
    InvalidLength(String),
    #[error("protocol error; invalid integer {0:?}")]
    InvalidInteger(String),
    #[error("protocol error; invalid frame format")]
    InvalidUtf8(#[from] FromUtf8Error),
    #[error("protocol error; bulk string is not terminated by CRLF")]
    MissingTerminator,
    #[error("protocol error; line contains a bare CR or LF")]
    BareLineBreak,
    #[error("failed to read item {index} from array: {source}")]
    ArrayElement {
        index: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("protocol error; arrays nested deeper than {0} levels")]
    NestingTooDeep(usize),
    #[error("frame size exceeds limit of {limit} bytes")]
    FrameTooLarge { limit: usize },
    #[error("unexpected end of stream, {0} bytes left that do not form a frame")]
    UnexpectedEof(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    /// The nil bulk string, `$-1`.
    Null,
    Array(Vec<Frame>),
    /// The nil array, `*-1`.
    NullArray,
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_with_depth(src, DEFAULT_MAX_DEPTH)
    }

    /// Parses one complete frame, rejecting arrays nested more than `max_depth` levels.
    ///
    /// Returns `Error::Incomplete` when `src` ends before the frame does. The cursor position is
    /// meaningless in that case and the caller is expected to retry from the same starting point
    /// once more data is available.
    pub fn parse_with_depth(src: &mut Cursor<&[u8]>, max_depth: usize) -> Result<Self, Error> {
        parse_frame(src, 0, max_depth)
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => put_simple(dst, s.as_bytes()),
            Frame::Error(s) => put_error(dst, s.as_bytes()),
            Frame::Integer(i) => put_integer(dst, *i),
            Frame::Bulk(bytes) => put_bulk(dst, bytes),
            Frame::Null => put_null(dst),
            Frame::Array(arr) => {
                put_array_header(dst, arr.len());
                for frame in arr {
                    frame.encode(dst);
                }
            }
            Frame::NullArray => put_null_array(dst),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = BytesMut::new();
        self.encode(&mut bytes);
        bytes.to_vec()
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

// Used in logs and error replies, so it must never contain CRLF.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes).escape_debug()),
            Frame::Null => write!(f, "$-1"),
            Frame::Array(arr) => {
                write!(f, "[")?;
                for (i, frame) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", frame)?;
                }
                write!(f, "]")
            }
            Frame::NullArray => write!(f, "*-1"),
        }
    }
}

fn parse_frame(src: &mut Cursor<&[u8]>, depth: usize, max_depth: usize) -> Result<Frame, Error> {
    // The first byte in an RESP-serialized payload always identifies its type.
    // Subsequent bytes constitute the type's contents.
    let first_byte = get_byte(src)?;
    let data_type = DataType::try_from(first_byte)?;

    match data_type {
        DataType::SimpleString => {
            let bytes = check_line(get_line(src)?)?.to_vec();
            Ok(Frame::Simple(String::from_utf8(bytes)?))
        }
        DataType::SimpleError => {
            let bytes = check_line(get_line(src)?)?.to_vec();
            Ok(Frame::Error(String::from_utf8(bytes)?))
        }
        DataType::Integer => {
            let line = get_line(src)?;
            let integer = parse_integer(line).ok_or_else(|| Error::InvalidInteger(lossy(line)))?;

            Ok(Frame::Integer(integer))
        }
        // $<length>\r\n<data>\r\n
        DataType::BulkString => {
            let Some(length) = get_length(src)? else {
                return Ok(Frame::Null);
            };

            // The payload is binary safe, so its end is found by length and never by scanning
            // for CRLF.
            let data = get_exact(src, length)?;

            Ok(Frame::Bulk(Bytes::copy_from_slice(data)))
        }
        // *<number-of-elements>\r\n<element-1>...<element-n>
        DataType::Array => {
            let Some(length) = get_length(src)? else {
                return Ok(Frame::NullArray);
            };

            if depth >= max_depth {
                return Err(Error::NestingTooDeep(max_depth));
            }

            // Every element takes at least three bytes, so a bogus length can't make us
            // allocate more than the buffer could ever hold.
            let mut frames = Vec::with_capacity(length.min(src.remaining() / 3));
            for index in 0..length {
                let frame = parse_frame(src, depth + 1, max_depth).map_err(|err| match err {
                    Error::Incomplete => Error::Incomplete,
                    err => Error::ArrayElement {
                        index,
                        source: Box::new(err),
                    },
                })?;
                frames.push(frame);
            }

            Ok(Frame::Array(frames))
        }
    }
}

/// Reads a length line. `None` is the nil marker `-1`.
fn get_length(src: &mut Cursor<&[u8]>) -> Result<Option<usize>, Error> {
    parse_length(get_line(src)?)
}

fn parse_length(line: &[u8]) -> Result<Option<usize>, Error> {
    match parse_integer(line) {
        Some(-1) => Ok(None),
        Some(length) => usize::try_from(length)
            .map(Some)
            .map_err(|_| Error::InvalidLength(lossy(line))),
        None => Err(Error::InvalidLength(lossy(line))),
    }
}

fn parse_integer(line: &[u8]) -> Option<i64> {
    std::str::from_utf8(line).ok()?.parse::<i64>().ok()
}

// Simple strings and errors end at the first CRLF, a lone CR or LF before it is malformed.
fn check_line(line: &[u8]) -> Result<&[u8], Error> {
    if line.iter().any(|&b| b == b'\r' || b == b'\n') {
        return Err(Error::BareLineBreak);
    }
    Ok(line)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let buf: &'a [u8] = *src.get_ref();
    let start = src.position() as usize;

    let line_end = buf[start..]
        .windows(2)
        .position(|window| window == CRLF)
        .map(|index| start + index)
        .ok_or(Error::Incomplete)?;

    src.set_position((line_end + CRLF.len()) as u64);

    Ok(&buf[start..line_end])
}

/// Reads exactly `length` bytes followed by CRLF.
fn get_exact<'a>(src: &mut Cursor<&'a [u8]>, length: usize) -> Result<&'a [u8], Error> {
    let buf: &'a [u8] = *src.get_ref();
    let start = src.position() as usize;

    let end = start
        .checked_add(length)
        .filter(|end| end.checked_add(CRLF.len()).is_some())
        .ok_or_else(|| Error::InvalidLength(length.to_string()))?;

    if buf.len() < end + CRLF.len() {
        return Err(Error::Incomplete);
    }

    if &buf[end..end + CRLF.len()] != CRLF {
        return Err(Error::MissingTerminator);
    }

    src.set_position((end + CRLF.len()) as u64);

    Ok(&buf[start..end])
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

/// Finds where the frame at the start of a growing buffer ends, without building it.
///
/// The scan resumes where the previous call stopped, so feeding a large frame in many small reads
/// only looks at each byte about once. The buffer passed on every call must start with the same
/// bytes, i.e. nothing may be consumed from it until the frame is complete.
#[derive(Debug, Clone, Default)]
pub(crate) struct Scanner {
    // Start of the next value to look at.
    offset: usize,
    // Where the search for the CRLF ending the current line picks up again.
    line_searched: usize,
    // Elements still missing from each open array, innermost last.
    pending: Vec<usize>,
}

impl Scanner {
    /// Returns the length of the frame once `buf` holds all of it.
    ///
    /// Declared lengths above `max_size` are rejected as soon as they are read, before their
    /// payload is buffered. Errors match the ones `Frame::parse_with_depth` reports, except that
    /// array elements are not wrapped with their index.
    pub(crate) fn scan(
        &mut self,
        buf: &[u8],
        max_depth: usize,
        max_size: usize,
    ) -> Result<Option<usize>, Error> {
        loop {
            let Some(&first_byte) = buf.get(self.offset) else {
                return Ok(None);
            };
            let data_type = DataType::try_from(first_byte)?;

            let line_start = self.offset + 1;
            let Some(line_end) = self.find_line_end(buf, line_start) else {
                return Ok(None);
            };
            let line = &buf[line_start..line_end];
            let mut next = line_end + CRLF.len();

            match data_type {
                DataType::SimpleString | DataType::SimpleError => {
                    check_line(line)?;
                }
                DataType::Integer => {
                    parse_integer(line).ok_or_else(|| Error::InvalidInteger(lossy(line)))?;
                }
                DataType::BulkString => {
                    if let Some(length) = parse_length(line)? {
                        if length > max_size {
                            return Err(Error::FrameTooLarge { limit: max_size });
                        }

                        // `line_searched` stays put, so the next call finds this short header
                        // again and comes straight back here.
                        let end = next + length;
                        if buf.len() < end + CRLF.len() {
                            return Ok(None);
                        }
                        if &buf[end..end + CRLF.len()] != CRLF {
                            return Err(Error::MissingTerminator);
                        }
                        next = end + CRLF.len();
                    }
                }
                DataType::Array => {
                    if let Some(length) = parse_length(line)? {
                        if self.pending.len() >= max_depth {
                            return Err(Error::NestingTooDeep(max_depth));
                        }
                        if length > max_size {
                            return Err(Error::FrameTooLarge { limit: max_size });
                        }

                        if length > 0 {
                            self.pending.push(length);
                            self.offset = next;
                            self.line_searched = next;
                            continue;
                        }
                    }
                }
            }

            self.offset = next;
            self.line_searched = next;

            // A value is done, close every array it completes.
            loop {
                let Some(remaining) = self.pending.last_mut() else {
                    let length = self.offset;
                    self.reset();
                    return Ok(Some(length));
                };

                *remaining -= 1;
                if *remaining > 0 {
                    break;
                }
                self.pending.pop();
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.offset = 0;
        self.line_searched = 0;
        self.pending.clear();
    }

    fn find_line_end(&mut self, buf: &[u8], line_start: usize) -> Option<usize> {
        let from = self.line_searched.max(line_start);

        match buf[from..].windows(2).position(|window| window == CRLF) {
            Some(index) => Some(from + index),
            None => {
                // The last byte could be the CR of a CRLF that is still on its way.
                self.line_searched = buf.len().saturating_sub(1).max(line_start);
                None
            }
        }
    }
}

pub(crate) fn put_simple(dst: &mut BytesMut, value: &[u8]) {
    put_line(dst, DataType::SimpleString, value);
}

pub(crate) fn put_error(dst: &mut BytesMut, message: &[u8]) {
    put_line(dst, DataType::SimpleError, message);
}

pub(crate) fn put_integer(dst: &mut BytesMut, value: i64) {
    put_line(dst, DataType::Integer, value.to_string().as_bytes());
}

pub(crate) fn put_bulk(dst: &mut BytesMut, value: &[u8]) {
    let length = value.len().to_string();
    dst.reserve(1 + length.len() + CRLF.len() + value.len() + CRLF.len());
    dst.put_u8(DataType::BulkString.into());
    dst.put_slice(length.as_bytes());
    dst.put_slice(CRLF);
    dst.put_slice(value);
    dst.put_slice(CRLF);
}

pub(crate) fn put_null(dst: &mut BytesMut) {
    put_line(dst, DataType::BulkString, b"-1");
}

pub(crate) fn put_array_header(dst: &mut BytesMut, len: usize) {
    put_line(dst, DataType::Array, len.to_string().as_bytes());
}

pub(crate) fn put_null_array(dst: &mut BytesMut) {
    put_line(dst, DataType::Array, b"-1");
}

// Line payloads can't carry CR or LF, they would end the line early.
fn put_line(dst: &mut BytesMut, data_type: DataType, payload: &[u8]) {
    dst.reserve(1 + payload.len() + CRLF.len());
    dst.put_u8(data_type.into());
    dst.extend(payload.iter().map(|&b| match b {
        b'\r' | b'\n' => b' ',
        b => b,
    }));
    dst.put_slice(CRLF);
}

#[derive(Debug, Clone, Copy)]
enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
        }
    }
}
