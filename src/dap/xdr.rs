//! XDR stream primitives: the shared decode cursor and byte-order handling.
//!
//! The whole DATADDS binary section is a run of big-endian 4-byte XDR units.
//! One `XdrStream` holds that section together with the single, shared decode
//! position every navigation operation temporarily moves and must put back;
//! [`XdrStream::scoped`] is the guard that makes the put-back unconditional.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use super::error::{DapError, Result};

/// Size of one XDR unit.
pub const BYTES_PER_XDR_UNIT: usize = 4;

/// Tag byte opening one sequence record (stored in a full opaque unit).
pub const START_OF_SEQUENCE: u8 = 0x5A;

/// Tag byte closing a sequence's record run (stored in a full opaque unit).
pub const END_OF_SEQUENCE: u8 = 0xA5;

/// The literal separators between a DATADDS response's DDS preamble and its
/// binary section.
const DATA_MARKER_CRLF: &[u8] = b"Data:\r\n";
const DATA_MARKER_LF: &[u8] = b"Data:\n";

/// How far back from the payload end to look for an embedded server error.
const ERROR_SCAN_WINDOW: usize = 512;

/// Platform byte-order facts, computed once and threaded explicitly into every
/// codec call (never read from hidden globals).
#[derive(Debug, Clone, Copy)]
pub struct Endianness {
    /// Native integer byte order differs from network order.
    pub swap_units: bool,
    /// The two units of a 64-bit value arrive low-word first.
    pub swap_double_words: bool,
}

impl Endianness {
    /// Detect by round-tripping a probe integer and a probe double through
    /// the wire encoding, the same handshake the connection layer performs at
    /// startup.
    pub fn detect() -> Self {
        let probe: u32 = 0x0102_0304;
        let swap_units = probe.to_be_bytes() != probe.to_ne_bytes();

        // Reassemble a probe double from its two wire units, high word first.
        // No supported target stores doubles word-swapped relative to its
        // integers, but the round trip keeps the check honest.
        let bits = 1.0f64.to_bits();
        let (hi, lo) = ((bits >> 32) as u32, bits as u32);
        let reassembled = ((hi as u64) << 32) | lo as u64;
        let swap_double_words = f64::from_bits(reassembled) != 1.0;

        Endianness {
            swap_units,
            swap_double_words,
        }
    }

    /// Decode one raw unit into a native u32.
    pub(crate) fn unit(&self, raw: [u8; 4]) -> u32 {
        let v = u32::from_ne_bytes(raw);
        if self.swap_units {
            v.swap_bytes()
        } else {
            v
        }
    }

    /// Join the two units of a 64-bit value in wire order.
    pub(crate) fn quad(&self, first: u32, second: u32) -> u64 {
        let (hi, lo) = if self.swap_double_words {
            (second, first)
        } else {
            (first, second)
        };
        ((hi as u64) << 32) | lo as u64
    }
}

/// The binary section of one DATADDS response plus the shared decode position.
///
/// The position is process-wide mutable state for its tree: callers own
/// serialization (one tree, one thread at a time), and every operation that
/// moves it runs inside [`XdrStream::scoped`] so the entry offset is restored
/// on success and on error alike.
pub struct XdrStream {
    data: Vec<u8>,
    bod: usize,
    pos: usize,
}

impl XdrStream {
    /// Wrap a payload whose beginning-of-data offset is already known.
    pub fn new(data: Vec<u8>, bod: usize) -> Result<Self> {
        if bod > data.len() {
            return Err(DapError::MalformedStream(format!(
                "BOD offset {} beyond payload of {} bytes",
                bod,
                data.len()
            )));
        }
        Ok(XdrStream {
            data,
            pos: bod,
            bod,
        })
    }

    /// Split a raw DATADDS response at the literal `Data:` marker.
    ///
    /// Returns the DDS preamble text and the stream positioned at BOD.
    pub fn from_response(raw: Vec<u8>) -> Result<(String, Self)> {
        let (text_end, bod) = find_marker(&raw, DATA_MARKER_CRLF)
            .or_else(|| find_marker(&raw, DATA_MARKER_LF))
            .ok_or_else(|| {
                DapError::MalformedStream("response carries no Data: separator".to_string())
            })?;
        let text = String::from_utf8_lossy(&raw[..text_end]).into_owned();
        Ok((text, XdrStream::new(raw, bod)?))
    }

    /// Beginning-of-data offset.
    pub fn bod(&self) -> usize {
        self.bod
    }

    /// Total payload length (preamble included).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Current decode position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(DapError::MalformedStream(format!(
                "seek to {} beyond payload of {} bytes",
                offset,
                self.data.len()
            )));
        }
        self.pos = offset;
        Ok(())
    }

    /// Run `f` with the position moved to `offset`, restoring the entry
    /// position on every exit path.
    pub(crate) fn scoped<T>(
        &mut self,
        offset: usize,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let saved = self.pos;
        self.seek(offset)?;
        let out = f(self);
        self.pos = saved;
        out
    }

    fn require(&self, n: usize) -> Result<()> {
        if self.pos + n > self.data.len() {
            return Err(DapError::MalformedStream(format!(
                "need {} bytes at offset {}, payload holds {}",
                n,
                self.pos,
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Advance past `n` raw bytes.
    pub(crate) fn skip(&mut self, n: usize) -> Result<()> {
        self.require(n)?;
        self.pos += n;
        Ok(())
    }

    /// One raw unit, byte order untouched.
    pub(crate) fn read_raw_unit(&mut self) -> Result<[u8; 4]> {
        self.require(BYTES_PER_XDR_UNIT)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        self.pos += BYTES_PER_XDR_UNIT;
        Ok(raw)
    }

    /// A leading element or length count (network order).
    pub(crate) fn read_count(&mut self) -> Result<usize> {
        self.require(BYTES_PER_XDR_UNIT)?;
        let n = BigEndian::read_u32(&self.data[self.pos..]);
        self.pos += BYTES_PER_XDR_UNIT;
        Ok(n as usize)
    }

    /// The tag byte of a sequence record boundary (one opaque unit).
    pub(crate) fn read_tag(&mut self) -> Result<u8> {
        Ok(self.read_raw_unit()?[0])
    }

    /// Bulk-read `n` raw bytes (no pad handling).
    pub(crate) fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.require(n)?;
        let out = self.data[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    /// Skip one `(length, bytes, pad)` string value.
    pub(crate) fn skip_string(&mut self) -> Result<()> {
        let len = self.read_count()?;
        self.skip(padded(len))
    }

    /// Read one `(length, bytes, pad)` string value.
    pub(crate) fn read_string(&mut self) -> Result<String> {
        let len = self.read_count()?;
        let bytes = self.read_bytes(len)?;
        self.skip(padded(len) - len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Best-effort scan of the payload tail for an embedded `Error { ... }`
    /// message a server may have appended in place of missing data.
    pub(crate) fn embedded_error_message(&self) -> Option<String> {
        let from = self.data.len().saturating_sub(ERROR_SCAN_WINDOW);
        let tail = &self.data[from..];
        let start = find_marker(tail, b"Error {").map(|(s, _)| s)?;
        let end = tail[start..]
            .iter()
            .position(|&b| b == b'}')
            .map(|p| start + p + 1)
            .unwrap_or(tail.len());
        Some(String::from_utf8_lossy(&tail[start..end]).into_owned())
    }
}

impl fmt::Debug for XdrStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XdrStream")
            .field("len", &self.data.len())
            .field("bod", &self.bod)
            .field("pos", &self.pos)
            .finish()
    }
}

/// Round a byte length up to the enclosing unit boundary.
pub(crate) fn padded(len: usize) -> usize {
    (len + BYTES_PER_XDR_UNIT - 1) & !(BYTES_PER_XDR_UNIT - 1)
}

/// Find `marker` in `haystack`; returns (match start, end-of-marker offset).
fn find_marker(haystack: &[u8], marker: &[u8]) -> Option<(usize, usize)> {
    haystack
        .windows(marker.len())
        .position(|w| w == marker)
        .map(|p| (p, p + marker.len()))
}
