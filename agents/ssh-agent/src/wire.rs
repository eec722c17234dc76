//! SSH agent wire-format primitives: big-endian `byte`, `uint32`, `string`,
//! `boolean` and `mpint` encode/decode, plus a length-prefixed `composite`
//! helper.
//!
//! Readers never panic on malformed input; every reader returns a
//! [`WireError`] instead.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use thiserror::Error;

/// Ceiling applied to any single length-prefixed region read off the wire,
/// both for incoming frames and upstream-agent responses.
pub const MAX_MESSAGE_LEN: usize = 256 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("insufficient data to decode field")]
    InsufficientData,
    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

pub type WireResult<T> = Result<T, WireError>;

/// A cursor over a borrowed byte slice, used to parse wire primitives
/// without copying the underlying buffer until a `string`/`mpint` value is
/// actually extracted.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn read_byte(&mut self) -> WireResult<u8> {
        if self.pos >= self.buf.len() {
            return Err(WireError::InsufficientData);
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u32(&mut self) -> WireResult<u32> {
        if self.pos + 4 > self.buf.len() {
            return Err(WireError::InsufficientData);
        }
        let v = BigEndian::read_u32(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(v)
    }

    pub fn read_bool(&mut self) -> WireResult<bool> {
        Ok(self.read_byte()? != 0)
    }

    /// Read a length-prefixed `string` and return its raw bytes.
    pub fn read_string(&mut self) -> WireResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        if len > MAX_MESSAGE_LEN {
            return Err(WireError::InvalidFormat("string exceeds size ceiling".into()));
        }
        if self.pos + len > self.buf.len() {
            return Err(WireError::InsufficientData);
        }
        let data = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(data)
    }

    /// Read a length-prefixed UTF-8 `string`.
    pub fn read_utf8_string(&mut self) -> WireResult<String> {
        let bytes = self.read_string()?;
        String::from_utf8(bytes).map_err(|e| WireError::InvalidFormat(e.to_string()))
    }

    /// Read an `mpint`: the raw payload of a length-prefixed string, which
    /// may include the sign-padding `0x00` byte.
    pub fn read_mpint(&mut self) -> WireResult<Vec<u8>> {
        self.read_string()
    }
}

/// Write a `uint32` in big-endian order.
pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.write_u32::<BigEndian>(v).expect("Vec<u8> write never fails");
}

/// Write a length-prefixed `string`.
pub fn write_string(buf: &mut Vec<u8>, s: &[u8]) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s);
}

/// Write a `boolean`.
pub fn write_bool(buf: &mut Vec<u8>, v: bool) {
    buf.push(if v { 1 } else { 0 });
}

/// Write an `mpint`: strip leading zero bytes, then re-add a single
/// `0x00` sign-pad if the high bit of the first remaining byte is set.
/// A zero value is written as a zero-length string.
pub fn write_mpint(buf: &mut Vec<u8>, n: &[u8]) {
    let mut i = 0;
    while i < n.len() && n[i] == 0 {
        i += 1;
    }
    if i == n.len() {
        write_u32(buf, 0);
        return;
    }
    if n[i] & 0x80 != 0 {
        write_u32(buf, (n.len() - i + 1) as u32);
        buf.push(0);
    } else {
        write_u32(buf, (n.len() - i) as u32);
    }
    buf.extend_from_slice(&n[i..]);
}

/// Strip at most one leading sign-pad zero from an mpint payload and
/// left-zero-pad the result to exactly `n` bytes. Used to normalize ECDSA
/// `r`/`s` values read off the wire back to fixed-width field elements.
pub fn mpint_to_fixed(mpint: &[u8], n: usize) -> WireResult<Vec<u8>> {
    let trimmed = if mpint.len() == n + 1 && mpint[0] == 0 {
        &mpint[1..]
    } else {
        mpint
    };
    if trimmed.len() > n {
        return Err(WireError::InvalidFormat(format!(
            "mpint of {} bytes does not fit in {} bytes",
            trimmed.len(),
            n
        )));
    }
    let mut out = vec![0u8; n - trimmed.len()];
    out.extend_from_slice(trimmed);
    Ok(out)
}

/// Capture the output of `f` into a length-prefixed `string` region
/// (the `composite` primitive).
pub fn write_composite(buf: &mut Vec<u8>, f: impl FnOnce(&mut Vec<u8>)) {
    let mut inner = Vec::new();
    f(&mut inner);
    write_string(buf, &inner);
}
