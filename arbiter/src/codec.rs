//! # Canonical encoding and decoding for the arbiter
//!
//! The purpose of this module is to define how to encode and decode the
//! types that cross a trust boundary: transactions, merkle proofs,
//! withdraw records, and signed-proposal envelopes.
//!
//! ## Codec specification
//!
//! The encoding is canonical so that every committee member derives
//! byte-identical serializations, and therefore identical hashes, for the
//! same value. The rules are:
//! 1. Fields are written in declaration order, big-endian, with no
//!    padding.
//! 2. Variable-length byte strings and collections carry a `u32`
//!    big-endian length prefix.
//! 3. Transactions have two forms: the *unsigned* form, which excludes
//!    the witness programs and is the preimage for transaction hashes and
//!    signatures, and the *signed* form, which appends them.
//! 4. Any trailing or missing bytes are a decode error.
//!
//! Decode failures surface as [`Error::Malformed`]; IO failures as
//! [`Error::CodecIo`].

use std::io;

use crate::error::Error;

/// Provides a method for encoding an object into a writer using the
/// canonical serialization format.
pub trait Encode {
    /// Encodes the calling object into the writer.
    fn encode<W: io::Write>(&self, writer: &mut W) -> Result<(), Error>;

    /// Encodes the calling object into a vector of bytes.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        #[allow(clippy::expect_used)]
        self.encode(&mut buf).expect("encoding into a Vec failed");
        buf
    }
}

/// Provides a method for decoding an object from a reader using the
/// canonical deserialization format.
pub trait Decode: Sized {
    /// Decodes an object from a reader in the canonical format.
    fn decode<R: io::Read>(reader: &mut R) -> Result<Self, Error>;

    /// Decodes an object from a byte slice, requiring that the slice is
    /// consumed exactly.
    fn decode_all(bytes: &[u8]) -> Result<Self, Error> {
        let mut reader = bytes;
        let value = Self::decode(&mut reader)?;
        if !reader.is_empty() {
            return Err(Error::Malformed("trailing bytes after decode"));
        }
        Ok(value)
    }
}

/// The largest length prefix accepted while decoding. Wire messages are
/// bounded by the block size, so anything above this is garbage and would
/// only serve as an allocation bomb.
const MAX_DECODE_LENGTH: u32 = 16_000_000;

pub(crate) fn write_u8<W: io::Write>(w: &mut W, value: u8) -> Result<(), Error> {
    w.write_all(&[value]).map_err(Error::CodecIo)
}

pub(crate) fn write_u16<W: io::Write>(w: &mut W, value: u16) -> Result<(), Error> {
    w.write_all(&value.to_be_bytes()).map_err(Error::CodecIo)
}

pub(crate) fn write_u32<W: io::Write>(w: &mut W, value: u32) -> Result<(), Error> {
    w.write_all(&value.to_be_bytes()).map_err(Error::CodecIo)
}

pub(crate) fn write_i64<W: io::Write>(w: &mut W, value: i64) -> Result<(), Error> {
    w.write_all(&value.to_be_bytes()).map_err(Error::CodecIo)
}

pub(crate) fn write_bytes<W: io::Write>(w: &mut W, bytes: &[u8]) -> Result<(), Error> {
    w.write_all(bytes).map_err(Error::CodecIo)
}

/// Write a `u32` length prefix followed by the bytes themselves.
pub(crate) fn write_var_bytes<W: io::Write>(w: &mut W, bytes: &[u8]) -> Result<(), Error> {
    let len = u32::try_from(bytes.len()).map_err(|_| Error::Malformed("byte string too long"))?;
    write_u32(w, len)?;
    write_bytes(w, bytes)
}

pub(crate) fn write_var_string<W: io::Write>(w: &mut W, value: &str) -> Result<(), Error> {
    write_var_bytes(w, value.as_bytes())
}

pub(crate) fn read_u8<R: io::Read>(r: &mut R) -> Result<u8, Error> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).map_err(Error::CodecIo)?;
    Ok(buf[0])
}

pub(crate) fn read_u16<R: io::Read>(r: &mut R) -> Result<u16, Error> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf).map_err(Error::CodecIo)?;
    Ok(u16::from_be_bytes(buf))
}

pub(crate) fn read_u32<R: io::Read>(r: &mut R) -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(Error::CodecIo)?;
    Ok(u32::from_be_bytes(buf))
}

pub(crate) fn read_i64<R: io::Read>(r: &mut R) -> Result<i64, Error> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(Error::CodecIo)?;
    Ok(i64::from_be_bytes(buf))
}

pub(crate) fn read_array<const N: usize, R: io::Read>(r: &mut R) -> Result<[u8; N], Error> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(Error::CodecIo)?;
    Ok(buf)
}

/// Read a `u32` length prefix followed by that many bytes.
pub(crate) fn read_var_bytes<R: io::Read>(r: &mut R) -> Result<Vec<u8>, Error> {
    let len = read_u32(r)?;
    if len > MAX_DECODE_LENGTH {
        return Err(Error::Malformed("length prefix exceeds maximum"));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).map_err(Error::CodecIo)?;
    Ok(buf)
}

pub(crate) fn read_var_string<R: io::Read>(r: &mut R) -> Result<String, Error> {
    let bytes = read_var_bytes(r)?;
    String::from_utf8(bytes).map_err(|_| Error::Malformed("string is not utf-8"))
}

/// Read a `u32` collection count, bounded like any other length prefix.
pub(crate) fn read_count<R: io::Read>(r: &mut R) -> Result<usize, Error> {
    let count = read_u32(r)?;
    if count > MAX_DECODE_LENGTH {
        return Err(Error::Malformed("collection count exceeds maximum"));
    }
    Ok(count as usize)
}
