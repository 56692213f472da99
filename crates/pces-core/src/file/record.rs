//! Record framing.
//!
//! ```text
//! header:  magic "PCES" | version: u32 LE
//! record:  len: u32 LE | xxh64(len): u32 LE | xxh64(body): u64 LE | body (len bytes)
//! ```
//!
//! A short read at EOF is a torn tail and ends the readable data. A record
//! that is complete on disk but fails validation is corruption. The length
//! carries its own check so that a damaged length is never mistaken for a
//! body cut short by EOF.

use crate::error::{PcesError, Result};
use std::io::{self, Read, Write};
use std::path::Path;
use twox_hash::XxHash64;

const FILE_MAGIC: [u8; 4] = *b"PCES";
const FILE_VERSION: u32 = 1;

pub(crate) const HEADER_SIZE: u64 = 8;
const RECORD_PREFIX_SIZE: usize = 16;

/// Upper limit on a record body, guards allocations on corrupt lengths.
pub const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

const CHECKSUM_SEED: u64 = 0;
const LENGTH_CHECK_SEED: u64 = 0x5043_4553;

pub(crate) enum HeaderOutcome {
    Valid,
    Empty,
    Partial,
}

pub(crate) enum ReadOutcome {
    Record(Vec<u8>),
    End,
    Partial,
}

/// Reads until `buf` is full or EOF, returning the number of bytes read.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Truncated xxh64 of the encoded length.
fn length_check(len: u32) -> u32 {
    XxHash64::oneshot(LENGTH_CHECK_SEED, &len.to_le_bytes()) as u32
}

fn corrupted(path: &Path, offset: u64, reason: impl Into<String>) -> PcesError {
    PcesError::Corrupted {
        path: path.to_path_buf(),
        offset,
        reason: reason.into(),
    }
}

pub(crate) fn write_header<W: Write>(writer: &mut W) -> io::Result<u64> {
    writer.write_all(&FILE_MAGIC)?;
    writer.write_all(&FILE_VERSION.to_le_bytes())?;
    Ok(HEADER_SIZE)
}

pub(crate) fn read_header<R: Read>(reader: &mut R, path: &Path) -> Result<HeaderOutcome> {
    let mut header = [0u8; HEADER_SIZE as usize];
    let n = read_fully(reader, &mut header)?;

    if n == 0 {
        return Ok(HeaderOutcome::Empty);
    }
    if n < header.len() {
        return Ok(HeaderOutcome::Partial);
    }
    if header[..4] != FILE_MAGIC {
        return Err(corrupted(path, 0, "bad file magic"));
    }

    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != FILE_VERSION {
        return Err(corrupted(path, 4, format!("unsupported version {version}")));
    }

    Ok(HeaderOutcome::Valid)
}

/// Writes one framed record and returns the number of bytes it occupies.
pub(crate) fn write_record<W: Write>(writer: &mut W, body: &[u8]) -> Result<u64> {
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_SIZE)
        .ok_or_else(|| {
            PcesError::InvalidArgument(format!("event of {} bytes is too large", body.len()))
        })?;

    let checksum = XxHash64::oneshot(CHECKSUM_SEED, body);

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&length_check(len).to_le_bytes())?;
    writer.write_all(&checksum.to_le_bytes())?;
    writer.write_all(body)?;

    Ok((RECORD_PREFIX_SIZE + body.len()) as u64)
}

/// Reads the record starting at `offset`.
pub(crate) fn read_record<R: Read>(reader: &mut R, path: &Path, offset: u64) -> Result<ReadOutcome> {
    let mut prefix = [0u8; RECORD_PREFIX_SIZE];
    let n = read_fully(reader, &mut prefix)?;

    if n == 0 {
        return Ok(ReadOutcome::End);
    }
    if n < prefix.len() {
        return Ok(ReadOutcome::Partial);
    }

    let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    let stored_length_check = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
    let mut checksum = [0u8; 8];
    checksum.copy_from_slice(&prefix[8..]);
    let checksum = u64::from_le_bytes(checksum);

    if stored_length_check != length_check(len) {
        return Err(corrupted(path, offset, "record length check mismatch"));
    }
    if len > MAX_RECORD_SIZE {
        return Err(corrupted(path, offset, format!("record length {len} exceeds limit")));
    }

    let mut body = vec![0u8; len as usize];
    let n = read_fully(reader, &mut body)?;
    if n < body.len() {
        return Ok(ReadOutcome::Partial);
    }

    if XxHash64::oneshot(CHECKSUM_SEED, &body) != checksum {
        return Err(corrupted(path, offset, "checksum mismatch"));
    }

    Ok(ReadOutcome::Record(body))
}

pub(crate) fn record_size(body: &[u8]) -> u64 {
    (RECORD_PREFIX_SIZE + body.len()) as u64
}
