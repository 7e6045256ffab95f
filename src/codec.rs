//! Binary framing for everything kyro-resolve writes to disk or to a
//! key-value backend.
//!
//! Every frame is:
//! ```text
//! [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```
//! Files (resolver journal, index snapshots) additionally start with a
//! magic + version header.

use std::io::{Cursor, Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying kyro-resolve files.
pub const MAGIC: [u8; 4] = *b"KYRS";

const MAX_ENTRY_SIZE: usize = 100 * 1024 * 1024;

/// Serializes a value into a checksummed frame. Fails for frames that
/// [`decode`] would refuse to read back.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;

    if data.len() > MAX_ENTRY_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("entry size {} exceeds maximum {MAX_ENTRY_SIZE}", data.len()),
        ));
    }
    let len = u32::try_from(data.len())
        .map_err(|_| IoError::new(ErrorKind::InvalidData, "frame exceeds u32 length"))?;

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_le_bytes());

    Ok(out)
}

/// Reads one frame from a stream, verifying its checksum.
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;

    if version[0] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported codec version: {} (expected {CODEC_VERSION})", version[0]),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_ENTRY_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("entry size {len} exceeds maximum {MAX_ENTRY_SIZE}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed_crc = hasher.finalize();

    if stored_crc != computed_crc {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x} (data corrupted)"),
        ));
    }

    serde_json::from_slice(&data)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}

/// Decodes a single frame held in memory (a KV value).
pub fn decode_slice<T: DeserializeOwned>(bytes: &[u8]) -> IoResult<T> {
    let mut cursor = Cursor::new(bytes);
    let value = decode(&mut cursor)?;
    if cursor.position() as usize != bytes.len() {
        return Err(IoError::new(ErrorKind::InvalidData, "trailing bytes after frame"));
    }
    Ok(value)
}

/// Writes the file header (magic + version).
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])?;
    Ok(())
}

/// Reads and validates the file header, returning the version byte.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;

    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;

    Ok(version[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judgement::Judgement;

    #[test]
    fn test_detects_corruption() {
        let value = "test data".to_string();
        let mut encoded = encode(&value).unwrap();
        encoded[8] ^= 0xFF;

        let result: IoResult<String> = decode_slice(&encoded);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("CRC") || err.to_string().contains("deserialization"));
    }

    #[test]
    fn test_rejects_oversized_entry() {
        let mut bad_data = vec![CODEC_VERSION];
        bad_data.extend_from_slice(&(200_000_000u32).to_le_bytes());

        let result: IoResult<String> = decode(&mut Cursor::new(bad_data));
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_encode_refuses_what_decode_rejects() {
        let value = "x".repeat(MAX_ENTRY_SIZE);
        let err = encode(&value).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_header_roundtrip() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(read_header(&mut Cursor::new(buf)).unwrap(), CODEC_VERSION);
    }

    #[test]
    fn test_rejects_foreign_header() {
        let result = read_header(&mut Cursor::new(b"KYRO\x01".to_vec()));
        assert!(result.unwrap_err().to_string().contains("invalid magic"));
    }

    #[test]
    fn test_decode_slice_rejects_trailing_bytes() {
        let mut encoded = encode(&Judgement::Negative).unwrap();
        encoded.push(0);
        assert!(decode_slice::<Judgement>(&encoded).is_err());
    }

    #[test]
    fn test_frames_concatenate_in_stream() {
        let mut buf = encode(&Judgement::Positive).unwrap();
        buf.extend(encode(&Judgement::Unsure).unwrap());

        let mut cursor = Cursor::new(buf);
        let first: Judgement = decode(&mut cursor).unwrap();
        let second: Judgement = decode(&mut cursor).unwrap();
        assert_eq!(first, Judgement::Positive);
        assert_eq!(second, Judgement::Unsure);
    }
}
