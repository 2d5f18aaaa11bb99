use crate::{Error, Result};
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::io::{self, Read, Write};

pub const MAX_LEVEL: u32 = 9;

pub fn compress<R: Read, W: Write>(mut reader: R, writer: W, level: u32) -> Result<u64> {
    if level > MAX_LEVEL {
        return Err(Error::CompressionFailed(format!("Invalid compression level {}", level)));
    }

    let mut encoder = GzEncoder::new(writer, Compression::new(level));
    let copied = io::copy(&mut reader, &mut encoder).map_err(|e| Error::CompressionFailed(e.to_string()))?;
    let mut writer = encoder.finish().map_err(|e| Error::CompressionFailed(e.to_string()))?;
    writer.flush().map_err(|e| Error::CompressionFailed(e.to_string()))?;
    Ok(copied)
}

pub fn decompress<R: Read, W: Write>(reader: R, mut writer: W) -> Result<u64> {
    let mut decoder = MultiGzDecoder::new(reader);
    let copied = io::copy(&mut decoder, &mut writer).map_err(|e| Error::CompressionFailed(e.to_string()))?;
    writer.flush().map_err(|e| Error::CompressionFailed(e.to_string()))?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(data: &[u8], level: u32) -> Vec<u8> {
        let mut compressed = Vec::new();
        compress(Cursor::new(data), &mut compressed, level).unwrap();
        let mut restored = Vec::new();
        decompress(Cursor::new(compressed), &mut restored).unwrap();
        restored
    }

    #[test]
    fn test_compression_roundtrip() {
        let binary: Vec<u8> = (0..200_000u32).map(|i| (i.wrapping_mul(2654435761) >> 24) as u8).collect();
        for level in [0, 1, 6, 9] {
            assert_eq!(roundtrip(b"", level), b"");
            assert_eq!(roundtrip(b"CREATE TABLE t (id int);", level), b"CREATE TABLE t (id int);");
            assert_eq!(roundtrip(&binary, level), binary);
        }
    }

    #[test]
    fn test_repetitive_dump_shrinks() {
        let dump = "INSERT INTO events VALUES (1, 'login');\n".repeat(1000);
        let mut compressed = Vec::new();
        compress(Cursor::new(dump.as_bytes()), &mut compressed, 6).unwrap();
        assert!(compressed.len() < dump.len() / 10);
    }

    #[test]
    fn test_invalid_level() {
        let result = compress(Cursor::new(b"x"), Vec::new(), 10);
        assert!(matches!(result, Err(Error::CompressionFailed(_))));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let mut out = Vec::new();
        let result = decompress(Cursor::new(b"definitely not gzip"), &mut out);
        assert!(matches!(result, Err(Error::CompressionFailed(_))));
    }

    #[test]
    fn test_truncated_stream_is_rejected() {
        let mut compressed = Vec::new();
        compress(Cursor::new(vec![1u8; 10_000]), &mut compressed, 6).unwrap();
        compressed.truncate(compressed.len() / 2);
        assert!(decompress(Cursor::new(compressed), Vec::new()).is_err());
    }
}
