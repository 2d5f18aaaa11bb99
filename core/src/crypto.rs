use crate::{Error, Result};
use argon2::Argon2;
use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::stream::{DecryptorBE32, EncryptorBE32};
use chacha20poly1305::{ChaCha20Poly1305, KeyInit};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};

const MAGIC: &[u8; 6] = b"DVENC2";
/// Argon2 memory, iterations and parallelism as little-endian `u32`s.
const KDF_PARAMS_LEN: usize = 12;
/// Headers asking for more Argon2 memory than this are treated as corrupt.
const MAX_MEMORY_KIB: u32 = 4 * 1024 * 1024;
const SALT_LEN: usize = 16;
/// ChaCha20-Poly1305 nonce minus the 5 bytes the STREAM construction reserves.
const STREAM_NONCE_LEN: usize = 7;
const TAG_LEN: usize = 16;
pub const CHUNK_SIZE: usize = 64 * 1024;

const FLAG_MORE: u8 = 0;
const FLAG_LAST: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    fn to_bytes(&self) -> [u8; KDF_PARAMS_LEN] {
        let mut bytes = [0u8; KDF_PARAMS_LEN];
        bytes[..4].copy_from_slice(&self.memory_kib.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.iterations.to_le_bytes());
        bytes[8..].copy_from_slice(&self.parallelism.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8; KDF_PARAMS_LEN]) -> Result<Self> {
        let field = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let params = Self {
            memory_kib: field(0),
            iterations: field(4),
            parallelism: field(8),
        };
        if params.memory_kib > MAX_MEMORY_KIB {
            return Err(Error::EncryptionFailed(format!(
                "Key derivation asks for {} KiB of memory",
                params.memory_kib
            )));
        }
        Ok(params)
    }
}

pub struct MasterKey {
    key: [u8; 32],
}

impl MasterKey {
    pub fn derive_from_secret(secret: &str, salt: &[u8], params: &KdfParams) -> Result<Self> {
        let argon2 = Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            argon2::Params::new(params.memory_kib, params.iterations, params.parallelism, Some(32))
                .map_err(|e| Error::EncryptionFailed(e.to_string()))?,
        );

        let mut key = [0u8; 32];
        argon2
            .hash_password_into(secret.as_bytes(), salt, &mut key)
            .map_err(|e| Error::EncryptionFailed(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(GenericArray::from_slice(&self.key))
    }
}

/// Streaming authenticated encryption keyed by a secret.
///
/// Each stream gets a fresh salt and nonce, so the same secret never reuses
/// a (key, nonce) pair. The payload is cut into [`CHUNK_SIZE`] pieces sealed
/// with the STREAM construction, which authenticates chunk order and the
/// final chunk; truncation, reordering and tampering all fail to decrypt.
#[derive(Clone)]
pub struct StreamCipher {
    secret: String,
    params: KdfParams,
}

impl std::fmt::Debug for StreamCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCipher")
            .field("secret", &"<redacted>")
            .field("params", &self.params)
            .finish()
    }
}

impl StreamCipher {
    pub fn new(secret: impl Into<String>, params: KdfParams) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(Error::Config("Encryption key must not be empty".to_string()));
        }
        Ok(Self { secret, params })
    }

    /// Encrypts everything from `reader` into `writer`, returning the number
    /// of plaintext bytes consumed.
    pub fn encrypt<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<u64> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; STREAM_NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce);

        let key = MasterKey::derive_from_secret(&self.secret, &salt, &self.params)?;
        let mut encryptor = EncryptorBE32::from_aead(key.cipher(), GenericArray::from_slice(&nonce));

        writer.write_all(MAGIC)?;
        writer.write_all(&self.params.to_bytes())?;
        writer.write_all(&salt)?;
        writer.write_all(&nonce)?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;

        loop {
            let read = read_full(&mut reader, &mut buffer)?;
            total += read as u64;

            if read < CHUNK_SIZE {
                let ciphertext = encryptor
                    .encrypt_last(&buffer[..read])
                    .map_err(|e| Error::EncryptionFailed(format!("final chunk: {}", e)))?;
                write_chunk(&mut writer, FLAG_LAST, &ciphertext)?;
                break;
            }

            let ciphertext = encryptor
                .encrypt_next(&buffer[..read])
                .map_err(|e| Error::EncryptionFailed(format!("chunk: {}", e)))?;
            write_chunk(&mut writer, FLAG_MORE, &ciphertext)?;
        }

        writer.flush()?;
        Ok(total)
    }

    /// Decrypts a stream produced by [`StreamCipher::encrypt`], returning the
    /// number of plaintext bytes written. The key is derived with the KDF
    /// parameters recorded in the stream, not the ones this cipher encrypts with.
    pub fn decrypt<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<u64> {
        let mut magic = [0u8; MAGIC.len()];
        read_header(&mut reader, &mut magic)?;
        if &magic != MAGIC {
            return Err(Error::EncryptionFailed("Not an encrypted backup stream".to_string()));
        }

        let mut kdf = [0u8; KDF_PARAMS_LEN];
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; STREAM_NONCE_LEN];
        read_header(&mut reader, &mut kdf)?;
        read_header(&mut reader, &mut salt)?;
        read_header(&mut reader, &mut nonce)?;

        let params = KdfParams::from_bytes(&kdf)?;
        let key = MasterKey::derive_from_secret(&self.secret, &salt, &params)?;
        let mut decryptor = DecryptorBE32::from_aead(key.cipher(), GenericArray::from_slice(&nonce));

        let mut total = 0u64;
        let mut index = 0u64;

        loop {
            let mut flag = [0u8; 1];
            read_header(&mut reader, &mut flag)?;
            let mut len_bytes = [0u8; 4];
            read_header(&mut reader, &mut len_bytes)?;
            let len = u32::from_le_bytes(len_bytes) as usize;
            if len < TAG_LEN || len > CHUNK_SIZE + TAG_LEN {
                return Err(Error::EncryptionFailed(format!("Invalid chunk length {} at chunk {}", len, index)));
            }

            let mut ciphertext = vec![0u8; len];
            read_header(&mut reader, &mut ciphertext)?;

            match flag[0] {
                FLAG_LAST => {
                    let plaintext = decryptor
                        .decrypt_last(ciphertext.as_slice())
                        .map_err(|_| Error::EncryptionFailed(format!("Authentication failed at chunk {}", index)))?;
                    writer.write_all(&plaintext)?;
                    total += plaintext.len() as u64;

                    let mut trailing = [0u8; 1];
                    if reader.read(&mut trailing)? != 0 {
                        return Err(Error::EncryptionFailed("Unexpected data after final chunk".to_string()));
                    }
                    break;
                }
                FLAG_MORE => {
                    let plaintext = decryptor
                        .decrypt_next(ciphertext.as_slice())
                        .map_err(|_| Error::EncryptionFailed(format!("Authentication failed at chunk {}", index)))?;
                    writer.write_all(&plaintext)?;
                    total += plaintext.len() as u64;
                }
                other => {
                    return Err(Error::EncryptionFailed(format!("Invalid chunk flag {} at chunk {}", other, index)));
                }
            }
            index += 1;
        }

        writer.flush()?;
        Ok(total)
    }
}

fn write_chunk<W: Write>(writer: &mut W, flag: u8, ciphertext: &[u8]) -> Result<()> {
    writer.write_all(&[flag])?;
    writer.write_all(&(ciphertext.len() as u32).to_le_bytes())?;
    writer.write_all(ciphertext)?;
    Ok(())
}

fn read_header<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => Error::EncryptionFailed("Encrypted stream is truncated".to_string()),
        _ => Error::Io(e),
    })
}

/// Fills `buf` unless the reader hits EOF first.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

pub fn checksum_reader<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn test_params() -> KdfParams {
        KdfParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn cipher(secret: &str) -> StreamCipher {
        StreamCipher::new(secret, test_params()).unwrap()
    }

    fn encrypt(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        cipher("correct horse").encrypt(Cursor::new(data), &mut out).unwrap();
        out
    }

    fn decrypt_with(secret: &str, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        cipher(secret).decrypt(Cursor::new(data), &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_encryption_roundtrip() {
        let sizes = [0, 1, 17, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 3 * CHUNK_SIZE + 123];
        for size in sizes {
            let plaintext: Vec<u8> = (0..size).map(|i| (i * 31 % 251) as u8).collect();
            let ciphertext = encrypt(&plaintext);
            assert_ne!(&ciphertext[MAGIC.len()..], plaintext.as_slice());
            assert_eq!(decrypt_with("correct horse", &ciphertext).unwrap(), plaintext, "size {}", size);
        }
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let ciphertext = encrypt(b"SELECT 1;");
        assert!(matches!(decrypt_with("battery staple", &ciphertext), Err(Error::EncryptionFailed(_))));
    }

    #[test]
    fn test_tampered_chunk_is_rejected() {
        let mut ciphertext = encrypt(b"INSERT INTO users VALUES (1);");
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert!(matches!(decrypt_with("correct horse", &ciphertext), Err(Error::EncryptionFailed(_))));
    }

    #[test]
    fn test_truncation_is_rejected() {
        let plaintext = vec![7u8; 2 * CHUNK_SIZE + 10];
        let ciphertext = encrypt(&plaintext);

        // Drop the final chunk entirely: the stream ends on a non-final chunk.
        let header = MAGIC.len() + KDF_PARAMS_LEN + SALT_LEN + STREAM_NONCE_LEN;
        let first_two = header + 2 * (1 + 4 + CHUNK_SIZE + TAG_LEN);
        assert!(decrypt_with("correct horse", &ciphertext[..first_two]).is_err());

        // Mark a middle chunk as final.
        let mut forged = ciphertext[..header + 1 + 4 + CHUNK_SIZE + TAG_LEN].to_vec();
        forged[header] = FLAG_LAST;
        assert!(decrypt_with("correct horse", &forged).is_err());
    }

    #[test]
    fn test_trailing_garbage_is_rejected() {
        let mut ciphertext = encrypt(b"data");
        ciphertext.extend_from_slice(b"junk");
        assert!(decrypt_with("correct horse", &ciphertext).is_err());
    }

    #[test]
    fn test_plaintext_input_is_rejected() {
        let result = decrypt_with("correct horse", b"-- PostgreSQL database dump\n");
        assert!(matches!(result, Err(Error::EncryptionFailed(_))));
        assert!(decrypt_with("correct horse", b"").is_err());
    }

    #[test]
    fn test_decrypt_uses_recorded_kdf_params() {
        let ciphertext = encrypt(b"SELECT 1;");
        let retuned = StreamCipher::new(
            "correct horse",
            KdfParams {
                memory_kib: 2048,
                iterations: 3,
                parallelism: 2,
            },
        )
        .unwrap();

        let mut out = Vec::new();
        retuned.decrypt(Cursor::new(&ciphertext), &mut out).unwrap();
        assert_eq!(out, b"SELECT 1;");

        let mut reencrypted = Vec::new();
        retuned.encrypt(Cursor::new(b"SELECT 2;"), &mut reencrypted).unwrap();
        assert_eq!(decrypt_with("correct horse", &reencrypted).unwrap(), b"SELECT 2;");
    }

    #[test]
    fn test_oversized_kdf_header_is_rejected() {
        let mut ciphertext = encrypt(b"data");
        let at = MAGIC.len();
        ciphertext[at..at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(decrypt_with("correct horse", &ciphertext), Err(Error::EncryptionFailed(_))));
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        assert!(StreamCipher::new("", KdfParams::default()).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", cipher("super-secret"));
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn test_checksum_reader() {
        let sum = checksum_reader(Cursor::new(b"abc")).unwrap();
        assert_eq!(sum, blake3::hash(b"abc").to_hex().to_string());
    }
}
