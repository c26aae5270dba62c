//! Block cipher gate for encrypted documents.
//!
//! The legacy format encrypts each persistable unit independently with RC4,
//! re-keyed per unit from SHA-1(password-hash ‖ block-number), where the
//! block number is the unit's persist id (0 for pictures). Re-keying is a
//! pure function of the descriptor and the block number; cipher state is
//! never carried from one block to the next.

pub mod picture;

use crate::consts::{MAX_RECORD_LENGTH, RECORD_HEADER_SIZE, RecordType};
use crate::error::{Error, Result};
use crate::record::Record;
use rand::TryRngCore;
use rand::rngs::OsRng;
use rc4::{KeyInit, Rc4, StreamCipher, consts::U16};
use sha1::{Digest, Sha1};

/// RC4 keyed with the 16-byte expanded block key.
pub type BlockCipher = Rc4<U16>;

/// AlgID for RC4 in the encryption header.
const ALG_ID_RC4: u32 = 0x0000_6801;
/// AlgIDHash for SHA-1 in the encryption header.
const ALG_ID_HASH_SHA1: u32 = 0x0000_8004;
/// ProviderType PROV_RSA_FULL.
const PROVIDER_TYPE: u32 = 0x0000_0001;
/// fCryptoAPI header flag.
const FLAG_CRYPTO_API: u32 = 0x0000_0004;

const SALT_SIZE: usize = 16;
const VERIFIER_SIZE: usize = 16;
const VERIFIER_HASH_SIZE: usize = 20;

/// Parameters of an encryption session, as serialized in the encryption
/// descriptor record (CryptoAPI RC4 EncryptionInfo).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionDescriptor {
    /// Key length in bits: 40 or 128
    pub key_bits: u32,
    /// Random per-document salt
    pub salt: [u8; SALT_SIZE],
    /// Verifier, encrypted at block 0
    pub encrypted_verifier: [u8; VERIFIER_SIZE],
    /// SHA-1 of the verifier, encrypted with the same block-0 keystream
    pub encrypted_verifier_hash: [u8; VERIFIER_HASH_SIZE],
}

impl EncryptionDescriptor {
    /// Parse from the encryption-descriptor record.
    pub fn from_record(record: &Record) -> Result<Self> {
        if record.record_type() != RecordType::DocumentEncryptionAtom {
            return Err(Error::corrupt(format!(
                "expected an encryption descriptor, got {:?}",
                record.record_type()
            )));
        }
        let payload = record
            .payload()
            .ok_or_else(|| Error::corrupt("encryption descriptor must be an atom"))?;
        Self::parse_payload(payload)
    }

    /// Parse the EncryptionInfo payload.
    pub fn parse_payload(payload: &[u8]) -> Result<Self> {
        let u32_at = |i: usize| -> Result<u32> {
            payload
                .get(i..i + 4)
                .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
                .ok_or_else(|| Error::corrupt("encryption descriptor truncated"))
        };

        let version_major = u32_at(0)? & 0xFFFF;
        if !(2..=4).contains(&version_major) {
            return Err(Error::corrupt(format!(
                "unsupported encryption info version {version_major}"
            )));
        }
        let header_size = u32_at(8)? as usize;
        let header = 12;
        if header_size < 32 || header + header_size > payload.len() {
            return Err(Error::corrupt("encryption header overruns descriptor"));
        }
        let alg_id = u32_at(header + 8)?;
        let alg_id_hash = u32_at(header + 12)?;
        if alg_id != ALG_ID_RC4 || alg_id_hash != ALG_ID_HASH_SHA1 {
            return Err(Error::corrupt(format!(
                "unexpected cipher suite 0x{alg_id:04X}/0x{alg_id_hash:04X} in descriptor"
            )));
        }
        let key_bits = match u32_at(header + 16)? {
            0 => 40, // zero means the 40-bit default
            bits @ (40 | 128) => bits,
            bits => {
                return Err(Error::corrupt(format!("unsupported RC4 key size {bits} bits")));
            }
        };

        let verifier = header + header_size;
        if u32_at(verifier)? as usize != SALT_SIZE {
            return Err(Error::corrupt("unexpected encryption salt size"));
        }
        let take = |start: usize, len: usize| -> Result<&[u8]> {
            payload
                .get(start..start + len)
                .ok_or_else(|| Error::corrupt("encryption verifier truncated"))
        };
        let salt = take(verifier + 4, SALT_SIZE)?.try_into().unwrap();
        let encrypted_verifier =
            take(verifier + 4 + SALT_SIZE, VERIFIER_SIZE)?.try_into().unwrap();
        let hash_size = u32_at(verifier + 4 + SALT_SIZE + VERIFIER_SIZE)? as usize;
        if hash_size != VERIFIER_HASH_SIZE {
            return Err(Error::corrupt("unexpected verifier hash size"));
        }
        let encrypted_verifier_hash = take(
            verifier + 4 + SALT_SIZE + VERIFIER_SIZE + 4,
            VERIFIER_HASH_SIZE,
        )?
        .try_into()
        .unwrap();

        Ok(Self { key_bits, salt, encrypted_verifier, encrypted_verifier_hash })
    }

    /// Serialize the EncryptionInfo payload.
    pub fn build_payload(&self) -> Vec<u8> {
        let csp: &str = if self.key_bits == 40 {
            "Microsoft Base Cryptographic Provider v1.0"
        } else {
            "Microsoft Enhanced Cryptographic Provider v1.0"
        };
        let mut csp_utf16: Vec<u8> = csp.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        csp_utf16.extend_from_slice(&[0, 0]);

        let header_size = 32 + csp_utf16.len() as u32;
        let mut buf = Vec::with_capacity(12 + header_size as usize + 64);
        // Version 4.2 (CryptoAPI), flags, header size.
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&FLAG_CRYPTO_API.to_le_bytes());
        buf.extend_from_slice(&header_size.to_le_bytes());
        // EncryptionHeader.
        buf.extend_from_slice(&FLAG_CRYPTO_API.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // sizeExtra
        buf.extend_from_slice(&ALG_ID_RC4.to_le_bytes());
        buf.extend_from_slice(&ALG_ID_HASH_SHA1.to_le_bytes());
        buf.extend_from_slice(&self.key_bits.to_le_bytes());
        buf.extend_from_slice(&PROVIDER_TYPE.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // reserved1
        buf.extend_from_slice(&0u32.to_le_bytes()); // reserved2
        buf.extend_from_slice(&csp_utf16);
        // EncryptionVerifier.
        buf.extend_from_slice(&(SALT_SIZE as u32).to_le_bytes());
        buf.extend_from_slice(&self.salt);
        buf.extend_from_slice(&self.encrypted_verifier);
        buf.extend_from_slice(&(VERIFIER_HASH_SIZE as u32).to_le_bytes());
        buf.extend_from_slice(&self.encrypted_verifier_hash);
        buf
    }

    /// Wrap the payload in an encryption-descriptor record.
    pub fn to_record(&self) -> Record {
        Record::atom(RecordType::DocumentEncryptionAtom as u16, 0, 0, self.build_payload())
    }
}

/// An opened (password-verified) encryption session.
#[derive(Clone)]
pub struct EncryptionSession {
    descriptor: EncryptionDescriptor,
    /// SHA-1(salt ‖ UTF-16LE password)
    password_hash: [u8; 20],
}

impl std::fmt::Debug for EncryptionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The derived hash never appears in debug output.
        f.debug_struct("EncryptionSession")
            .field("key_bits", &self.descriptor.key_bits)
            .finish_non_exhaustive()
    }
}

impl EncryptionSession {
    /// Open a session against an existing descriptor. The verifier is
    /// checked first; a mismatch surfaces as `WrongPassword` before any
    /// document byte is decrypted.
    pub fn open(descriptor: EncryptionDescriptor, password: &str) -> Result<Self> {
        let password_hash = password_hash(&descriptor.salt, password);
        let session = Self { descriptor, password_hash };

        let mut verifier = session.descriptor.encrypted_verifier;
        let mut verifier_hash = session.descriptor.encrypted_verifier_hash;
        let mut cipher = session.cipher_for_block(0);
        cipher.apply_keystream(&mut verifier);
        cipher.apply_keystream(&mut verifier_hash);

        let expected: [u8; 20] = Sha1::digest(verifier).into();
        if expected != verifier_hash {
            return Err(Error::WrongPassword);
        }
        Ok(session)
    }

    /// Create a fresh 128-bit session with random salt and verifier.
    pub fn create(password: &str) -> Result<Self> {
        let mut salt = [0u8; SALT_SIZE];
        let mut verifier = [0u8; VERIFIER_SIZE];
        let mut rng = OsRng;
        rng.try_fill_bytes(&mut salt)
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        rng.try_fill_bytes(&mut verifier)
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

        let password_hash = password_hash(&salt, password);
        let mut descriptor = EncryptionDescriptor {
            key_bits: 128,
            salt,
            encrypted_verifier: verifier,
            encrypted_verifier_hash: Sha1::digest(verifier).into(),
        };

        // Encrypt verifier and hash with one block-0 keystream, the same
        // order the check in `open` replays.
        let mut session = Self { descriptor: descriptor.clone(), password_hash };
        let mut cipher = session.cipher_for_block(0);
        cipher.apply_keystream(&mut descriptor.encrypted_verifier);
        cipher.apply_keystream(&mut descriptor.encrypted_verifier_hash);
        session.descriptor = descriptor;
        Ok(session)
    }

    /// The session's descriptor (what gets serialized into the stream).
    pub fn descriptor(&self) -> &EncryptionDescriptor {
        &self.descriptor
    }

    /// Derive the 16-byte RC4 key for one block number. 40-bit keys take
    /// the first 5 digest bytes zero-padded to 16; 128-bit keys the first
    /// 16.
    fn key_for_block(&self, block: u32) -> [u8; 16] {
        let mut sha = Sha1::new();
        sha.update(self.password_hash);
        sha.update(block.to_le_bytes());
        let digest = sha.finalize();

        let mut key = [0u8; 16];
        let used = if self.descriptor.key_bits == 40 { 5 } else { 16 };
        key[..used].copy_from_slice(&digest[..used]);
        key
    }

    /// A fresh cipher for one block number. Each encryptable unit gets its
    /// own call; reusing the returned state across block numbers is a bug.
    pub fn cipher_for_block(&self, block: u32) -> BlockCipher {
        BlockCipher::new_from_slice(&self.key_for_block(block)).expect("RC4 key must be 16 bytes")
    }

    /// Apply the keystream for `block` over a whole plaintext record
    /// (header included), yielding its ciphertext form.
    pub fn encrypt_record(&self, plaintext: &[u8], block: u32) -> Vec<u8> {
        let mut out = plaintext.to_vec();
        self.cipher_for_block(block).apply_keystream(&mut out);
        out
    }

    /// Decrypt one record in a stream at `offset`. The header must be
    /// decrypted first to learn the payload length; the keystream then
    /// continues over the payload. Returns the full plaintext record bytes.
    pub fn decrypt_record(&self, data: &[u8], offset: usize, block: u32) -> Result<Vec<u8>> {
        if offset + RECORD_HEADER_SIZE > data.len() {
            return Err(Error::corrupt(format!(
                "encrypted record header at offset {offset} overruns the stream"
            )));
        }
        let mut cipher = self.cipher_for_block(block);
        let mut out = data[offset..offset + RECORD_HEADER_SIZE].to_vec();
        cipher.apply_keystream(&mut out);

        let length = u32::from_le_bytes([out[4], out[5], out[6], out[7]]);
        if length > MAX_RECORD_LENGTH {
            return Err(Error::corrupt(format!(
                "encrypted record at offset {offset} declares implausible length {length}"
            )));
        }
        let payload_start = offset + RECORD_HEADER_SIZE;
        let payload_end = payload_start + length as usize;
        if payload_end > data.len() {
            return Err(Error::corrupt(format!(
                "encrypted record at offset {offset} overruns the stream"
            )));
        }
        out.extend_from_slice(&data[payload_start..payload_end]);
        cipher.apply_keystream(&mut out[RECORD_HEADER_SIZE..]);
        Ok(out)
    }
}

/// SHA-1(salt ‖ UTF-16LE password), the secret every block key derives from.
fn password_hash(salt: &[u8; SALT_SIZE], password: &str) -> [u8; 20] {
    let pw_bytes: Vec<u8> = password.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    let mut sha = Sha1::new();
    sha.update(salt);
    sha.update(&pw_bytes);
    sha.finalize().into()
}
