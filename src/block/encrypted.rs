//! Encrypted / MultiEncrypted block kinds (spec §4.2).
//!
//! Single-recipient layout, byte-exact and MSB-first:
//!
//! ```text
//! 65 B ephemeral public key | 16 B IV | 16 B auth tag | ciphertext | padding
//! ```
//!
//! `MultiEncrypted` layout:
//!
//! ```text
//! 16 B IV | 16 B auth tag | 4 B dataLength | 2 B recipientCount
//! | recipientCount * (16 B recipientId | 92 B encryptedKey) | ciphertext | padding
//! ```
//!
//! where `encryptedKey` is itself `32 B ephemeral pk | 12 B IV | 16 B tag | 32 B wrapped CEK`.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Key, Nonce, Tag,
};
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha3::Sha3_512;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use super::{Block, BlockDataType, BlockSize, BlockType};
use crate::{
    error::Error,
    identity::{encryption_recipient_id, IDENTITY_ID_LEN},
    pool::PoolId,
};

const EPHEMERAL_FIELD_LEN: usize = 65;
const EPHEMERAL_FORMAT_TAG: u8 = 0x01;
const X25519_KEY_LEN: usize = 32;
const IV_FIELD_LEN: usize = 16;
const AESGCM_NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const CEK_LEN: usize = 32;

/// Length of the single-recipient Encrypted/EncryptedCBL/EncryptedExtendedCBL header.
pub const ENCRYPTED_HEADER_LEN: usize = EPHEMERAL_FIELD_LEN + IV_FIELD_LEN + TAG_LEN;

const MULTI_IV_OFFSET: usize = 0;
const MULTI_TAG_OFFSET: usize = MULTI_IV_OFFSET + IV_FIELD_LEN;
const MULTI_DATA_LEN_OFFSET: usize = MULTI_TAG_OFFSET + TAG_LEN;
const MULTI_RECIPIENT_COUNT_OFFSET: usize = MULTI_DATA_LEN_OFFSET + 4;
const MULTI_FIXED_LEN: usize = MULTI_RECIPIENT_COUNT_OFFSET + 2;

const WRAPPED_KEY_LEN: usize = X25519_KEY_LEN + AESGCM_NONCE_LEN + TAG_LEN + CEK_LEN;
const RECIPIENT_RECORD_LEN: usize = IDENTITY_ID_LEN + WRAPPED_KEY_LEN;

const HKDF_INFO: &[u8] = b"offblock-encrypted-block";

fn derive_key(shared_secret: &[u8; 32], salt: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha3_512>::new(Some(salt), shared_secret);
    let mut okm = [0u8; 32];
    // 32 bytes is well within SHA3-512's output length; this cannot fail.
    hk.expand(HKDF_INFO, &mut okm).expect("HKDF expand of 32 bytes never fails");
    okm
}

fn seal(key: &[u8; 32], nonce_bytes: &[u8; AESGCM_NONCE_LEN], plaintext: &mut [u8]) -> Tag {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .encrypt_in_place_detached(nonce, b"", plaintext)
        .expect("AES-256-GCM seal does not fail for in-bounds buffers")
}

fn open(
    key: &[u8; 32],
    nonce_bytes: &[u8; AESGCM_NONCE_LEN],
    tag_bytes: &[u8; TAG_LEN],
    ciphertext: &mut [u8],
) -> Result<(), Error> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);
    let tag = Tag::from_slice(tag_bytes);
    cipher
        .decrypt_in_place_detached(nonce, b"", ciphertext, tag)
        .map_err(|_| Error::DecryptionFailed)
}

fn write_ephemeral_field(buf: &mut [u8], public: &X25519PublicKey) {
    debug_assert_eq!(buf.len(), EPHEMERAL_FIELD_LEN);
    buf[0] = EPHEMERAL_FORMAT_TAG;
    buf[1..1 + X25519_KEY_LEN].copy_from_slice(public.as_bytes());
    // remaining 32 bytes stay zero
}

fn read_ephemeral_field(buf: &[u8]) -> Result<X25519PublicKey, Error> {
    if buf.len() != EPHEMERAL_FIELD_LEN {
        return Err(Error::InvalidEphemeralPublicKeyLength {
            expected: EPHEMERAL_FIELD_LEN,
            received: buf.len(),
        });
    }
    if buf[0] != EPHEMERAL_FORMAT_TAG {
        return Err(Error::DecryptionFailed);
    }
    let mut key_bytes = [0u8; X25519_KEY_LEN];
    key_bytes.copy_from_slice(&buf[1..1 + X25519_KEY_LEN]);
    Ok(X25519PublicKey::from(key_bytes))
}

fn write_iv_field(buf: &mut [u8], nonce: &[u8; AESGCM_NONCE_LEN]) {
    debug_assert_eq!(buf.len(), IV_FIELD_LEN);
    buf[..AESGCM_NONCE_LEN].copy_from_slice(nonce);
    // remaining 4 bytes stay zero
}

fn read_iv_field(buf: &[u8]) -> Result<[u8; AESGCM_NONCE_LEN], Error> {
    if buf.len() != IV_FIELD_LEN {
        return Err(Error::InvalidIVLength {
            expected: IV_FIELD_LEN,
            received: buf.len(),
        });
    }
    let mut nonce = [0u8; AESGCM_NONCE_LEN];
    nonce.copy_from_slice(&buf[..AESGCM_NONCE_LEN]);
    Ok(nonce)
}

/// Compute the length of the header for an already-assembled `MultiEncrypted`
/// block by reading its `recipientCount` field.
pub fn multi_encrypted_header_len(data: &[u8]) -> Result<usize, Error> {
    if data.len() < MULTI_FIXED_LEN {
        return Err(Error::DecryptionFailed);
    }
    let recipient_count = BigEndian::read_u16(
        &data[MULTI_RECIPIENT_COUNT_OFFSET..MULTI_RECIPIENT_COUNT_OFFSET + 2],
    ) as usize;
    Ok(MULTI_FIXED_LEN + recipient_count * RECIPIENT_RECORD_LEN)
}

/// Encrypt `payload` for a single recipient, producing an Encrypted-kind block.
pub fn encrypt(
    payload: &[u8],
    size: BlockSize,
    block_type: BlockType,
    recipient_public: &X25519PublicKey,
    pool_id: Option<PoolId>,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<Block, Error> {
    debug_assert!(matches!(
        block_type,
        BlockType::EncryptedOwned | BlockType::EncryptedCbl | BlockType::EncryptedExtendedCbl
    ));

    let capacity = size.bytes().saturating_sub(ENCRYPTED_HEADER_LEN);
    if payload.len() > capacity {
        return Err(Error::DataLengthExceedsCapacity {
            length: payload.len(),
            capacity,
        });
    }

    let ephemeral_secret = StaticSecret::random_from_rng(&mut *rng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);
    let shared_secret = ephemeral_secret.diffie_hellman(recipient_public);

    let salt = encryption_recipient_id(recipient_public);
    let key = derive_key(shared_secret.as_bytes(), &salt);

    let mut nonce = [0u8; AESGCM_NONCE_LEN];
    rng.fill_bytes(&mut nonce);

    let mut ciphertext = payload.to_vec();
    let tag = seal(&key, &nonce, &mut ciphertext);

    let mut data = vec![0u8; size.bytes()];
    write_ephemeral_field(&mut data[..EPHEMERAL_FIELD_LEN], &ephemeral_public);
    write_iv_field(
        &mut data[EPHEMERAL_FIELD_LEN..EPHEMERAL_FIELD_LEN + IV_FIELD_LEN],
        &nonce,
    );
    data[EPHEMERAL_FIELD_LEN + IV_FIELD_LEN..ENCRYPTED_HEADER_LEN].copy_from_slice(tag.as_slice());
    data[ENCRYPTED_HEADER_LEN..ENCRYPTED_HEADER_LEN + ciphertext.len()].copy_from_slice(&ciphertext);
    rng.fill_bytes(&mut data[ENCRYPTED_HEADER_LEN + ciphertext.len()..]);

    Block::new(Bytes::from(data), block_type, BlockDataType::EncryptedData, pool_id)
}

/// Decrypt a single-recipient Encrypted-kind block. `plaintext_len` is the
/// caller-known length of the original payload (the header carries no
/// explicit length field for the single-recipient variant).
pub fn decrypt(block: &Block, recipient_secret: &StaticSecret, plaintext_len: usize) -> Result<Vec<u8>, Error> {
    let data = block.data()?;
    if data.len() < ENCRYPTED_HEADER_LEN {
        return Err(Error::DecryptionFailed);
    }

    let ephemeral_public = read_ephemeral_field(&data[..EPHEMERAL_FIELD_LEN])?;
    let nonce = read_iv_field(&data[EPHEMERAL_FIELD_LEN..EPHEMERAL_FIELD_LEN + IV_FIELD_LEN])?;
    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&data[EPHEMERAL_FIELD_LEN + IV_FIELD_LEN..ENCRYPTED_HEADER_LEN]);

    if ENCRYPTED_HEADER_LEN + plaintext_len > data.len() {
        return Err(Error::DecryptionFailed);
    }

    let shared_secret = recipient_secret.diffie_hellman(&ephemeral_public);
    let recipient_public = X25519PublicKey::from(recipient_secret);
    let salt = encryption_recipient_id(&recipient_public);
    let key = derive_key(shared_secret.as_bytes(), &salt);

    let mut buffer = data[ENCRYPTED_HEADER_LEN..ENCRYPTED_HEADER_LEN + plaintext_len].to_vec();
    open(&key, &nonce, &tag_bytes, &mut buffer)?;
    Ok(buffer)
}

/// Encrypt `payload` once under a fresh CEK and wrap the CEK for every recipient.
pub fn encrypt_multi(
    payload: &[u8],
    size: BlockSize,
    recipient_publics: &[X25519PublicKey],
    pool_id: Option<PoolId>,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<Block, Error> {
    if recipient_publics.is_empty() {
        return Err(Error::InsufficientRandomBlocks {
            needed: 1,
            available: 0,
        });
    }

    let header_len = MULTI_FIXED_LEN + recipient_publics.len() * RECIPIENT_RECORD_LEN;
    let capacity = size.bytes().saturating_sub(header_len);
    if payload.len() > capacity {
        return Err(Error::DataLengthExceedsCapacity {
            length: payload.len(),
            capacity,
        });
    }

    let mut cek = [0u8; CEK_LEN];
    rng.fill_bytes(&mut cek);

    let mut data_nonce = [0u8; AESGCM_NONCE_LEN];
    rng.fill_bytes(&mut data_nonce);
    let mut ciphertext = payload.to_vec();
    let data_tag = seal(&cek, &data_nonce, &mut ciphertext);

    let mut records = Vec::with_capacity(recipient_publics.len() * RECIPIENT_RECORD_LEN);
    for recipient_public in recipient_publics {
        let ephemeral_secret = StaticSecret::random_from_rng(&mut *rng);
        let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);
        let shared_secret = ephemeral_secret.diffie_hellman(recipient_public);
        let salt = encryption_recipient_id(recipient_public);
        let wrap_key = derive_key(shared_secret.as_bytes(), &salt);

        let mut wrap_nonce = [0u8; AESGCM_NONCE_LEN];
        rng.fill_bytes(&mut wrap_nonce);
        let mut wrapped_cek = cek;
        let wrap_tag = seal(&wrap_key, &wrap_nonce, &mut wrapped_cek);

        records.extend_from_slice(&salt);
        records.extend_from_slice(ephemeral_public.as_bytes());
        records.extend_from_slice(&wrap_nonce);
        records.extend_from_slice(wrap_tag.as_slice());
        records.extend_from_slice(&wrapped_cek);
    }

    let mut data = vec![0u8; size.bytes()];
    write_iv_field(&mut data[MULTI_IV_OFFSET..MULTI_IV_OFFSET + IV_FIELD_LEN], &data_nonce);
    data[MULTI_TAG_OFFSET..MULTI_TAG_OFFSET + TAG_LEN].copy_from_slice(data_tag.as_slice());
    BigEndian::write_u32(
        &mut data[MULTI_DATA_LEN_OFFSET..MULTI_DATA_LEN_OFFSET + 4],
        payload.len() as u32,
    );
    BigEndian::write_u16(
        &mut data[MULTI_RECIPIENT_COUNT_OFFSET..MULTI_RECIPIENT_COUNT_OFFSET + 2],
        recipient_publics.len() as u16,
    );
    data[MULTI_FIXED_LEN..MULTI_FIXED_LEN + records.len()].copy_from_slice(&records);
    data[header_len..header_len + ciphertext.len()].copy_from_slice(&ciphertext);
    rng.fill_bytes(&mut data[header_len + ciphertext.len()..]);

    Block::new(
        Bytes::from(data),
        BlockType::MultiEncrypted,
        BlockDataType::EncryptedData,
        pool_id,
    )
}

/// Decrypt a `MultiEncrypted` block for the recipient identified by `recipient_id`.
pub fn decrypt_multi(
    block: &Block,
    recipient_id: &[u8; IDENTITY_ID_LEN],
    recipient_secret: &StaticSecret,
) -> Result<Vec<u8>, Error> {
    let data = block.data()?;
    if data.len() < MULTI_FIXED_LEN {
        return Err(Error::DecryptionFailed);
    }

    let nonce = read_iv_field(&data[MULTI_IV_OFFSET..MULTI_IV_OFFSET + IV_FIELD_LEN])?;
    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&data[MULTI_TAG_OFFSET..MULTI_TAG_OFFSET + TAG_LEN]);
    let data_len = BigEndian::read_u32(&data[MULTI_DATA_LEN_OFFSET..MULTI_DATA_LEN_OFFSET + 4]) as usize;
    let recipient_count = BigEndian::read_u16(
        &data[MULTI_RECIPIENT_COUNT_OFFSET..MULTI_RECIPIENT_COUNT_OFFSET + 2],
    ) as usize;

    let header_len = MULTI_FIXED_LEN + recipient_count * RECIPIENT_RECORD_LEN;
    if data.len() < header_len + data_len {
        return Err(Error::DecryptionFailed);
    }

    let mut record_offset = None;
    for i in 0..recipient_count {
        let start = MULTI_FIXED_LEN + i * RECIPIENT_RECORD_LEN;
        if &data[start..start + IDENTITY_ID_LEN] == recipient_id {
            record_offset = Some(start + IDENTITY_ID_LEN);
            break;
        }
    }
    let record_offset = record_offset.ok_or(Error::DecryptionFailed)?;

    let mut ephemeral_bytes = [0u8; X25519_KEY_LEN];
    ephemeral_bytes.copy_from_slice(&data[record_offset..record_offset + X25519_KEY_LEN]);
    let ephemeral_public = X25519PublicKey::from(ephemeral_bytes);

    let wrap_nonce_offset = record_offset + X25519_KEY_LEN;
    let mut wrap_nonce = [0u8; AESGCM_NONCE_LEN];
    wrap_nonce.copy_from_slice(&data[wrap_nonce_offset..wrap_nonce_offset + AESGCM_NONCE_LEN]);

    let wrap_tag_offset = wrap_nonce_offset + AESGCM_NONCE_LEN;
    let mut wrap_tag = [0u8; TAG_LEN];
    wrap_tag.copy_from_slice(&data[wrap_tag_offset..wrap_tag_offset + TAG_LEN]);

    let wrapped_cek_offset = wrap_tag_offset + TAG_LEN;
    let mut wrapped_cek = [0u8; CEK_LEN];
    wrapped_cek.copy_from_slice(&data[wrapped_cek_offset..wrapped_cek_offset + CEK_LEN]);

    let shared_secret = recipient_secret.diffie_hellman(&ephemeral_public);
    let recipient_public = X25519PublicKey::from(recipient_secret);
    let salt = encryption_recipient_id(&recipient_public);
    let wrap_key = derive_key(shared_secret.as_bytes(), &salt);
    open(&wrap_key, &wrap_nonce, &wrap_tag, &mut wrapped_cek)?;
    let cek = wrapped_cek;

    let mut buffer = data[header_len..header_len + data_len].to_vec();
    open(&cek, &nonce, &tag_bytes, &mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::EncryptionRecipient;

    #[test]
    fn single_recipient_round_trip() {
        let mut rng = rand::thread_rng();
        let recipient = EncryptionRecipient::generate(&mut rng);
        let payload = b"owner-free filesystem payload";

        let block = encrypt(
            payload,
            BlockSize::Tiny,
            BlockType::EncryptedOwned,
            &recipient.public_key(),
            None,
            &mut rng,
        )
        .unwrap();

        let recovered = decrypt(&block, &recipient_secret_for_test(&recipient), payload.len()).unwrap();
        assert_eq!(recovered, payload);
    }

    #[test]
    fn single_recipient_wrong_key_fails() {
        let mut rng = rand::thread_rng();
        let recipient = EncryptionRecipient::generate(&mut rng);
        let stranger = EncryptionRecipient::generate(&mut rng);
        let payload = b"secret";

        let block = encrypt(
            payload,
            BlockSize::Tiny,
            BlockType::EncryptedOwned,
            &recipient.public_key(),
            None,
            &mut rng,
        )
        .unwrap();

        let err = decrypt(&block, &recipient_secret_for_test(&stranger), payload.len()).unwrap_err();
        assert!(matches!(err, Error::DecryptionFailed));
    }

    #[test]
    fn multi_recipient_round_trip_for_every_recipient() {
        let mut rng = rand::thread_rng();
        let alice = EncryptionRecipient::generate(&mut rng);
        let bob = EncryptionRecipient::generate(&mut rng);
        let payload = b"shared between two recipients";

        let block = encrypt_multi(
            payload,
            BlockSize::Small,
            &[alice.public_key(), bob.public_key()],
            None,
            &mut rng,
        )
        .unwrap();

        let recovered_alice = decrypt_multi(&block, &alice.id(), &recipient_secret_for_test(&alice)).unwrap();
        assert_eq!(recovered_alice, payload);

        let recovered_bob = decrypt_multi(&block, &bob.id(), &recipient_secret_for_test(&bob)).unwrap();
        assert_eq!(recovered_bob, payload);
    }

    #[test]
    fn multi_recipient_unknown_recipient_fails() {
        let mut rng = rand::thread_rng();
        let alice = EncryptionRecipient::generate(&mut rng);
        let stranger = EncryptionRecipient::generate(&mut rng);
        let payload = b"only for alice";

        let block = encrypt_multi(payload, BlockSize::Small, &[alice.public_key()], None, &mut rng).unwrap();

        let err = decrypt_multi(&block, &stranger.id(), &recipient_secret_for_test(&stranger)).unwrap_err();
        assert!(matches!(err, Error::DecryptionFailed));
    }

    // Test-only accessor: production callers never extract a StaticSecret out
    // of band, they hold the EncryptionRecipient itself.
    fn recipient_secret_for_test(recipient: &EncryptionRecipient) -> StaticSecret {
        recipient.secret().clone()
    }
}
