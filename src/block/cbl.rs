//! Constituent Block List encoding/decoding (spec §4.5).
//!
//! A CBL's on-disk layout, byte-exact and MSB-first:
//!
//! ```text
//! 16 B creatorId | 8 B dateCreated (ms) | 4 B addressCount | 8 B originalDataLength
//! | 1 B tupleSize | 64 B signature | [2 B fileNameLen | fileName | 2 B mimeLen | mimeType]
//! | addressCount * 64 B addresses | random padding to blockSize
//! ```
//!
//! The bracketed fields only appear for the Extended variant. The signature
//! covers every byte up to the address list except its own 64-byte slot.

use byteorder::{ByteOrder, BigEndian};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::Signature;
use rand::RngCore;

use super::{Block, BlockDataType, BlockSize, BlockType};
use crate::{
    checksum::{Checksum, CHECKSUM_LENGTH},
    error::Error,
    identity::{CreatorDirectory, CreatorIdentity, IDENTITY_ID_LEN},
    pool::PoolId,
};

/// Length of an encoded checksum address, as stored in the address list.
pub const ADDRESS_LEN: usize = CHECKSUM_LENGTH;

const DATE_LEN: usize = 8;
const ADDRESS_COUNT_LEN: usize = 4;
const ORIGINAL_LENGTH_LEN: usize = 8;
const TUPLE_SIZE_LEN: usize = 1;
const SIGNATURE_LEN: usize = 64;

/// Length, in bytes, of the fixed (non-Extended) CBL header, signature included.
pub const CBL_HEADER_LEN: usize =
    IDENTITY_ID_LEN + DATE_LEN + ADDRESS_COUNT_LEN + ORIGINAL_LENGTH_LEN + TUPLE_SIZE_LEN + SIGNATURE_LEN;

/// Optional file metadata carried by an [`BlockType::ExtendedCbl`] block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedMetadata {
    pub file_name: String,
    pub mime_type: String,
}

/// The parsed, signature-verified contents of a decoded CBL.
#[derive(Clone, Debug)]
pub struct CblContents {
    pub creator_id: [u8; IDENTITY_ID_LEN],
    pub date_created: DateTime<Utc>,
    pub tuple_size: u8,
    pub original_data_length: u64,
    pub addresses: Vec<Checksum>,
    pub extended: Option<ExtendedMetadata>,
}

/// Compute the length of the header for an already-assembled `ExtendedCbl`
/// block, by reading the two length-prefixed metadata fields that follow the
/// fixed CBL header.
pub fn extended_header_len(data: &[u8]) -> Result<usize, Error> {
    if data.len() < CBL_HEADER_LEN + 2 {
        return Err(Error::MalformedCBL(
            "block too small to hold an ExtendedCBL file-name length prefix".into(),
        ));
    }
    let file_name_len = BigEndian::read_u16(&data[CBL_HEADER_LEN..CBL_HEADER_LEN + 2]) as usize;
    let mime_offset = CBL_HEADER_LEN + 2 + file_name_len;
    if data.len() < mime_offset + 2 {
        return Err(Error::MalformedCBL(
            "block too small to hold an ExtendedCBL mime-type length prefix".into(),
        ));
    }
    let mime_len = BigEndian::read_u16(&data[mime_offset..mime_offset + 2]) as usize;
    Ok(mime_offset + 2 + mime_len)
}

fn address_capacity(header_len: usize, block_size: BlockSize) -> usize {
    block_size.bytes().saturating_sub(header_len) / ADDRESS_LEN
}

/// Assemble, sign and pad a CBL (or, with `extended`, an ExtendedCBL) block.
#[allow(clippy::too_many_arguments)]
pub fn encode(
    block_size: BlockSize,
    creator: &CreatorIdentity,
    date_created: DateTime<Utc>,
    tuple_size: u8,
    original_data_length: u64,
    addresses: &[Checksum],
    extended: Option<&ExtendedMetadata>,
    pool_id: Option<PoolId>,
    rng: &mut impl RngCore,
) -> Result<Block, Error> {
    if tuple_size < 2 {
        return Err(Error::MalformedCBL("tupleSize must be at least 2".into()));
    }
    if addresses.len() % tuple_size as usize != 0 {
        return Err(Error::MalformedCBL(format!(
            "addressCount {} is not a multiple of tupleSize {tuple_size}",
            addresses.len()
        )));
    }

    let mut prefix = Vec::with_capacity(CBL_HEADER_LEN - SIGNATURE_LEN);
    prefix.extend_from_slice(&creator.id());
    let mut date_buf = [0u8; DATE_LEN];
    BigEndian::write_i64(&mut date_buf, date_created.timestamp_millis());
    prefix.extend_from_slice(&date_buf);
    let mut count_buf = [0u8; ADDRESS_COUNT_LEN];
    BigEndian::write_u32(&mut count_buf, addresses.len() as u32);
    prefix.extend_from_slice(&count_buf);
    let mut length_buf = [0u8; ORIGINAL_LENGTH_LEN];
    BigEndian::write_u64(&mut length_buf, original_data_length);
    prefix.extend_from_slice(&length_buf);
    prefix.push(tuple_size);

    let mut extended_bytes = Vec::new();
    if let Some(meta) = extended {
        let name_bytes = meta.file_name.as_bytes();
        let mime_bytes = meta.mime_type.as_bytes();
        let mut name_len_buf = [0u8; 2];
        BigEndian::write_u16(&mut name_len_buf, name_bytes.len() as u16);
        extended_bytes.extend_from_slice(&name_len_buf);
        extended_bytes.extend_from_slice(name_bytes);
        let mut mime_len_buf = [0u8; 2];
        BigEndian::write_u16(&mut mime_len_buf, mime_bytes.len() as u16);
        extended_bytes.extend_from_slice(&mime_len_buf);
        extended_bytes.extend_from_slice(mime_bytes);
    }

    let mut address_bytes = Vec::with_capacity(addresses.len() * ADDRESS_LEN);
    for address in addresses {
        address_bytes.extend_from_slice(address.as_bytes());
    }

    let header_len = CBL_HEADER_LEN + extended_bytes.len();
    let capacity = address_capacity(header_len, block_size);
    if addresses.len() > capacity {
        return Err(Error::CapacityExceeded {
            count: addresses.len(),
            capacity,
        });
    }

    let mut signing_message = Vec::with_capacity(prefix.len() + extended_bytes.len() + address_bytes.len());
    signing_message.extend_from_slice(&prefix);
    signing_message.extend_from_slice(&extended_bytes);
    signing_message.extend_from_slice(&address_bytes);
    let signature = creator.sign(&signing_message);

    let total_len = header_len + address_bytes.len();
    if total_len > block_size.bytes() {
        return Err(Error::DataLengthExceedsCapacity {
            length: total_len,
            capacity: block_size.bytes(),
        });
    }

    let mut data = vec![0u8; block_size.bytes()];
    let mut offset = 0;
    data[offset..offset + prefix.len()].copy_from_slice(&prefix);
    offset += prefix.len();
    data[offset..offset + SIGNATURE_LEN].copy_from_slice(&signature.to_bytes());
    offset += SIGNATURE_LEN;
    data[offset..offset + extended_bytes.len()].copy_from_slice(&extended_bytes);
    offset += extended_bytes.len();
    data[offset..offset + address_bytes.len()].copy_from_slice(&address_bytes);
    offset += address_bytes.len();
    rng.fill_bytes(&mut data[offset..]);

    let block_type = if extended.is_some() {
        BlockType::ExtendedCbl
    } else {
        BlockType::Cbl
    };

    Block::new(Bytes::from(data), block_type, BlockDataType::RawData, pool_id)
}

/// Parse and signature-verify a CBL or ExtendedCBL block.
pub fn decode(
    block: &Block,
    directory: &dyn CreatorDirectory,
    now: DateTime<Utc>,
) -> Result<CblContents, Error> {
    let data = block.data()?;
    let extended = matches!(block.block_type(), BlockType::ExtendedCbl);

    if data.len() < CBL_HEADER_LEN {
        return Err(Error::MalformedCBL("block shorter than the CBL header".into()));
    }

    let mut creator_id = [0u8; IDENTITY_ID_LEN];
    creator_id.copy_from_slice(&data[0..IDENTITY_ID_LEN]);
    let mut offset = IDENTITY_ID_LEN;

    let date_millis = BigEndian::read_i64(&data[offset..offset + DATE_LEN]);
    offset += DATE_LEN;
    let date_created = Utc
        .timestamp_millis_opt(date_millis)
        .single()
        .ok_or_else(|| Error::MalformedCBL("dateCreated out of range".into()))?;

    let address_count = BigEndian::read_u32(&data[offset..offset + ADDRESS_COUNT_LEN]) as usize;
    offset += ADDRESS_COUNT_LEN;

    let original_data_length = BigEndian::read_u64(&data[offset..offset + ORIGINAL_LENGTH_LEN]);
    offset += ORIGINAL_LENGTH_LEN;

    let tuple_size = data[offset];
    offset += TUPLE_SIZE_LEN;

    let mut signature_bytes = [0u8; SIGNATURE_LEN];
    signature_bytes.copy_from_slice(&data[offset..offset + SIGNATURE_LEN]);
    let signature = Signature::from_bytes(&signature_bytes);
    offset += SIGNATURE_LEN;

    if tuple_size < 2 {
        return Err(Error::MalformedCBL("tupleSize must be at least 2".into()));
    }
    if address_count % tuple_size as usize != 0 {
        return Err(Error::MalformedCBL(format!(
            "addressCount {address_count} is not a multiple of tupleSize {tuple_size}"
        )));
    }

    let extended_metadata = if extended {
        if data.len() < offset + 2 {
            return Err(Error::MalformedCBL("missing fileNameLen".into()));
        }
        let file_name_len = BigEndian::read_u16(&data[offset..offset + 2]) as usize;
        offset += 2;
        if data.len() < offset + file_name_len {
            return Err(Error::MalformedCBL("fileName truncated".into()));
        }
        let file_name = String::from_utf8(data[offset..offset + file_name_len].to_vec())
            .map_err(|_| Error::MalformedCBL("fileName is not valid UTF-8".into()))?;
        offset += file_name_len;

        if data.len() < offset + 2 {
            return Err(Error::MalformedCBL("missing mimeLen".into()));
        }
        let mime_len = BigEndian::read_u16(&data[offset..offset + 2]) as usize;
        offset += 2;
        if data.len() < offset + mime_len {
            return Err(Error::MalformedCBL("mimeType truncated".into()));
        }
        let mime_type = String::from_utf8(data[offset..offset + mime_len].to_vec())
            .map_err(|_| Error::MalformedCBL("mimeType is not valid UTF-8".into()))?;
        offset += mime_len;

        Some(ExtendedMetadata { file_name, mime_type })
    } else {
        None
    };

    let addresses_end = offset + address_count * ADDRESS_LEN;
    if data.len() < addresses_end {
        return Err(Error::MalformedCBL("address list truncated".into()));
    }
    let mut addresses = Vec::with_capacity(address_count);
    for i in 0..address_count {
        let start = offset + i * ADDRESS_LEN;
        addresses.push(Checksum::from_bytes(&data[start..start + ADDRESS_LEN])?);
    }

    // Signature covers everything up to the address list, minus the signature's own slot.
    let mut signing_message = Vec::with_capacity(addresses_end);
    signing_message.extend_from_slice(&data[0..IDENTITY_ID_LEN + DATE_LEN + ADDRESS_COUNT_LEN + ORIGINAL_LENGTH_LEN + TUPLE_SIZE_LEN]);
    signing_message.extend_from_slice(&data[IDENTITY_ID_LEN + DATE_LEN + ADDRESS_COUNT_LEN + ORIGINAL_LENGTH_LEN + TUPLE_SIZE_LEN + SIGNATURE_LEN..addresses_end]);

    if date_created > now {
        return Err(Error::DateInFuture);
    }

    crate::identity::verify_signature(directory, &creator_id, &signing_message, &signature)?;

    Ok(CblContents {
        creator_id,
        date_created,
        tuple_size,
        original_data_length,
        addresses,
        extended: extended_metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::InMemoryCreatorDirectory;

    fn directory_with(identity: &CreatorIdentity) -> InMemoryCreatorDirectory {
        let mut directory = InMemoryCreatorDirectory::new();
        directory.insert(identity);
        directory
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut rng = rand::thread_rng();
        let identity = CreatorIdentity::generate(&mut rng);
        let directory = directory_with(&identity);

        let addresses: Vec<Checksum> = (0..3)
            .map(|i| Checksum::calculate(format!("member-{i}").as_bytes()))
            .collect();

        let now = Utc::now();
        let block = encode(
            BlockSize::Small,
            &identity,
            now,
            3,
            1024,
            &addresses,
            None,
            None,
            &mut rng,
        )
        .unwrap();

        assert_eq!(block.block_type(), BlockType::Cbl);
        let contents = decode(&block, &directory, now + chrono::Duration::seconds(1)).unwrap();
        assert_eq!(contents.addresses, addresses);
        assert_eq!(contents.original_data_length, 1024);
        assert_eq!(contents.tuple_size, 3);
        assert_eq!(contents.creator_id, identity.id());
    }

    #[test]
    fn extended_round_trip_carries_metadata() {
        let mut rng = rand::thread_rng();
        let identity = CreatorIdentity::generate(&mut rng);
        let directory = directory_with(&identity);

        let addresses: Vec<Checksum> = (0..3)
            .map(|i| Checksum::calculate(format!("member-{i}").as_bytes()))
            .collect();
        let metadata = ExtendedMetadata {
            file_name: "report.pdf".into(),
            mime_type: "application/pdf".into(),
        };

        let now = Utc::now();
        let block = encode(
            BlockSize::Small,
            &identity,
            now,
            3,
            4096,
            &addresses,
            Some(&metadata),
            None,
            &mut rng,
        )
        .unwrap();

        assert_eq!(block.block_type(), BlockType::ExtendedCbl);
        let contents = decode(&block, &directory, now).unwrap();
        assert_eq!(contents.extended, Some(metadata));
    }

    #[test]
    fn tampering_with_addresses_invalidates_signature() {
        let mut rng = rand::thread_rng();
        let identity = CreatorIdentity::generate(&mut rng);
        let directory = directory_with(&identity);

        let addresses: Vec<Checksum> = (0..3)
            .map(|i| Checksum::calculate(format!("member-{i}").as_bytes()))
            .collect();
        let now = Utc::now();
        let block = encode(
            BlockSize::Small,
            &identity,
            now,
            3,
            1024,
            &addresses,
            None,
            None,
            &mut rng,
        )
        .unwrap();

        let mut tampered = block.data().unwrap().to_vec();
        tampered[CBL_HEADER_LEN] ^= 0x01;
        let tampered_block = Block::from_stored(
            Bytes::from(tampered),
            block.id(),
            BlockType::Cbl,
            BlockDataType::RawData,
            block.date_created(),
            None,
        )
        .unwrap();

        let err = decode(&tampered_block, &directory, now).unwrap_err();
        assert!(matches!(err, Error::SignatureInvalid));
    }

    #[test]
    fn future_date_is_rejected() {
        let mut rng = rand::thread_rng();
        let identity = CreatorIdentity::generate(&mut rng);
        let directory = directory_with(&identity);

        let addresses: Vec<Checksum> = (0..3)
            .map(|i| Checksum::calculate(format!("member-{i}").as_bytes()))
            .collect();
        let future = Utc::now() + chrono::Duration::days(1);
        let block = encode(
            BlockSize::Small,
            &identity,
            future,
            3,
            1024,
            &addresses,
            None,
            None,
            &mut rng,
        )
        .unwrap();

        let err = decode(&block, &directory, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::DateInFuture));
    }

    #[test]
    fn capacity_exceeded_is_rejected() {
        let mut rng = rand::thread_rng();
        let identity = CreatorIdentity::generate(&mut rng);

        // BlockSize::Message (512B) minus a 101B header leaves room for 6 addresses.
        let addresses: Vec<Checksum> = (0..9)
            .map(|i| Checksum::calculate(format!("member-{i}").as_bytes()))
            .collect();
        let err = encode(
            BlockSize::Message,
            &identity,
            Utc::now(),
            3,
            1024,
            &addresses,
            None,
            None,
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { .. }));
    }

    #[test]
    fn encode_rejects_tuple_size_below_two() {
        let mut rng = rand::thread_rng();
        let identity = CreatorIdentity::generate(&mut rng);
        let addresses = vec![Checksum::calculate(b"member-0")];

        let err = encode(
            BlockSize::Message,
            &identity,
            Utc::now(),
            1,
            1024,
            &addresses,
            None,
            None,
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedCBL(_)));
    }

    #[test]
    fn decode_rejects_tuple_size_below_two_without_panicking() {
        let mut rng = rand::thread_rng();
        let identity = CreatorIdentity::generate(&mut rng);
        let directory = directory_with(&identity);

        // Build a CBL with tupleSize 3, then flip the on-disk tupleSize byte to
        // 1 so `decode` must reject it on its own, independent of `encode`'s guard.
        let addresses: Vec<Checksum> = (0..3)
            .map(|i| Checksum::calculate(format!("member-{i}").as_bytes()))
            .collect();
        let now = Utc::now();
        let block = encode(
            BlockSize::Small,
            &identity,
            now,
            3,
            1024,
            &addresses,
            None,
            None,
            &mut rng,
        )
        .unwrap();

        let tuple_size_offset = IDENTITY_ID_LEN + DATE_LEN + ADDRESS_COUNT_LEN + ORIGINAL_LENGTH_LEN;
        let mut tampered = block.data().unwrap().to_vec();
        tampered[tuple_size_offset] = 1;
        let tampered_id = Checksum::calculate(&tampered);
        let tampered_block = Block::from_stored(
            Bytes::from(tampered),
            tampered_id,
            BlockType::Cbl,
            BlockDataType::RawData,
            block.date_created(),
            None,
        )
        .unwrap();

        let err = decode(&tampered_block, &directory, now + chrono::Duration::seconds(1)).unwrap_err();
        assert!(matches!(err, Error::MalformedCBL(_)));
    }
}
