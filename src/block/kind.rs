//! Block-kind and data-kind enumerations (spec §3).

/// The closed set of block kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockType {
    Unknown,
    Raw,
    Whitened,
    Random,
    Cbl,
    ExtendedCbl,
    EncryptedOwned,
    EncryptedCbl,
    EncryptedExtendedCbl,
    MultiEncrypted,
    Fec,
    Handle,
}

impl BlockType {
    /// Whether blocks of this kind carry a normative layered header at all
    /// (Raw/Random/Whitened/Unknown/Fec/Handle do not).
    pub const fn has_header(self) -> bool {
        matches!(
            self,
            BlockType::Cbl
                | BlockType::ExtendedCbl
                | BlockType::EncryptedOwned
                | BlockType::EncryptedCbl
                | BlockType::EncryptedExtendedCbl
                | BlockType::MultiEncrypted
        )
    }

    /// Stable string tag, used by the disk store's metadata sidecar.
    pub const fn as_str(self) -> &'static str {
        match self {
            BlockType::Unknown => "unknown",
            BlockType::Raw => "raw",
            BlockType::Whitened => "whitened",
            BlockType::Random => "random",
            BlockType::Cbl => "cbl",
            BlockType::ExtendedCbl => "extended_cbl",
            BlockType::EncryptedOwned => "encrypted_owned",
            BlockType::EncryptedCbl => "encrypted_cbl",
            BlockType::EncryptedExtendedCbl => "encrypted_extended_cbl",
            BlockType::MultiEncrypted => "multi_encrypted",
            BlockType::Fec => "fec",
            BlockType::Handle => "handle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "unknown" => BlockType::Unknown,
            "raw" => BlockType::Raw,
            "whitened" => BlockType::Whitened,
            "random" => BlockType::Random,
            "cbl" => BlockType::Cbl,
            "extended_cbl" => BlockType::ExtendedCbl,
            "encrypted_owned" => BlockType::EncryptedOwned,
            "encrypted_cbl" => BlockType::EncryptedCbl,
            "encrypted_extended_cbl" => BlockType::EncryptedExtendedCbl,
            "multi_encrypted" => BlockType::MultiEncrypted,
            "fec" => BlockType::Fec,
            "handle" => BlockType::Handle,
            _ => return None,
        })
    }
}

/// What kind of data a block's payload carries, independent of its framing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockDataType {
    RawData,
    EncryptedData,
    EphemeralStructuredData,
    Ephemeral,
}

impl BlockDataType {
    /// `EphemeralStructuredData` may never reach a store (spec §4.3).
    pub const fn is_persistable(self) -> bool {
        !matches!(self, BlockDataType::EphemeralStructuredData)
    }

    /// Stable string tag, used by the disk store's metadata sidecar.
    pub const fn as_str(self) -> &'static str {
        match self {
            BlockDataType::RawData => "raw_data",
            BlockDataType::EncryptedData => "encrypted_data",
            BlockDataType::EphemeralStructuredData => "ephemeral_structured_data",
            BlockDataType::Ephemeral => "ephemeral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "raw_data" => BlockDataType::RawData,
            "encrypted_data" => BlockDataType::EncryptedData,
            "ephemeral_structured_data" => BlockDataType::EphemeralStructuredData,
            "ephemeral" => BlockDataType::Ephemeral,
            _ => return None,
        })
    }
}
