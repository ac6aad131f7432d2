//! Creator identities (CBL signing) and encryption recipients (Encrypted /
//! MultiEncrypted block kinds) — see SPEC_FULL.md §3 for the concrete
//! cryptographic bindings this crate adds on top of the distilled spec.

use std::collections::HashMap;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{CryptoRng, RngCore};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{checksum::Checksum, error::Error};

/// Length in bytes of the `creatorId` / recipient id fields embedded in block headers.
pub const IDENTITY_ID_LEN: usize = 16;

fn short_id(full: &Checksum) -> [u8; IDENTITY_ID_LEN] {
    let mut out = [0u8; IDENTITY_ID_LEN];
    out.copy_from_slice(&full.as_bytes()[..IDENTITY_ID_LEN]);
    out
}

/// An Ed25519 keypair backing the `creatorId`/`creatorSignature` fields of a CBL.
pub struct CreatorIdentity {
    signing_key: SigningKey,
}

impl CreatorIdentity {
    /// Generate a fresh identity.
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        Self {
            signing_key: SigningKey::generate(rng),
        }
    }

    /// Wrap an existing Ed25519 signing key.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// The 16-byte `creatorId`: the leading bytes of SHA3-512(verifying key).
    pub fn id(&self) -> [u8; IDENTITY_ID_LEN] {
        short_id(&Checksum::calculate(self.verifying_key().as_bytes()))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign an arbitrary message (a CBL's `header_without_signature ‖ addresses`).
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

/// Resolves a `creatorId` to the verifying key needed to check a CBL signature.
///
/// Decoding a CBL only carries the 16-byte id, never the full 32-byte key, so
/// the decoder needs this directory to be supplied out of band.
pub trait CreatorDirectory: Send + Sync {
    fn resolve(&self, creator_id: &[u8; IDENTITY_ID_LEN]) -> Option<VerifyingKey>;
}

/// An in-memory [`CreatorDirectory`], sufficient for tests and single-writer setups.
#[derive(Default)]
pub struct InMemoryCreatorDirectory {
    keys: HashMap<[u8; IDENTITY_ID_LEN], VerifyingKey>,
}

impl InMemoryCreatorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identity: &CreatorIdentity) {
        self.keys.insert(identity.id(), identity.verifying_key());
    }
}

impl CreatorDirectory for InMemoryCreatorDirectory {
    fn resolve(&self, creator_id: &[u8; IDENTITY_ID_LEN]) -> Option<VerifyingKey> {
        self.keys.get(creator_id).copied()
    }
}

/// Verify `signature` over `message` under the verifying key named by `creator_id`.
pub fn verify_signature(
    directory: &dyn CreatorDirectory,
    creator_id: &[u8; IDENTITY_ID_LEN],
    message: &[u8],
    signature: &Signature,
) -> Result<(), Error> {
    let key = directory
        .resolve(creator_id)
        .ok_or(Error::SignatureInvalid)?;
    key.verify(message, signature)
        .map_err(|_| Error::SignatureInvalid)
}

/// The 16-byte recipient id for a bare X25519 public key: the leading bytes
/// of SHA3-512(public key). Exposed as a free function because a sender only
/// ever holds a recipient's public key, never the matching [`EncryptionRecipient`].
pub fn encryption_recipient_id(public: &X25519PublicKey) -> [u8; IDENTITY_ID_LEN] {
    short_id(&Checksum::calculate(public.as_bytes()))
}

/// An X25519 keypair addressed by the Encrypted / MultiEncrypted block kinds.
pub struct EncryptionRecipient {
    secret: StaticSecret,
    public: X25519PublicKey,
}

impl EncryptionRecipient {
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let secret = StaticSecret::random_from_rng(rng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The 16-byte recipient id: the leading bytes of SHA3-512(public key).
    pub fn id(&self) -> [u8; IDENTITY_ID_LEN] {
        encryption_recipient_id(&self.public)
    }

    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

impl Drop for EncryptionRecipient {
    fn drop(&mut self) {
        // StaticSecret already zeroizes on drop; this guards against a future
        // refactor that swaps in a non-zeroizing secret type.
        let mut public_bytes = self.public.to_bytes();
        public_bytes.zeroize();
    }
}
