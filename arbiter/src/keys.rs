//! Key types for the arbiter.
//!
//! Everything that identifies a committee member flows through the types
//! here: the compressed secp256k1 public key, the 20-byte program hash
//! derived from it, and the compact ECDSA signature format stored in
//! transaction witnesses and proposal envelopes.

use std::str::FromStr;

use secp256k1::Message;
use secp256k1::SECP256K1;
use sha2::Digest as _;
use sha2::Sha256;

use crate::error::Error;

/// The number of bytes in a compressed public key.
pub const PUBLIC_KEY_LENGTH: usize = 33;

/// The number of bytes in a compact ECDSA signature.
pub const SIGNATURE_LENGTH: usize = 64;

/// A public key identifying one committee member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(secp256k1::PublicKey);

impl PublicKey {
    /// The compressed 33-byte form of the key.
    pub fn serialize(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.0.serialize()
    }

    /// Parse a key from its compressed 33-byte form.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        Ok(Self(secp256k1::PublicKey::from_slice(bytes)?))
    }

    /// The program hash of the standard single-signature script locking
    /// to this key. This is what appears in proposal envelopes and is the
    /// basis for resolving a feedback message to a signer index.
    pub fn program_hash(&self) -> ProgramHash {
        let mut script = Vec::with_capacity(PUBLIC_KEY_LENGTH + 2);
        script.push(PUBLIC_KEY_LENGTH as u8);
        script.extend_from_slice(&self.serialize());
        script.push(crate::multisig::OP_CHECKSIG);
        ProgramHash::of_script(&script)
    }

    /// Verify a compact signature over `data` against this key.
    pub fn verify(&self, data: &[u8], signature: &Signature) -> bool {
        let Ok(sig) = secp256k1::ecdsa::Signature::from_compact(&signature.0) else {
            return false;
        };
        let msg = Message::from_digest(sign_digest(data));
        SECP256K1.verify_ecdsa(&msg, &sig, &self.0).is_ok()
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.serialize()))
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|_| Error::Malformed("public key hex"))?;
        Self::from_slice(&bytes)
    }
}

/// A private key held by exactly one arbiter process.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PrivateKey(secp256k1::SecretKey);

// The Debug output must never leak key material.
impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl PrivateKey {
    /// Parse a key from its raw 32-byte form.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        Ok(Self(secp256k1::SecretKey::from_slice(bytes)?))
    }

    /// Generate a fresh random key.
    pub fn new<R: rand::Rng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        loop {
            rng.fill(&mut bytes[..]);
            if let Ok(key) = secp256k1::SecretKey::from_slice(&bytes) {
                return Self(key);
            }
        }
    }

    /// The public half of this key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public_key(SECP256K1))
    }

    /// The raw 32-byte form, for serializing into configuration.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.0.secret_bytes()
    }
}

impl FromStr for PrivateKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|_| Error::Malformed("private key hex"))?;
        Self::from_slice(&bytes)
    }
}

/// The narrow signing capability handed to the components that produce
/// signatures. Owning a [`PrivateKey`] is the canonical implementation;
/// tests and external key stores provide their own.
pub trait SignData {
    /// The public key signatures will verify against.
    fn public_key(&self) -> PublicKey;

    /// Produce a compact signature over `data`.
    fn sign(&self, data: &[u8]) -> Signature;
}

impl SignData for PrivateKey {
    fn public_key(&self) -> PublicKey {
        PrivateKey::public_key(self)
    }

    fn sign(&self, data: &[u8]) -> Signature {
        let msg = Message::from_digest(sign_digest(data));
        Signature(SECP256K1.sign_ecdsa(&msg, &self.0).serialize_compact())
    }
}

/// A compact 64-byte ECDSA signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_LENGTH]);

impl Signature {
    /// Parse a signature from its compact form.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let array: [u8; SIGNATURE_LENGTH] = bytes
            .try_into()
            .map_err(|_| Error::Malformed("signature length"))?;
        Ok(Self(array))
    }
}

/// The single-SHA256 digest signed by [`SignData::sign`].
fn sign_digest(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// The 20-byte hash identifying a locking script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramHash(pub [u8; 20]);

impl ProgramHash {
    /// RIPEMD160(SHA256(script)).
    pub fn of_script(script: &[u8]) -> Self {
        let sha = Sha256::digest(script);
        let hash = ripemd::Ripemd160::digest(sha);
        Self(hash.into())
    }
}

impl std::fmt::Display for ProgramHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;

    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(46);
        let key = PrivateKey::new(&mut rng);

        let signature = key.sign(b"settlement bytes");
        assert!(key.public_key().verify(b"settlement bytes", &signature));
        assert!(!key.public_key().verify(b"other bytes", &signature));
    }

    #[test]
    fn program_hash_is_stable_per_key() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(46);
        let a = PrivateKey::new(&mut rng).public_key();
        let b = PrivateKey::new(&mut rng).public_key();

        assert_eq!(a.program_hash(), a.program_hash());
        assert_ne!(a.program_hash(), b.program_hash());
    }

    #[test]
    fn public_key_hex_round_trip() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let key = PrivateKey::new(&mut rng).public_key();

        let parsed: PublicKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
    }
}
