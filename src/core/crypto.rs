// Copyright (c) 2026 Poa Ledger Contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! secp256k1 keypairs, recoverable ECDSA signatures, and address derivation.
//!
//! `address(pubkey) = low-20-bytes(Keccak-256(uncompressed_pubkey_without_prefix))`.
//! A signature is valid for an address iff public-key recovery over the
//! signed digest yields that address.

use crate::core::types::{keccak256, Address, Signature};
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey};
use thiserror::Error;

/// Errors from signing, verification, or address recovery.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The signature bytes were not 65 bytes or otherwise malformed.
    #[error("malformed signature")]
    MalformedSignature,
    /// The secret key bytes were invalid.
    #[error("invalid secret key")]
    InvalidSecretKey,
    /// Public key recovery failed (bad recovery id, bad curve point, etc.).
    #[error("recovery failed")]
    RecoveryFailed,
}

/// An in-memory secp256k1 keypair.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut k256::elliptic_curve::rand_core::OsRng),
        }
    }

    /// Load from a 32-byte big-endian secret scalar.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes(bytes.into()).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// The 32-byte secret scalar.
    pub fn to_secret_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.signing_key.to_bytes());
        out
    }

    /// The uncompressed public key, including the leading `0x04` prefix.
    pub fn public_key_uncompressed(&self) -> [u8; 65] {
        let point = VerifyingKey::from(&self.signing_key)
            .to_encoded_point(false);
        let mut out = [0u8; 65];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// This keypair's address.
    pub fn address(&self) -> Address {
        address_from_uncompressed_pubkey(&self.public_key_uncompressed())
    }

    /// Sign an arbitrary message (hashed internally with Keccak-256) and
    /// return a 65-byte recoverable signature.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let digest = keccak256(message);
        let (sig, recid): (K256Signature, RecoveryId) = self
            .signing_key
            .sign_prehash_recoverable(&digest)
            .expect("signing over a fixed-size digest cannot fail");
        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&sig.to_bytes());
        out.push(recid.to_byte());
        Signature(out)
    }
}

/// Compute `address(pubkey)` from an uncompressed public key (65 bytes,
/// leading `0x04`).
pub fn address_from_uncompressed_pubkey(pubkey: &[u8; 65]) -> Address {
    // Strip the 0x04 prefix byte before hashing, per the source scheme.
    let digest = keccak256(&pubkey[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    Address::from_bytes(out)
}

/// Recover the address that produced `signature` over `message`.
pub fn recover_address(message: &[u8], signature: &Signature) -> Result<Address, CryptoError> {
    if signature.0.len() != 65 {
        return Err(CryptoError::MalformedSignature);
    }
    let (rs, recid_byte) = signature.0.split_at(64);
    let sig = K256Signature::from_slice(rs).map_err(|_| CryptoError::MalformedSignature)?;
    let recid =
        RecoveryId::from_byte(recid_byte[0]).ok_or(CryptoError::MalformedSignature)?;

    let digest = keccak256(message);
    let verifying_key = VerifyingKey::recover_from_prehash(&digest, &sig, recid)
        .map_err(|_| CryptoError::RecoveryFailed)?;

    let point = verifying_key.to_encoded_point(false);
    let mut pubkey = [0u8; 65];
    pubkey.copy_from_slice(point.as_bytes());
    Ok(address_from_uncompressed_pubkey(&pubkey))
}

/// Verify that `signature` recovers to `expected` over `message`.
pub fn verify_address(
    message: &[u8],
    signature: &Signature,
    expected: &Address,
) -> Result<bool, CryptoError> {
    Ok(recover_address(message, signature)? == *expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_stable_for_a_keypair() {
        let kp = Keypair::generate();
        assert_eq!(kp.address(), kp.address());
    }

    #[test]
    fn sign_then_recover_yields_same_address() {
        let kp = Keypair::generate();
        let msg = b"transfer 10 from alice to bob";
        let sig = kp.sign(msg);
        let recovered = recover_address(msg, &sig).unwrap();
        assert_eq!(recovered, kp.address());
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"original");
        let ok = verify_address(b"tampered", &sig, &kp.address()).unwrap();
        assert!(!ok);
    }

    #[test]
    fn roundtrip_secret_bytes() {
        let kp = Keypair::generate();
        let bytes = kp.to_secret_bytes();
        let kp2 = Keypair::from_secret_bytes(&bytes).unwrap();
        assert_eq!(kp.address(), kp2.address());
    }
}
