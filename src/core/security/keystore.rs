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
#![deny(missing_docs)]

//! Validator keystore: load-or-create a secp256k1 signing key from a
//! plaintext file with restrictive permissions.
//!
//! Wallet-file encryption, audit logging, and sign-path rate limiting are
//! out of scope here — see `DESIGN.md` — so this module is deliberately
//! thinner than the backend it's grounded on: atomic writes and `0600`
//! permissions are the only hardening this load path carries.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;
use zeroize::Zeroize;

use crate::core::crypto::{recover_address, Keypair};
use crate::core::types::{Address, Signature};

/// Keystore errors.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// Reading, writing, or renaming the key file failed.
    #[error("io")]
    Io,
    /// The on-disk secret did not decode to a valid key.
    #[error("invalid key encoding")]
    InvalidKey,
    /// A signature did not recover to the expected address.
    #[error("bad signature")]
    BadSignature,
}

/// Signer backend abstraction (HSM compatible).
pub trait SignerBackend: Send + Sync {
    /// Return this backend's ledger address.
    fn address(&self) -> Address;
    /// Sign message bytes, returning a 65-byte recoverable signature.
    fn sign(&self, msg: &[u8]) -> Result<Signature, KeystoreError>;
}

/// Simple file-backed secp256k1 backend.
pub struct FileSecp256k1Backend {
    keypair: Keypair,
}

fn set_private_perms_best_effort(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

/// Atomic write to disk (best-effort fsync, then rename).
fn atomic_write_private(path: &Path, bytes: &[u8]) -> Result<(), KeystoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|_| KeystoreError::Io)?;
    }

    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");

    {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .map_err(|_| KeystoreError::Io)?;
        f.write_all(bytes).map_err(|_| KeystoreError::Io)?;
        let _ = f.sync_all();
    }

    set_private_perms_best_effort(&tmp);
    fs::rename(&tmp, path).map_err(|_| KeystoreError::Io)?;
    set_private_perms_best_effort(path);
    Ok(())
}

impl FileSecp256k1Backend {
    /// Load or create a secp256k1 secret-scalar key file at `path`, a raw
    /// 32-byte secret with `0600` permissions.
    pub fn load_or_create(path: &Path) -> Result<Self, KeystoreError> {
        if path.exists() {
            let mut secret = fs::read(path).map_err(|_| KeystoreError::Io)?;
            if secret.len() != 32 {
                secret.zeroize();
                return Err(KeystoreError::InvalidKey);
            }
            let mut secret_bytes = [0u8; 32];
            secret_bytes.copy_from_slice(&secret);
            secret.zeroize();
            let keypair =
                Keypair::from_secret_bytes(&secret_bytes).map_err(|_| KeystoreError::InvalidKey)?;
            secret_bytes.zeroize();
            return Ok(Self { keypair });
        }

        let keypair = Keypair::generate();
        let mut secret = keypair.to_secret_bytes();
        atomic_write_private(path, &secret)?;
        secret.zeroize();

        Ok(Self { keypair })
    }
}

impl SignerBackend for FileSecp256k1Backend {
    fn address(&self) -> Address {
        self.keypair.address()
    }

    fn sign(&self, msg: &[u8]) -> Result<Signature, KeystoreError> {
        Ok(self.keypair.sign(msg))
    }
}

/// Keystore wrapper.
pub struct Keystore<B: SignerBackend> {
    backend: B,
}

impl Keystore<FileSecp256k1Backend> {
    /// Load or create the keystore at `data_dir/validator.key`.
    pub fn open(data_dir: &str) -> Result<Self, KeystoreError> {
        let mut key_path = PathBuf::from(data_dir);
        key_path.push("validator.key");
        Self::open_with_key_path(&key_path)
    }

    /// Load or create the keystore at an explicit key file path (the `-w`
    /// flag).
    pub fn open_with_key_path(key_path: &Path) -> Result<Self, KeystoreError> {
        let backend = FileSecp256k1Backend::load_or_create(key_path)?;
        Ok(Self { backend })
    }
}

impl<B: SignerBackend> Keystore<B> {
    /// This keystore's ledger address.
    pub fn address(&self) -> Address {
        self.backend.address()
    }

    /// Sign `msg` with the backend key.
    pub fn sign(&self, msg: &[u8]) -> Result<Signature, KeystoreError> {
        self.backend.sign(msg)
    }
}

/// Verify that `sig` recovers to `expected` over `msg`.
pub fn verify_address(expected: &Address, msg: &[u8], sig: &Signature) -> Result<(), KeystoreError> {
    let recovered = recover_address(msg, sig).map_err(|_| KeystoreError::BadSignature)?;
    if recovered == *expected {
        Ok(())
    } else {
        Err(KeystoreError::BadSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_key_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ks1 = Keystore::open(dir.path().to_str().unwrap()).unwrap();
        let addr = ks1.address();
        drop(ks1);
        let ks2 = Keystore::open(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(addr, ks2.address());
    }

    #[test]
    fn signs_verifiably() {
        let dir = tempfile::tempdir().unwrap();
        let ks = Keystore::open(dir.path().to_str().unwrap()).unwrap();
        let sig = ks.sign(b"hello").unwrap();
        verify_address(&ks.address(), b"hello", &sig).unwrap();
    }
}
