// dkim-engine – streaming DKIM signing and verification engine
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

//! Cryptographic utilities.
//!
//! # RSA public keys in DNS
//!
//! RFC 6376, section 3.6.1 states that the p= tag contains an RSA public key
//! in format RSAPublicKey (RFC 3447). The example in appendix C however
//! installs a key in format SubjectPublicKeyInfo (RFC 5280), and it is this
//! second format that has become the de facto standard.
//!
//! Public key data is therefore first read as SubjectPublicKeyInfo, and only
//! if that fails as RSAPublicKey.

mod hash;
mod rsa;

pub use self::{
    hash::{digest, digest_slices, CountingHasher, HashStatus},
    rsa::{sign_rsa, verify_rsa},
};

use crate::util::CanonicalStr;
use ::rsa::{pkcs1::DecodeRsaPrivateKey, pkcs8::DecodePrivateKey, RsaPrivateKey, RsaPublicKey};
use pkcs8::Document;
use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
};

/// A hash algorithm.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    pub fn all() -> Vec<Self> {
        vec![Self::Sha1, Self::Sha256]
    }
}

impl CanonicalStr for HashAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

/// An error that occurs when reading a private key.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyReadError {
    NotPem,
    UnsupportedLabel,
    InvalidKey,
}

impl Display for KeyReadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPem => write!(f, "not a PEM document"),
            Self::UnsupportedLabel => write!(f, "unsupported PEM label"),
            Self::InvalidKey => write!(f, "invalid RSA private key"),
        }
    }
}

impl Error for KeyReadError {}

/// An RSA private key used for signing.
///
/// The secret key components are zeroized when the key is dropped.
#[derive(Clone, Eq, PartialEq)]
pub struct SigningKey(RsaPrivateKey);

impl SigningKey {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self(key)
    }

    /// Reads a private key from a PEM document in PKCS#8 (`PRIVATE KEY`) or
    /// PKCS#1 (`RSA PRIVATE KEY`) format.
    pub fn from_pem(s: &str) -> Result<Self, KeyReadError> {
        let (label, doc) = Document::from_pem(s).map_err(|_| KeyReadError::NotPem)?;

        let key = match label {
            "PRIVATE KEY" => RsaPrivateKey::from_pkcs8_der(doc.as_bytes())
                .map_err(|_| KeyReadError::InvalidKey)?,
            "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_der(doc.as_bytes())
                .map_err(|_| KeyReadError::InvalidKey)?,
            _ => return Err(KeyReadError::UnsupportedLabel),
        };

        Ok(Self(key))
    }

    pub fn as_rsa(&self) -> &RsaPrivateKey {
        &self.0
    }

    /// The length of a signature produced with this key, in bytes.
    pub fn signature_length(&self) -> usize {
        use ::rsa::traits::PublicKeyParts;
        self.0.size()
    }
}

impl Debug for SigningKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("bits", &(self.signature_length() * 8))
            .finish_non_exhaustive()
    }
}

/// An RSA public key used for verification.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VerifyingKey(RsaPublicKey);

impl VerifyingKey {
    /// Reads public key data as found in the p= tag of a key record.
    pub fn from_key_data(key_data: &[u8]) -> Result<Self, VerificationError> {
        self::rsa::read_rsa_public_key(key_data).map(Self)
    }

    pub fn as_rsa(&self) -> &RsaPublicKey {
        &self.0
    }

    /// The key size in bits.
    pub fn key_size(&self) -> usize {
        self::rsa::get_public_key_size(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VerificationError {
    InvalidKey,
    VerificationFailure,
}

impl Display for VerificationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "invalid key data"),
            Self::VerificationFailure => write!(f, "signature verification failed"),
        }
    }
}

impl Error for VerificationError {}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SigningError {
    SigningFailure,
}

impl Display for SigningError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SigningFailure => write!(f, "failed to compute signature"),
        }
    }
}

impl Error for SigningError {}
