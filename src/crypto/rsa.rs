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

use crate::crypto::{HashAlgorithm, SigningError, VerificationError};
use rsa::{
    pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey, traits::PublicKeyParts, Pkcs1v15Sign,
    RsaPrivateKey, RsaPublicKey,
};
use sha1::Sha1;
use sha2::Sha256;
use tracing::trace;

pub fn get_public_key_size(k: &RsaPublicKey) -> usize {
    k.size() * 8
}

pub fn read_rsa_public_key(key_data: &[u8]) -> Result<RsaPublicKey, VerificationError> {
    // SubjectPublicKeyInfo first (de facto standard), then RSAPublicKey
    RsaPublicKey::from_public_key_der(key_data)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(key_data))
        .map_err(|_| VerificationError::InvalidKey)
}

fn padding_scheme(hash_alg: HashAlgorithm) -> Pkcs1v15Sign {
    match hash_alg {
        HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
    }
}

/// Verifies an RSASSA-PKCS1-v1_5 signature over a message digest.
pub fn verify_rsa(
    hash_alg: HashAlgorithm,
    public_key: &RsaPublicKey,
    hashed: &[u8],
    signature_data: &[u8],
) -> Result<(), VerificationError> {
    public_key
        .verify(padding_scheme(hash_alg), hashed, signature_data)
        .map_err(|e| {
            trace!("RSA verification failed: {e}");
            VerificationError::VerificationFailure
        })
}

/// Computes an RSASSA-PKCS1-v1_5 signature over a message digest.
pub fn sign_rsa(
    hash_alg: HashAlgorithm,
    private_key: &RsaPrivateKey,
    hashed: &[u8],
) -> Result<Vec<u8>, SigningError> {
    private_key
        .sign(padding_scheme(hash_alg), hashed)
        .map_err(|e| {
            trace!("RSA signing failed: {e}");
            SigningError::SigningFailure
        })
}
