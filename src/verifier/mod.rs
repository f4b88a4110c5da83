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

//! Verifier and supporting types.

mod header;
mod lookup;
mod query;
mod verify;

pub use lookup::LookupTxt;
pub use query::{KeyQuery, KeyResolveError, KeyResolver, PublicKey, TxtKeyResolver};

use crate::{
    crypto::VerifyingKey,
    engine::Config,
    header::HeaderFields,
    message_hash::{BodyHasher, BodyHasherStance},
    signature::{DkimSignature, DkimSignatureError, DkimSignatureErrorKind},
};
use bitflags::bitflags;
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str,
};
use tokio::time;
use tracing::trace;

bitflags! {
    /// Flags describing the result of verifying a signature.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct SigFlags: u32 {
        /// The result is advisory only, due to a policy check.
        const IGNORE = 0x01;
        /// Verification ran to completion.
        const PROCESSED = 0x02;
        /// The signature verified and the body hash matched.
        const PASSED = 0x04;
        /// The key is a test key (*t=y*).
        const TEST_KEY = 0x08;
        /// The key disallows subdomains (*t=s*), but the *From* domain is a
        /// subdomain of the signing domain.
        const NO_SUBDOMAIN = 0x10;
        /// The public key was retrieved and decoded.
        const KEY_LOADED = 0x20;
    }
}

/// The result of comparing the computed body hash with the *bh=* tag.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BodyHashStatus {
    Match,
    Mismatch,
}

/// A policy reason for treating a verification result as advisory only.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PolicyError {
    RequiredHeadersNotSigned,
    SignatureExpired,
    TimestampInFuture,
    KeyTooSmall,
    DisallowedHashAlgorithm,
}

impl Display for PolicyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequiredHeadersNotSigned => write!(f, "headers required to be signed were not signed"),
            Self::SignatureExpired => write!(f, "signature expired"),
            Self::TimestampInFuture => write!(f, "timestamp in future"),
            Self::KeyTooSmall => write!(f, "public key size too small"),
            Self::DisallowedHashAlgorithm => write!(f, "hash algorithm not allowed by key"),
        }
    }
}

impl Error for PolicyError {}

/// An error that prevents verification from running to completion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VerifierError {
    NoSignature,
    SignatureSyntax(DkimSignatureError),
    KeyLookupTimeout,
    NoKey,
    KeyFail,
    KeyRevoked,
}

impl Display for VerifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSignature => write!(f, "no DKIM-Signature header"),
            Self::SignatureSyntax(error) => error.fmt(f),
            Self::KeyLookupTimeout => write!(f, "key record lookup timed out"),
            Self::NoKey => write!(f, "no key record found"),
            Self::KeyFail => write!(f, "key record lookup failed"),
            Self::KeyRevoked => write!(f, "key revoked"),
        }
    }
}

impl Error for VerifierError {}

/// The outcome of verifying a message.
///
/// A cryptographic mismatch is not an error: it is an outcome without the
/// `PASSED` flag. `error` is set only when verification could not run to
/// completion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VerificationOutcome {
    pub flags: SigFlags,
    /// The body hash comparison, once the body hash has been computed.
    pub body_hash: Option<BodyHashStatus>,
    /// The parsed signature, if available.
    pub signature: Option<DkimSignature>,
    /// The policy check that made this result advisory, if any.
    pub policy: Option<PolicyError>,
    pub error: Option<VerifierError>,
}

impl VerificationOutcome {
    fn failed(error: VerifierError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn is_passed(&self) -> bool {
        self.flags.contains(SigFlags::PASSED)
    }

    pub fn is_test_key(&self) -> bool {
        self.flags.contains(SigFlags::TEST_KEY)
    }
}

struct PreparedSignature {
    sig: DkimSignature,
    name: Box<str>,
    name_padding: Box<str>,
    value: Box<str>,
    body_hasher: BodyHasher,
}

enum VerifyTask {
    NoSignature,
    Invalid(DkimSignatureError),
    Ready(Box<PreparedSignature>),
}

/// A verifier of the DKIM signature in an email message.
///
/// The verifier is staged like the message itself:
///
/// 1. [`prepare`][Verifier::prepare]: once the header is complete, find and
///    parse the first *DKIM-Signature* header
/// 2. [`process_body_chunk`][Verifier::process_body_chunk]: then, any number of
///    chunks of the message body are fed to the body hasher
/// 3. [`finish`][Verifier::finish] (async): finally, the body hash is compared,
///    the public key is resolved, and the signature is verified
pub struct Verifier {
    task: VerifyTask,
}

impl Verifier {
    /// Prepares verification of the given message header.
    pub fn prepare(headers: &HeaderFields, config: &Config) -> Self {
        let field = match header::find_dkim_signature(headers) {
            Some(field) => field,
            None => {
                trace!("no DKIM-Signature header");
                return Self { task: VerifyTask::NoSignature };
            }
        };

        // well-formed DKIM-Signature contain only UTF-8
        let value = match str::from_utf8(field.body.as_ref()) {
            Ok(value) => value,
            Err(_) => {
                let error = DkimSignatureError {
                    domain: None,
                    kind: DkimSignatureErrorKind::ValueSyntax,
                };
                return Self { task: VerifyTask::Invalid(error) };
            }
        };

        let sig = match DkimSignature::parse(value, config.strict_tags) {
            Ok(sig) => sig,
            Err(e) => {
                trace!("invalid DKIM-Signature: {e}");
                return Self { task: VerifyTask::Invalid(e) };
            }
        };

        let limit = sig
            .body_length
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX));

        let body_hasher = BodyHasher::new(
            sig.algorithm.hash_algorithm(),
            sig.canonicalization.body,
            limit,
            config.fix_crlf,
        );

        let prepared = PreparedSignature {
            sig,
            name: field.name.as_ref().into(),
            name_padding: field.name_padding.clone(),
            value: value.into(),
            body_hasher,
        };

        Self {
            task: VerifyTask::Ready(Box::new(prepared)),
        }
    }

    /// Processes a chunk of the message body.
    ///
    /// The chunk is canonicalised and hashed, but not otherwise retained in
    /// memory.
    pub fn process_body_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        match &mut self.task {
            VerifyTask::Ready(prepared) => prepared.body_hasher.hash_chunk(chunk),
            _ => BodyHasherStance::Done,
        }
    }

    /// Completes verification.
    ///
    /// The public key is resolved through `resolver`, bounded by the
    /// configured lookup timeout.
    pub async fn finish<R>(
        self,
        resolver: &R,
        headers: &HeaderFields,
        config: &Config,
    ) -> VerificationOutcome
    where
        R: KeyResolver + ?Sized,
    {
        let prepared = match self.task {
            VerifyTask::NoSignature => return VerificationOutcome::failed(VerifierError::NoSignature),
            VerifyTask::Invalid(e) => {
                return VerificationOutcome::failed(VerifierError::SignatureSyntax(e));
            }
            VerifyTask::Ready(prepared) => *prepared,
        };

        let PreparedSignature { sig, name, name_padding, value, body_hasher } = prepared;

        let mut outcome = VerificationOutcome::default();

        // body hash, independent of the signature check

        let body_hash = body_hasher.finish();
        let body_length_ok = match sig.body_length {
            Some(n) => u64::try_from(body_hash.length).map_or(false, |len| len == n),
            None => true,
        };
        let body_hash_status = if body_length_ok && body_hash.digest == sig.body_hash {
            BodyHashStatus::Match
        } else {
            trace!("body hash mismatch");
            BodyHashStatus::Mismatch
        };
        outcome.body_hash = Some(body_hash_status);

        let current_t = config.current_timestamp();
        if let Err(e) = header::check_signature_policy(&sig, config, current_t) {
            outcome.policy = Some(e);
        }

        // key retrieval

        let query = resolver.resolve(&sig.selector, &sig.domain);
        let lookup_result = match time::timeout(config.lookup_timeout, query).await {
            Ok(r) => r,
            Err(_) => Err(KeyResolveError::Timeout),
        };

        let public_key = match lookup_result {
            Ok(key) => key,
            Err(e) => {
                trace!(domain = %sig.domain, selector = %sig.selector, "key resolution failed: {e}");
                outcome.error = Some(match e {
                    KeyResolveError::NoKey => VerifierError::NoKey,
                    KeyResolveError::KeyFail => VerifierError::KeyFail,
                    KeyResolveError::Revoked => VerifierError::KeyRevoked,
                    KeyResolveError::Timeout => VerifierError::KeyLookupTimeout,
                });
                outcome.signature = Some(sig);
                return outcome;
            }
        };

        let verifying_key = match VerifyingKey::from_key_data(&public_key.key_data) {
            Ok(k) => k,
            Err(e) => {
                trace!("could not decode public key: {e}");
                outcome.error = Some(VerifierError::KeyFail);
                outcome.signature = Some(sig);
                return outcome;
            }
        };

        outcome.flags |= SigFlags::KEY_LOADED;
        if public_key.testing {
            outcome.flags |= SigFlags::TEST_KEY;
        }

        let hash_alg = sig.algorithm.hash_algorithm();
        if outcome.policy.is_none() {
            if verifying_key.key_size() < config.min_key_bits {
                trace!("public key size {} too small", verifying_key.key_size());
                outcome.policy = Some(PolicyError::KeyTooSmall);
            } else if !public_key.allows_hash_algorithm(hash_alg) {
                trace!("hash algorithm {hash_alg:?} not allowed by key");
                outcome.policy = Some(PolicyError::DisallowedHashAlgorithm);
            }
        }

        if public_key.no_subdomains {
            if let Some(from_domain) = header::from_domain(headers) {
                if from_domain.is_subdomain_of(&sig.domain) {
                    trace!("From domain {from_domain} is a subdomain of {}", sig.domain);
                    outcome.flags |= SigFlags::NO_SUBDOMAIN;
                }
            }
        }

        // signature check

        let verified = verify::perform_verification(
            headers,
            &verifying_key,
            &sig,
            &name,
            &name_padding,
            &value,
        )
        .is_ok();

        outcome.flags |= SigFlags::PROCESSED;

        if outcome.policy.is_some() {
            outcome.flags |= SigFlags::IGNORE;
        }

        if verified
            && body_hash_status == BodyHashStatus::Match
            && !outcome.flags.intersects(SigFlags::NO_SUBDOMAIN | SigFlags::IGNORE)
        {
            outcome.flags |= SigFlags::PASSED;
        }

        outcome.signature = Some(sig);

        outcome
    }
}
