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

//! Computation of the message hashes.

use crate::{
    canonicalize::{self, BodyCanonicalizer, LineEndingFixer},
    crypto::{self, CountingHasher, HashAlgorithm, HashStatus},
    header::{FieldName, HeaderFields},
    signature::CanonicalizationAlgorithm,
};

/// Computes the hash over the selected header fields and the DKIM-Signature
/// header field, which must already have its b= tag value removed.
///
/// The signature header field is canonicalized without a final CRLF.
pub fn compute_data_hash(
    hash_alg: HashAlgorithm,
    canon_alg: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
    sig_name: &str,
    sig_name_padding: &str,
    sig_value_without_b: &str,
) -> Box<[u8]> {
    let mut cheaders = canonicalize::canonicalize_headers(canon_alg, headers, selected_headers);

    canonicalize::canonicalize_padded_header(
        &mut cheaders,
        canon_alg,
        sig_name,
        sig_name_padding,
        sig_value_without_b,
    );

    crypto::digest(hash_alg, &cheaders)
}

/// The stance of a body hasher regarding additional body content.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[must_use]
pub enum BodyHasherStance {
    /// More body content may still contribute to the hash.
    Interested,
    /// The length limit has been reached, further body content is ignored.
    Done,
}

/// The result of body hashing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BodyHash {
    pub digest: Box<[u8]>,
    /// Number of canonical body bytes that went into the digest.
    pub length: usize,
}

/// A producer of the *body hash*.
///
/// The body hasher canonicalizes and hashes chunks of the message body.
/// Canonical output beyond the length limit, if any, is not hashed.
pub struct BodyHasher {
    fixer: Option<LineEndingFixer>,
    canonicalizer: BodyCanonicalizer,
    hasher: CountingHasher,
    buffer: Vec<u8>,
}

impl BodyHasher {
    pub fn new(
        hash_alg: HashAlgorithm,
        canon_alg: CanonicalizationAlgorithm,
        limit: Option<usize>,
        fix_line_endings: bool,
    ) -> Self {
        Self {
            fixer: fix_line_endings.then(LineEndingFixer::new),
            canonicalizer: BodyCanonicalizer::new(canon_alg),
            hasher: CountingHasher::new(hash_alg, limit),
            buffer: Vec::new(),
        }
    }

    pub fn hash_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        if self.hasher.is_done() {
            return BodyHasherStance::Done;
        }

        let chunk = match &mut self.fixer {
            Some(fixer) => fixer.fix(chunk),
            None => chunk.into(),
        };

        self.buffer.clear();
        self.canonicalizer.canonicalize_chunk(&chunk, &mut self.buffer);

        match self.hasher.update(&self.buffer) {
            HashStatus::Truncated => BodyHasherStance::Done,
            HashStatus::AllConsumed if self.hasher.is_done() => BodyHasherStance::Done,
            HashStatus::AllConsumed => BodyHasherStance::Interested,
        }
    }

    pub fn finish(mut self) -> BodyHash {
        if !self.hasher.is_done() {
            self.buffer.clear();
            self.canonicalizer.finish(&mut self.buffer);
            let _ = self.hasher.update(&self.buffer);
        }

        let (digest, length) = self.hasher.finish();

        BodyHash { digest, length }
    }
}
