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

use crate::crypto::HashAlgorithm;
use ::digest::{Digest, DynDigest};
use sha1::Sha1;
use sha2::Sha256;

/// Computes the digest of the concatenation of some byte slices.
pub fn digest_slices<I, T>(hash_alg: HashAlgorithm, slices: I) -> Box<[u8]>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    fn digest_all<D: Digest, I: IntoIterator<Item = T>, T: AsRef<[u8]>>(slices: I) -> Box<[u8]> {
        let mut hasher = D::new();
        for bytes in slices {
            hasher.update(bytes.as_ref());
        }
        Box::from(&hasher.finalize()[..])
    }

    match hash_alg {
        HashAlgorithm::Sha1 => digest_all::<Sha1, _, _>(slices),
        HashAlgorithm::Sha256 => digest_all::<Sha256, _, _>(slices),
    }
}

/// Computes the digest of some bytes.
pub fn digest(hash_alg: HashAlgorithm, bytes: &[u8]) -> Box<[u8]> {
    digest_slices(hash_alg, [bytes])
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HashStatus {
    AllConsumed,  // input was digested entirely
    Truncated,  // input was only partially digested, the rest was ignored
}

/// A hasher that stops consuming input once a length limit is reached.
pub struct CountingHasher {
    digest: Box<dyn DynDigest + Send>,
    limit: Option<usize>,
    bytes_written: usize,
}

impl CountingHasher {
    pub fn new(hash_alg: HashAlgorithm, limit: Option<usize>) -> Self {
        let digest: Box<dyn DynDigest + Send> = match hash_alg {
            HashAlgorithm::Sha1 => Box::new(Sha1::default()),
            HashAlgorithm::Sha256 => Box::new(Sha256::default()),
        };

        Self {
            digest,
            limit,
            bytes_written: 0,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) -> HashStatus {
        let (bytes, status) = match self.limit {
            Some(limit) => {
                let remaining = limit - self.bytes_written;
                if remaining >= bytes.len() {
                    (bytes, HashStatus::AllConsumed)
                } else {
                    (&bytes[..remaining], HashStatus::Truncated)
                }
            }
            None => (bytes, HashStatus::AllConsumed),
        };

        self.digest.update(bytes);
        self.bytes_written += bytes.len();

        status
    }

    /// Whether the limit has been reached and further input is ignored.
    pub fn is_done(&self) -> bool {
        matches!(self.limit, Some(limit) if limit == self.bytes_written)
    }

    /// Returns the digest and the number of bytes that went into it. This may
    /// be less than the limit if input ran out before it was reached.
    pub fn finish(self) -> (Box<[u8]>, usize) {
        (self.digest.finalize(), self.bytes_written)
    }
}
