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

//! Signer and supporting types.

mod format;
mod request;
mod sign;

pub use format::{UnsignedDkimSignature, LINE_WIDTH};
pub use request::{
    default_signed_headers, select_headers, BodyLength, HeaderSelection, SignRequest, Timestamp,
};

use crate::{
    header::HeaderFields,
    message_hash::{BodyHasher, BodyHasherStance},
    signature::DkimSignature,
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

/// An error that occurs when using a [`Signer`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignerError {
    /// Conversion from or to a requested integer data type cannot be supported
    /// in this implementation or on the current platform.
    Overflow,
    ZeroExpirationDuration,
    FromHeaderNotSigned,
    MissingFromHeader,
    NoSignedHeaders,
    SigningFailure,
}

impl Display for SignerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow => write!(f, "integer too large"),
            Self::ZeroExpirationDuration => write!(f, "zero expiration duration"),
            Self::FromHeaderNotSigned => write!(f, "From header not signed"),
            Self::MissingFromHeader => write!(f, "no From header"),
            Self::NoSignedHeaders => write!(f, "no headers to sign"),
            Self::SigningFailure => write!(f, "signing failed"),
        }
    }
}

impl Error for SignerError {}

/// The result of a successful signing operation.
#[derive(Clone, Debug, PartialEq)]
pub struct SigningResult {
    pub signature: DkimSignature,
    /// The header name, always *DKIM-Signature*.
    pub header_name: String,
    /// The formatted header value, beginning with a single space.
    pub header_value: String,
}

impl SigningResult {
    /// Returns the complete header field, without final CRLF.
    ///
    /// Name and value are concatenated with only a colon in between, as the
    /// value already carries its leading space. This is vital for *simple*
    /// header canonicalization, where no whitespace changes are allowed.
    pub fn format_header(&self) -> String {
        format!("{}:{}", self.header_name, self.header_value)
    }
}

/// A signer for an email message.
pub struct Signer {
    request: SignRequest,
    body_hasher: BodyHasher,
}

impl Signer {
    /// Prepares a message signing process.
    ///
    /// When `fix_line_endings` is set, bare LF in the body is treated as CRLF.
    pub fn prepare_signing(request: SignRequest, fix_line_endings: bool) -> Result<Self, SignerError> {
        request::validate_request(&request)?;

        let limit = request.body_length.to_limit().map_err(|_| SignerError::Overflow)?;

        let body_hasher = BodyHasher::new(
            request.algorithm.hash_algorithm(),
            request.canonicalization.body,
            limit,
            fix_line_endings,
        );

        Ok(Self { request, body_hasher })
    }

    /// Processes a chunk of the message body.
    ///
    /// Note that the chunk is canonicalised and hashed, but not otherwise
    /// retained in memory.
    pub fn hash_body_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        self.body_hasher.hash_chunk(chunk)
    }

    /// Completes the signing process and produces the formatted signature.
    ///
    /// `now` is the current Unix time, used for *Timestamp::Now*.
    pub fn finish(
        self,
        headers: &HeaderFields,
        now: u64,
        line_width: usize,
    ) -> Result<SigningResult, SignerError> {
        let body_hash = self.body_hasher.finish();

        sign::perform_signing(self.request, headers, body_hash, now, line_width)
    }
}
