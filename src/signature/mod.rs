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

//! DKIM signature.

mod names;

pub use names::{DomainName, ParseNameError, Selector};

use crate::{
    crypto::HashAlgorithm,
    header::FieldName,
    tag_list::{
        parse_base64_tag_value, parse_colon_separated_tag_value, parse_copied_header_field,
        TagList, TagListParseError, TagSpec,
    },
    util::{encode_base64, CanonicalStr},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

/// The name of the header field carrying a DKIM signature.
pub const DKIM_SIGNATURE_NAME: &str = "DKIM-Signature";

/// A signature algorithm.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignatureAlgorithm {
    /// The *rsa-sha1* signature algorithm.
    RsaSha1,
    /// The *rsa-sha256* signature algorithm.
    RsaSha256,
}

impl SignatureAlgorithm {
    /// Returns this signature algorithm’s hash algorithm.
    pub fn hash_algorithm(self) -> HashAlgorithm {
        match self {
            Self::RsaSha1 => HashAlgorithm::Sha1,
            Self::RsaSha256 => HashAlgorithm::Sha256,
        }
    }
}

impl CanonicalStr for SignatureAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "rsa-sha1",
            Self::RsaSha256 => "rsa-sha256",
        }
    }
}

impl Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("rsa-sha256") {
            Ok(Self::RsaSha256)
        } else if s.eq_ignore_ascii_case("rsa-sha1") {
            Ok(Self::RsaSha1)
        } else {
            Err("unknown signature algorithm")
        }
    }
}

/// A canonicalization algorithm.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CanonicalizationAlgorithm {
    /// The *simple* canonicalization algorithm.
    #[default]
    Simple,
    /// The *relaxed* canonicalization algorithm.
    Relaxed,
}

impl CanonicalStr for CanonicalizationAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }
}

impl Display for CanonicalizationAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for CanonicalizationAlgorithm {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("simple") {
            Ok(Self::Simple)
        } else if s.eq_ignore_ascii_case("relaxed") {
            Ok(Self::Relaxed)
        } else {
            Err("unknown canonicalization algorithm")
        }
    }
}

/// A pair of header/body canonicalization algorithms.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct Canonicalization {
    /// The header canonicalization.
    pub header: CanonicalizationAlgorithm,
    /// The body canonicalization.
    pub body: CanonicalizationAlgorithm,
}

impl From<(CanonicalizationAlgorithm, CanonicalizationAlgorithm)> for Canonicalization {
    fn from((header, body): (CanonicalizationAlgorithm, CanonicalizationAlgorithm)) -> Self {
        Self { header, body }
    }
}

impl CanonicalStr for Canonicalization {
    fn canonical_str(&self) -> &'static str {
        use CanonicalizationAlgorithm::*;

        match (self.header, self.body) {
            (Simple, Simple) => "simple/simple",
            (Simple, Relaxed) => "simple/relaxed",
            (Relaxed, Simple) => "relaxed/simple",
            (Relaxed, Relaxed) => "relaxed/relaxed",
        }
    }
}

impl Display for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl fmt::Debug for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", &self.header, &self.body)
    }
}

impl FromStr for Canonicalization {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // a missing body algorithm defaults to simple
        Ok(match s.split_once('/') {
            Some((header, body)) => Self {
                header: header.parse()?,
                body: body.parse()?,
            },
            None => Self {
                header: s.parse()?,
                body: Default::default(),
            },
        })
    }
}

/// An error that occurs when parsing a DKIM signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DkimSignatureError {
    /// The signing domain, if it could be determined.
    pub domain: Option<DomainName>,
    pub kind: DkimSignatureErrorKind,
}

impl Display for DkimSignatureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "invalid signature for domain {domain}: {}", self.kind),
            None => write!(f, "invalid signature: {}", self.kind),
        }
    }
}

impl Error for DkimSignatureError {}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DkimSignatureErrorKind {
    InvalidTagList,
    DuplicateTag,
    UnknownTag,
    MissingVersionTag,
    UnsupportedVersion,
    MissingAlgorithmTag,
    UnsupportedAlgorithm,
    MissingSignatureTag,
    MissingBodyHashTag,
    ValueSyntax,
    UnsupportedCanonicalization,
    MissingDomainTag,
    InvalidDomain,
    MissingSignedHeadersTag,
    SignedHeadersEmpty,
    FromHeaderNotSigned,
    InvalidUserId,
    DomainMismatch,
    InvalidBodyLength,
    QueryMethodsNotSupported,
    MissingSelectorTag,
    InvalidSelector,
    InvalidTimestamp,
    InvalidExpiration,
    ExpirationNotAfterTimestamp,
}

impl Display for DkimSignatureErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTagList => write!(f, "invalid tag-list"),
            Self::DuplicateTag => write!(f, "duplicate tag"),
            Self::UnknownTag => write!(f, "unknown tag"),
            Self::MissingVersionTag => write!(f, "v= tag missing"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::MissingAlgorithmTag => write!(f, "a= tag missing"),
            Self::UnsupportedAlgorithm => write!(f, "unsupported algorithm"),
            Self::MissingSignatureTag => write!(f, "b= tag missing"),
            Self::MissingBodyHashTag => write!(f, "bh= tag missing"),
            Self::ValueSyntax => write!(f, "syntax error in tag value"),
            Self::UnsupportedCanonicalization => write!(f, "unsupported canonicalization"),
            Self::MissingDomainTag => write!(f, "d= tag missing"),
            Self::InvalidDomain => write!(f, "invalid domain"),
            Self::MissingSignedHeadersTag => write!(f, "h= tag missing"),
            Self::SignedHeadersEmpty => write!(f, "no signed headers"),
            Self::FromHeaderNotSigned => write!(f, "From header not signed"),
            Self::InvalidUserId => write!(f, "invalid user ID"),
            Self::DomainMismatch => write!(f, "domain mismatch"),
            Self::InvalidBodyLength => write!(f, "invalid body length"),
            Self::QueryMethodsNotSupported => write!(f, "query method not supported"),
            Self::MissingSelectorTag => write!(f, "s= tag missing"),
            Self::InvalidSelector => write!(f, "invalid selector"),
            Self::InvalidTimestamp => write!(f, "invalid timestamp"),
            Self::InvalidExpiration => write!(f, "invalid expiration"),
            Self::ExpirationNotAfterTimestamp => write!(f, "expiration not after timestamp"),
        }
    }
}

const KNOWN_TAGS: [&str; 14] = ["v", "a", "b", "bh", "c", "d", "h", "i", "l", "q", "s", "t", "x", "z"];

/// A DKIM signature as encoded in a `DKIM-Signature` header field.
#[derive(Clone, Eq, PartialEq)]
pub struct DkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub signature_data: Box<[u8]>,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub signed_headers: Box<[FieldName]>,  // not empty, contains From
    pub body_length: Option<u64>,
    pub selector: Selector,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
    /// Header fields copied into the `z=` tag, as name and undecorated value.
    pub copied_headers: Option<Box<[(FieldName, Box<[u8]>)]>>,
}

impl DkimSignature {
    /// Parses a DKIM signature from the value of a `DKIM-Signature` header
    /// field.
    ///
    /// When `strict` is set, tags not defined in RFC 6376 are rejected,
    /// otherwise they are ignored.
    pub fn parse(s: &str, strict: bool) -> Result<Self, DkimSignatureError> {
        let tag_list = TagList::from_str(s).map_err(|e| DkimSignatureError {
            domain: None,
            kind: match e {
                TagListParseError::DuplicateTag => DkimSignatureErrorKind::DuplicateTag,
                TagListParseError::Syntax => DkimSignatureErrorKind::InvalidTagList,
            },
        })?;

        Self::from_tag_list(&tag_list, strict).map_err(|kind| {
            // attempt to find some info for diagnostics
            let domain = tag_list.get("d").and_then(|d| DomainName::new(d).ok());
            DkimSignatureError { domain, kind }
        })
    }

    fn from_tag_list(tag_list: &TagList<'_>, strict: bool) -> Result<Self, DkimSignatureErrorKind> {
        let mut version_seen = false;
        let mut algorithm = None;
        let mut signature_data = None;
        let mut body_hash = None;
        let mut canonicalization = None;
        let mut domain = None;
        let mut signed_headers = None;
        let mut user_id = None;
        let mut body_length = None;
        let mut selector = None;
        let mut timestamp = None;
        let mut expiration = None;
        let mut copied_headers = None;

        for &TagSpec { name, value } in tag_list.as_ref() {
            match name {
                "v" => {
                    if value != "1" {
                        return Err(DkimSignatureErrorKind::UnsupportedVersion);
                    }
                    version_seen = true;
                }
                "a" => {
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureErrorKind::UnsupportedAlgorithm)?;
                    algorithm = Some(value);
                }
                "b" => {
                    let value = parse_base64_tag_value(value)
                        .map_err(|_| DkimSignatureErrorKind::ValueSyntax)?;
                    signature_data = Some(value.into());
                }
                "bh" => {
                    let value = parse_base64_tag_value(value)
                        .map_err(|_| DkimSignatureErrorKind::ValueSyntax)?;
                    body_hash = Some(value.into());
                }
                "c" => {
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureErrorKind::UnsupportedCanonicalization)?;
                    canonicalization = Some(value);
                }
                "d" => {
                    let value = DomainName::new(value)
                        .map_err(|_| DkimSignatureErrorKind::InvalidDomain)?;
                    domain = Some(value);
                }
                "h" => {
                    if value.is_empty() {
                        return Err(DkimSignatureErrorKind::SignedHeadersEmpty);
                    }
                    let sh = parse_colon_separated_tag_value(value)
                        .into_iter()
                        .map(FieldName::new)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|_| DkimSignatureErrorKind::ValueSyntax)?;
                    if !sh.iter().any(|h| *h == "From") {
                        return Err(DkimSignatureErrorKind::FromHeaderNotSigned);
                    }
                    signed_headers = Some(sh.into());
                }
                "i" => {
                    let (_, d) = value
                        .rsplit_once('@')
                        .ok_or(DkimSignatureErrorKind::InvalidUserId)?;
                    let value = DomainName::new(d)
                        .map_err(|_| DkimSignatureErrorKind::InvalidUserId)?;
                    user_id = Some(value);
                }
                "l" => {
                    let value = parse_decimal(value)
                        .ok_or(DkimSignatureErrorKind::InvalidBodyLength)?;
                    body_length = Some(value);
                }
                "q" => {
                    if !parse_colon_separated_tag_value(value)
                        .iter()
                        .any(|v| v.eq_ignore_ascii_case("dns/txt"))
                    {
                        return Err(DkimSignatureErrorKind::QueryMethodsNotSupported);
                    }
                }
                "s" => {
                    let value = Selector::new(value)
                        .map_err(|_| DkimSignatureErrorKind::InvalidSelector)?;
                    selector = Some(value);
                }
                "t" => {
                    let value = parse_decimal(value)
                        .ok_or(DkimSignatureErrorKind::InvalidTimestamp)?;
                    timestamp = Some(value);
                }
                "x" => {
                    let value = parse_decimal(value)
                        .ok_or(DkimSignatureErrorKind::InvalidExpiration)?;
                    expiration = Some(value);
                }
                "z" => {
                    let value = value
                        .split('|')
                        .map(parse_copied_header_field)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|_| DkimSignatureErrorKind::ValueSyntax)?;
                    copied_headers = Some(value.into());
                }
                name => {
                    if strict && !KNOWN_TAGS.contains(&name) {
                        return Err(DkimSignatureErrorKind::UnknownTag);
                    }
                }
            }
        }

        if !version_seen {
            return Err(DkimSignatureErrorKind::MissingVersionTag);
        }

        let algorithm = algorithm.ok_or(DkimSignatureErrorKind::MissingAlgorithmTag)?;
        let signature_data = signature_data.ok_or(DkimSignatureErrorKind::MissingSignatureTag)?;
        let body_hash = body_hash.ok_or(DkimSignatureErrorKind::MissingBodyHashTag)?;
        let domain = domain.ok_or(DkimSignatureErrorKind::MissingDomainTag)?;
        let signed_headers = signed_headers.ok_or(DkimSignatureErrorKind::MissingSignedHeadersTag)?;
        let selector = selector.ok_or(DkimSignatureErrorKind::MissingSelectorTag)?;

        if let Some(user_domain) = user_id {
            if !user_domain.eq_or_subdomain_of(&domain) {
                return Err(DkimSignatureErrorKind::DomainMismatch);
            }
        }

        if let (Some(timestamp), Some(expiration)) = (timestamp, expiration) {
            if expiration <= timestamp {
                return Err(DkimSignatureErrorKind::ExpirationNotAfterTimestamp);
            }
        }

        let canonicalization = canonicalization.unwrap_or_default();

        Ok(Self {
            algorithm,
            signature_data,
            body_hash,
            canonicalization,
            domain,
            signed_headers,
            body_length,
            selector,
            timestamp,
            expiration,
            copied_headers,
        })
    }
}

// 1*76DIGIT
fn parse_decimal(s: &str) -> Option<u64> {
    if s.is_empty() || s.len() > 76 || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    // values too large for u64 are saturated
    Some(s.parse().unwrap_or(u64::MAX))
}

impl FromStr for DkimSignature {
    type Err = DkimSignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, false)
    }
}

impl fmt::Debug for DkimSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DkimSignature")
            .field("algorithm", &self.algorithm)
            .field("signature_data", &encode_base64(&self.signature_data))
            .field("body_hash", &encode_base64(&self.body_hash))
            .field("canonicalization", &self.canonicalization)
            .field("domain", &self.domain)
            .field("signed_headers", &self.signed_headers)
            .field("body_length", &self.body_length)
            .field("selector", &self.selector)
            .field("timestamp", &self.timestamp)
            .field("expiration", &self.expiration)
            .field("copied_headers", &self.copied_headers.as_ref().map(|h| {
                h.iter()
                    .map(|(name, value)| (name, String::from_utf8_lossy(value)))
                    .collect::<Vec<_>>()
            }))
            .finish()
    }
}
