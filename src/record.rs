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

//! DKIM public key record.

use crate::{
    crypto::HashAlgorithm,
    tag_list::{
        parse_base64_tag_value, parse_colon_separated_tag_value, TagList, TagListParseError,
        TagSpec,
    },
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ServiceType {
    Any,
    Email,
    Other(Box<str>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Flags {
    Testing,
    NoSubdomains,
    Other(Box<str>),
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DkimKeyRecordParseError {
    TagListSyntax,
    InvalidBase64,
    UnsupportedVersion,
    MisplacedVersionTag,
    UnsupportedKeyType,
    NoSupportedHashAlgorithms,
    RevokedKey,
    MissingKeyTag,
    ServiceTypesEmpty,
}

impl Display for DkimKeyRecordParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::TagListSyntax => write!(f, "invalid tag-list"),
            Self::InvalidBase64 => write!(f, "invalid Base64 string"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::MisplacedVersionTag => write!(f, "v= tag not initial"),
            Self::UnsupportedKeyType => write!(f, "unsupported key type"),
            Self::NoSupportedHashAlgorithms => write!(f, "no supported hash algorithms"),
            Self::RevokedKey => write!(f, "key revoked"),
            Self::MissingKeyTag => write!(f, "p= tag missing"),
            Self::ServiceTypesEmpty => write!(f, "service types empty"),
        }
    }
}

impl Error for DkimKeyRecordParseError {}

impl From<TagListParseError> for DkimKeyRecordParseError {
    fn from(_: TagListParseError) -> Self {
        Self::TagListSyntax
    }
}

/// A DKIM public key record, as published in DNS.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DkimKeyRecord {
    pub hash_algorithms: Box<[HashAlgorithm]>,  // non-empty
    pub key_data: Box<[u8]>,  // non-empty
    pub service_types: Box<[ServiceType]>,  // non-empty
    pub flags: Box<[Flags]>,
}

impl DkimKeyRecord {
    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, DkimKeyRecordParseError> {
        let mut hash_algorithms = HashAlgorithm::all();
        let mut key_data = None;
        let mut service_types = vec![ServiceType::Any];
        let mut flags = vec![];

        for (i, &TagSpec { name, value }) in tag_list.as_ref().iter().enumerate() {
            match name {
                "v" => {
                    if i != 0 {
                        return Err(DkimKeyRecordParseError::MisplacedVersionTag);
                    }
                    if value != "DKIM1" {
                        return Err(DkimKeyRecordParseError::UnsupportedVersion);
                    }
                }
                "h" => {
                    hash_algorithms = parse_colon_separated_tag_value(value)
                        .into_iter()
                        .filter_map(|s| {
                            if s.eq_ignore_ascii_case("sha256") {
                                Some(HashAlgorithm::Sha256)
                            } else if s.eq_ignore_ascii_case("sha1") {
                                Some(HashAlgorithm::Sha1)
                            } else {
                                None
                            }
                        })
                        .collect();

                    if hash_algorithms.is_empty() {
                        return Err(DkimKeyRecordParseError::NoSupportedHashAlgorithms);
                    }
                }
                "k" => {
                    if !value.eq_ignore_ascii_case("rsa") {
                        return Err(DkimKeyRecordParseError::UnsupportedKeyType);
                    }
                }
                "p" => {
                    if value.is_empty() {
                        return Err(DkimKeyRecordParseError::RevokedKey);
                    }

                    let s = parse_base64_tag_value(value)
                        .map_err(|_| DkimKeyRecordParseError::InvalidBase64)?;

                    key_data = Some(s.into());
                }
                "s" => {
                    let st: Vec<_> = parse_colon_separated_tag_value(value)
                        .into_iter()
                        .filter(|s| !s.is_empty())
                        .map(|s| {
                            if s == "*" {
                                ServiceType::Any
                            } else if s.eq_ignore_ascii_case("email") {
                                ServiceType::Email
                            } else {
                                ServiceType::Other(s.into())
                            }
                        })
                        .collect();

                    if st.is_empty() {
                        return Err(DkimKeyRecordParseError::ServiceTypesEmpty);
                    }

                    service_types = st;
                }
                "t" => {
                    flags = parse_colon_separated_tag_value(value)
                        .into_iter()
                        .filter(|s| !s.is_empty())
                        .map(|s| {
                            if s.eq_ignore_ascii_case("y") {
                                Flags::Testing
                            } else if s.eq_ignore_ascii_case("s") {
                                Flags::NoSubdomains
                            } else {
                                Flags::Other(s.into())
                            }
                        })
                        .collect();
                }
                // other tags must be ignored (RFC 6376, section 3.6.1)
                _ => {}
            }
        }

        let key_data = key_data.ok_or(DkimKeyRecordParseError::MissingKeyTag)?;

        Ok(Self {
            hash_algorithms: hash_algorithms.into(),
            key_data,
            service_types: service_types.into(),
            flags: flags.into(),
        })
    }

    pub fn is_testing(&self) -> bool {
        self.flags.contains(&Flags::Testing)
    }

    pub fn no_subdomains(&self) -> bool {
        self.flags.contains(&Flags::NoSubdomains)
    }

    /// Whether the key may be used for email.
    pub fn allows_email(&self) -> bool {
        self.service_types
            .iter()
            .any(|s| matches!(s, ServiceType::Any | ServiceType::Email))
    }
}

impl FromStr for DkimKeyRecord {
    type Err = DkimKeyRecordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag_list = TagList::from_str(s)?;
        Self::from_tag_list(&tag_list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dkim_key_record_ok() {
        let record: DkimKeyRecord = "v=DKIM1; p=YWJj; s = email; t=y:s; n=notes".parse().unwrap();

        assert_eq!(
            record,
            DkimKeyRecord {
                hash_algorithms: [HashAlgorithm::Sha1, HashAlgorithm::Sha256].into(),
                key_data: b"abc".to_vec().into(),
                service_types: [ServiceType::Email].into(),
                flags: [Flags::Testing, Flags::NoSubdomains].into(),
            }
        );
        assert!(record.is_testing());
        assert!(record.no_subdomains());
        assert!(record.allows_email());

        let record: DkimKeyRecord = "k=rsa; h=sha256; p=YWJj".parse().unwrap();
        assert_eq!(record.hash_algorithms.as_ref(), [HashAlgorithm::Sha256]);
        assert!(!record.is_testing());
    }

    #[test]
    fn dkim_key_record_errors() {
        fn err(s: &str) -> DkimKeyRecordParseError {
            s.parse::<DkimKeyRecord>().unwrap_err()
        }

        assert_eq!(err("v=DKIM1; p="), DkimKeyRecordParseError::RevokedKey);
        assert_eq!(err("v=DKIM1; k=ed25519; p=YWJj"), DkimKeyRecordParseError::UnsupportedKeyType);
        assert_eq!(err("p=YWJj; v=DKIM1"), DkimKeyRecordParseError::MisplacedVersionTag);
        assert_eq!(err("v=DKIM2; p=YWJj"), DkimKeyRecordParseError::UnsupportedVersion);
        assert_eq!(err("v=DKIM1; h=md5; p=YWJj"), DkimKeyRecordParseError::NoSupportedHashAlgorithms);
        assert_eq!(err("v=DKIM1; k=rsa"), DkimKeyRecordParseError::MissingKeyTag);
        assert_eq!(err("v=DKIM1; p=Y*Jj"), DkimKeyRecordParseError::InvalidBase64);
        assert_eq!(err("v=DKIM1; p=YWJj;;"), DkimKeyRecordParseError::TagListSyntax);
    }

    #[test]
    fn dkim_key_record_lf_in_fws() {
        // real-world record using LF instead of CRLF in FWS
        let s = "v=DKIM1; h=sha256; k=rsa; \n\t  p=YWJj";

        assert!(DkimKeyRecord::from_str(s).is_err());
    }
}
