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

use crate::{
    crypto::SigningKey,
    header::{FieldName, HeaderFields},
    signature::{Canonicalization, DomainName, Selector, SignatureAlgorithm},
    signer::SignerError,
};
use std::{num::TryFromIntError, time::Duration};

/// A generator for the body length limit tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum BodyLength {
    /// Do not limit the body length: no *l=* tag.
    #[default]
    All,
    /// Sign the body as presented: set *l=* to the actual canonical body
    /// length.
    MessageContent,
    /// Sign at most the specified number of bytes of canonical body content:
    /// set *l=* to the number of bytes actually signed.
    Exact(u64),
}

impl BodyLength {
    /// Returns the limit to apply while hashing the body.
    pub fn to_limit(self) -> Result<Option<usize>, TryFromIntError> {
        match self {
            Self::All | Self::MessageContent => Ok(None),
            Self::Exact(n) => n.try_into().map(Some),
        }
    }
}

/// A generator for the timestamp tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Timestamp {
    /// Use the current time.
    #[default]
    Now,
    /// Use the given Unix timestamp.
    Exact(u64),
}

/// Selection of headers to include in the *h=* tag.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum HeaderSelection {
    /// Select all occurrences of the headers in the default set, see
    /// [`default_signed_headers`].
    #[default]
    Auto,
    /// Use exactly the headers given here as contents of the *h=* tag.
    Manual(Vec<FieldName>),
}

/// Selects all headers matching the predicate, in message order.
pub fn select_headers<'a, 'b: 'a>(
    headers: &'a HeaderFields,
    mut pred: impl FnMut(&FieldName) -> bool + 'b,
) -> impl DoubleEndedIterator<Item = &'a FieldName> + 'a {
    headers
        .as_ref()
        .iter()
        .filter_map(move |field| if pred(&field.name) { Some(&field.name) } else { None })
}

/// Returns a collection of headers that should be signed.
///
/// RFC 6376 does not actually recommend a specific set of headers to be signed.
/// Instead, the collection returned here contains the so-called ‘examples’ from
/// section 5.4.1.
pub fn default_signed_headers() -> Vec<FieldName> {
    let names = [
        "From",
        "Reply-To",
        "Subject",
        "Date",
        "To",
        "Cc",
        "Resent-Date",
        "Resent-From",
        "Resent-Sender",
        "Resent-To",
        "Resent-Cc",
        "In-Reply-To",
        "References",
        "List-Id",
        "List-Help",
        "List-Unsubscribe",
        "List-Subscribe",
        "List-Post",
        "List-Owner",
        "List-Archive",
        "Message-ID",
    ];

    names
        .into_iter()
        .filter_map(|n| FieldName::new(n).ok())
        .collect()
}

/// A request for creation of a DKIM signature.
pub struct SignRequest {
    /// The key to use for producing the cryptographic signature.
    pub signing_key: SigningKey,

    /// The signature algorithm to use in the *a=* tag.
    pub algorithm: SignatureAlgorithm,
    /// The canonicalization to use in the *c=* tag.
    pub canonicalization: Canonicalization,
    /// The selection of headers to include in the *h=* tag.
    pub header_selection: HeaderSelection,
    /// Header names to list once more after the selected headers, so that
    /// occurrences added in transit break the signature.
    pub oversigned_headers: Vec<FieldName>,
    /// The signing domain to use in the *d=* tag.
    pub domain: DomainName,
    /// The selector to use in the *s=* tag.
    pub selector: Selector,
    /// The strategy to use for generating the *l=* tag.
    pub body_length: BodyLength,
    /// The timestamp value to record in the *t=* tag.
    pub timestamp: Timestamp,
    /// The duration for which the signature will remain valid (*x=* tag).
    pub valid_duration: Option<Duration>,
    /// Whether to record the signed header fields in the *z=* tag.
    pub copy_headers: bool,
}

impl SignRequest {
    pub fn new(
        domain: DomainName,
        selector: Selector,
        algorithm: SignatureAlgorithm,
        signing_key: SigningKey,
    ) -> Self {
        Self {
            signing_key,

            algorithm,
            canonicalization: Default::default(),
            header_selection: HeaderSelection::Auto,
            oversigned_headers: vec![],
            domain,
            selector,
            body_length: BodyLength::All,
            timestamp: Timestamp::Now,
            valid_duration: None,
            copy_headers: false,
        }
    }
}

pub fn validate_request(request: &SignRequest) -> Result<(), SignerError> {
    if let Some(duration) = request.valid_duration {
        if duration.as_secs() == 0 {
            return Err(SignerError::ZeroExpirationDuration);
        }
    }

    if let HeaderSelection::Manual(names) = &request.header_selection {
        if !names.iter().any(|name| *name == "From") {
            return Err(SignerError::FromHeaderNotSigned);
        }
    }

    if request.body_length.to_limit().is_err() {
        return Err(SignerError::Overflow);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{FieldBody, HeaderField};
    use std::collections::HashSet;

    #[test]
    fn select_headers_ok() {
        let headers = make_header_fields(["From", "Aa", "Bb", "Aa", "Dd"]);

        let names = make_field_names(["from", "aa", "bb", "cc"]);

        let selection = select_headers(&headers, move |name| names.contains(name));

        assert!(selection.map(|n| n.as_ref()).eq(["From", "Aa", "Bb", "Aa"]));
    }

    #[test]
    fn default_signed_headers_contains_from() {
        let names = default_signed_headers();

        assert_eq!(names.len(), 21);
        assert!(names.iter().any(|n| *n == "from"));
    }

    #[test]
    fn body_length_limit() {
        assert_eq!(BodyLength::All.to_limit(), Ok(None));
        assert_eq!(BodyLength::MessageContent.to_limit(), Ok(None));
        assert_eq!(BodyLength::Exact(27).to_limit(), Ok(Some(27)));
    }

    fn make_header_fields(names: impl IntoIterator<Item = &'static str>) -> HeaderFields {
        let fields: Vec<_> = names
            .into_iter()
            .map(|name| HeaderField::new(FieldName::new(name).unwrap(), FieldBody::new(*b"").unwrap()))
            .collect();
        HeaderFields::new(fields).unwrap()
    }

    fn make_field_names(names: impl IntoIterator<Item = &'static str>) -> HashSet<FieldName> {
        names
            .into_iter()
            .map(|name| FieldName::new(name).unwrap())
            .collect()
    }
}
