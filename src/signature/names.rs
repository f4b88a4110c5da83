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

use crate::tag_list;
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
};

/// An error indicating an invalid domain name or selector.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ParseNameError;

impl Display for ParseNameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse domain name or selector")
    }
}

impl Error for ParseNameError {}

/// A domain name.
///
/// This type is used to wrap domain names as used in the d= tag.
#[derive(Clone, Eq)]
pub struct DomainName(Box<str>);

impl DomainName {
    /// Creates a new domain name from the given string.
    ///
    /// The string is validated and then encapsulated as-is. Equivalence
    /// comparison is case-insensitive.
    pub fn new(s: &str) -> Result<Self, ParseNameError> {
        if s.ends_with('.') {
            return Err(ParseNameError);
        }

        if is_valid_dns_name(s) && idna::domain_to_ascii(s).is_ok() {
            Ok(Self(s.into()))
        } else {
            Err(ParseNameError)
        }
    }

    /// Returns the A-label (ASCII) form of this domain name.
    pub fn to_ascii(&self) -> String {
        // validated in constructor, fall back to the name as given
        idna::domain_to_ascii(&self.0).unwrap_or_else(|_| self.0.to_ascii_lowercase())
    }

    /// Whether this domain is equal to or a subdomain of the given domain, in
    /// case-insensitive and IDNA-aware manner.
    pub fn eq_or_subdomain_of(&self, other: &DomainName) -> bool {
        self == other || self.is_subdomain_of(other)
    }

    /// Whether this domain is a proper subdomain of the given domain.
    pub fn is_subdomain_of(&self, other: &DomainName) -> bool {
        let name = self.to_ascii();
        let other = other.to_ascii();

        if name.len() > other.len() {
            let len = name.len() - other.len();
            matches!(name.get(len..), Some(s) if s.eq_ignore_ascii_case(&other))
                && matches!(name.get(..len), Some(s) if s.ends_with('.'))
        } else {
            false
        }
    }
}

impl Display for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &self.0)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq for DomainName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for DomainName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

fn is_valid_dns_name(s: &str) -> bool {
    fn is_tld(s: &str) -> bool {
        is_label(s) && !s.chars().all(|c: char| c.is_ascii_digit())
    }

    if !matches!(s.len(), 1..=MAX_DOMAIN_LENGTH) {
        return false;
    }

    let mut labels = s.split('.').rev().peekable();

    if matches!(labels.next(), Some(l) if !is_tld(l)) {
        return false;
    }
    if labels.peek().is_none() {
        return false;
    }

    labels.all(is_label)
}

const MAX_DOMAIN_LENGTH: usize = 253;

// lenient: allows labels like "dkim_123"; tval chars exclude ';'
fn is_label(s: &str) -> bool {
    matches!(s.len(), 1..=63)
        && !s.starts_with('-')
        && !s.ends_with('-')
        && s.chars().all(tag_list::is_tval_char)
}

/// A selector.
///
/// This type is used to wrap a sequence of labels as used in the s= tag.
#[derive(Clone, Eq)]
pub struct Selector(Box<str>);

impl Selector {
    /// Creates a new selector from the given string.
    pub fn new(s: &str) -> Result<Self, ParseNameError> {
        if !s.split('.').all(is_label) {
            return Err(ParseNameError);
        }

        idna::domain_to_ascii(s).map_err(|_| ParseNameError)?;

        Ok(Self(s.into()))
    }

    /// Returns the A-label (ASCII) form of this selector.
    pub fn to_ascii(&self) -> String {
        idna::domain_to_ascii(&self.0).unwrap_or_else(|_| self.0.to_ascii_lowercase())
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &self.0)
    }
}

impl AsRef<str> for Selector {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_name_ok() {
        assert!(DomainName::new("example.com").is_ok());
        assert!(DomainName::new("example.中国").is_ok());
        assert!(DomainName::new("xn--53h.example.xn--fiqs8s").is_ok());

        assert!(DomainName::new("example").is_err());
        assert!(DomainName::new("example.com.").is_err());
        assert!(DomainName::new("exa;mple.com").is_err());
    }

    #[test]
    fn domain_name_subdomains() {
        let d = |s| DomainName::new(s).unwrap();

        assert!(d("mail.example.com").is_subdomain_of(&d("example.com")));
        assert!(d("Mail.Example.COM").eq_or_subdomain_of(&d("example.com")));
        assert!(d("example.com").eq_or_subdomain_of(&d("EXAMPLE.com")));

        assert!(!d("example.com").is_subdomain_of(&d("example.com")));
        assert!(!d("badexample.com").is_subdomain_of(&d("example.com")));
        assert!(!d("example.org").eq_or_subdomain_of(&d("example.com")));
    }

    #[test]
    fn selector_ok() {
        assert!(Selector::new("example").is_ok());
        assert!(Selector::new("odktest").is_ok());
        assert!(Selector::new("_x.example").is_ok());
        assert!(Selector::new("dkim_123").is_ok());

        assert!(Selector::new("").is_err());
        assert!(Selector::new(".").is_err());
        assert!(Selector::new("example.").is_err());
    }
}
