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

//! Parsing of the tag=value list syntax shared by signatures and key records.

use crate::{
    header::FieldName,
    quoted_printable,
    util::{decode_base64, Base64Error},
};
use std::{
    collections::HashSet,
    error::Error,
    fmt::{self, Display, Formatter},
};

/// A single tag=value pair, with surrounding whitespace removed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TagSpec<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TagListParseError {
    DuplicateTag,
    Syntax,
}

impl Display for TagListParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateTag => write!(f, "duplicate tag in tag list"),
            Self::Syntax => write!(f, "ill-formed tag list"),
        }
    }
}

impl Error for TagListParseError {}

impl From<Base64Error> for TagListParseError {
    fn from(_: Base64Error) -> Self {
        Self::Syntax
    }
}

/// A well-formed tag list without duplicate tag names.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TagList<'a>(Vec<TagSpec<'a>>);

impl<'a> TagList<'a> {
    pub fn from_str(val: &'a str) -> Result<Self, TagListParseError> {
        match parse_tag_list(val) {
            Some((rest, tags)) if rest.is_empty() => {
                let mut names_seen = HashSet::new();
                if tags.iter().any(|tag| !names_seen.insert(tag.name)) {
                    return Err(TagListParseError::DuplicateTag);
                }
                Ok(Self(tags))
            }
            _ => Err(TagListParseError::Syntax),
        }
    }

    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.0.iter().find(|t| t.name == name).map(|t| t.value)
    }
}

impl<'a> AsRef<[TagSpec<'a>]> for TagList<'a> {
    fn as_ref(&self) -> &[TagSpec<'a>] {
        &self.0
    }
}

fn parse_tag_list(val: &str) -> Option<(&str, Vec<TagSpec<'_>>)> {
    let (mut s, t) = parse_tag_spec(val)?;

    let mut tags = vec![t];

    while let Some((snext, t)) = s.strip_prefix(';').and_then(parse_tag_spec) {
        s = snext;
        tags.push(t);
    }

    // a final semicolon, optionally followed by FWS, is allowed
    let s = match s.strip_prefix(';') {
        Some(s) => strip_fws(s).unwrap_or(s),
        None => s,
    };

    Some((s, tags))
}

fn parse_tag_spec(val: &str) -> Option<(&str, TagSpec<'_>)> {
    let (s, name) = strip_tag_name_and_equals(val)?;

    let s = strip_fws(s).unwrap_or(s);

    let (s, value) = match parse_tag_value(s) {
        Some((s, value)) => (strip_fws(s).unwrap_or(s), value),
        None => (s, Default::default()),
    };

    Some((s, TagSpec { name, value }))
}

/// Strips a tag name and the following `=`, with surrounding FWS, returning
/// the rest and the tag name.
pub fn strip_tag_name_and_equals(val: &str) -> Option<(&str, &str)> {
    let s = strip_fws(val).unwrap_or(val);

    let (s, name) = parse_tag_name(s)?;

    let s = strip_fws(s).unwrap_or(s);

    let s = s.strip_prefix('=')?;

    Some((s, name))
}

fn parse_tag_name(value: &str) -> Option<(&str, &str)> {
    let s = value
        .strip_prefix(|c: char| c.is_ascii_alphabetic())?
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_');
    Some((s, consumed(value, s)))
}

// erratum 5070 applied: tag values may contain FWS between tval runs
fn parse_tag_value(value: &str) -> Option<(&str, &str)> {
    fn strip_tval(s: &str) -> Option<&str> {
        s.strip_prefix(is_tval_char)
            .map(|s| s.trim_start_matches(is_tval_char))
    }

    let mut s = strip_tval(value)?;

    while let Some(snext) = strip_fws(s).and_then(strip_tval) {
        s = snext;
    }

    Some((s, consumed(value, s)))
}

/// Strips one run of folding whitespace, `[*WSP CRLF] 1*WSP`, from the start
/// of the input. A CRLF not followed by WSP is left in place.
fn strip_fws(input: &str) -> Option<&str> {
    let s = input.trim_start_matches(is_wsp);
    let s = match s.strip_prefix("\r\n") {
        Some(rest) if rest.starts_with(is_wsp) => rest.trim_start_matches(is_wsp),
        _ => s,
    };

    if s.len() < input.len() {
        Some(s)
    } else {
        None
    }
}

fn is_wsp(c: char) -> bool {
    matches!(c, ' ' | '\t')
}

// the prefix of `whole` that was consumed to leave `rest`
fn consumed<'a>(whole: &'a str, rest: &str) -> &'a str {
    debug_assert!(whole.ends_with(rest));
    &whole[..(whole.len() - rest.len())]
}

pub fn is_tval_char(c: char) -> bool {
    // printable ASCII w/o ; or non-ASCII UTF-8
    matches!(c, '!'..=':' | '<'..='~') || !c.is_ascii()
}

/// Splits a colon-separated tag value such as the h= value, trimming FWS.
pub fn parse_colon_separated_tag_value(value: &str) -> Vec<&str> {
    value
        .split(':')
        .map(|s| s.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n')))
        .collect()
}

/// Decodes a Base64 tag value, which may contain embedded FWS.
pub fn parse_base64_tag_value(value: &str) -> Result<Vec<u8>, TagListParseError> {
    let value = strip_fws_from_tag_value(value);
    Ok(decode_base64(&value)?)
}

/// Decodes one `|`-separated element of a `z=` tag value into the name and
/// the value of the copied header field.
pub fn parse_copied_header_field(
    value: &str,
) -> Result<(FieldName, Box<[u8]>), TagListParseError> {
    let decoded = quoted_printable::decode(value).map_err(|_| TagListParseError::Syntax)?;

    let i = decoded
        .iter()
        .position(|&b| b == b':')
        .ok_or(TagListParseError::Syntax)?;

    let name = std::str::from_utf8(&decoded[..i]).map_err(|_| TagListParseError::Syntax)?;
    let name = FieldName::new(name).map_err(|_| TagListParseError::Syntax)?;

    Ok((name, decoded[(i + 1)..].into()))
}

pub fn strip_fws_from_tag_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\r' | '\n'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fws_ok() {
        assert_eq!(strip_fws(""), None);
        assert_eq!(strip_fws("x"), None);
        assert_eq!(strip_fws("\t\tx"), Some("x"));
        assert_eq!(strip_fws("\r\n"), None);
        assert_eq!(strip_fws("\r\nx"), None);
        assert_eq!(strip_fws("\r\n\tx"), Some("x"));
        assert_eq!(strip_fws(" \r\nx"), Some("\r\nx"));
        assert_eq!(strip_fws(" \r\n  x"), Some("x"));
        assert_eq!(strip_fws(" \r\n \r\n x"), Some("\r\n x"));
    }

    #[test]
    fn parse_colon_separated_tag_value_ok() {
        assert_eq!(
            parse_colon_separated_tag_value("ab:\r\n\tc\r\n\td:e"),
            ["ab", "c\r\n\td", "e"]
        );
        assert_eq!(parse_colon_separated_tag_value(""), [""]);
    }

    #[test]
    fn tag_list_from_str_ok() {
        let example = " v = 1 ; a=rsa-sha256;d=example.net; s=brisbane;
  c=simple; q=dns/txt; i=中文@eng.example.net;
  t=1117574938; x=1118006938;
  h=from:to:subject:date;
  bh=MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI=;
  b=dzdVyOfAKCdLXdJOc9G2q8LoXSlEniSbav+yuU4zGeeruD00lszZVoG4ZHRNiYzR";
        let example = example.replace('\n', "\r\n");

        let tags = TagList::from_str(&example).unwrap();

        assert_eq!(tags.as_ref().len(), 12);
        assert_eq!(tags.get("v"), Some("1"));
        assert_eq!(tags.get("h"), Some("from:to:subject:date"));
        assert_eq!(tags.get("z"), None);
    }

    #[test]
    fn tag_list_errors() {
        assert_eq!(TagList::from_str("a=1; a=2"), Err(TagListParseError::DuplicateTag));
        assert_eq!(TagList::from_str("a=1; =2"), Err(TagListParseError::Syntax));
        assert_eq!(TagList::from_str("a=1;; b=2"), Err(TagListParseError::Syntax));
        assert_eq!(TagList::from_str(""), Err(TagListParseError::Syntax));

        assert_eq!(TagList::from_str("a=1; b=;").unwrap().get("b"), Some(""));
    }

    #[test]
    fn parse_base64_tag_value_ok() {
        assert_eq!(parse_base64_tag_value("YW\r\n\tJj"), Ok(b"abc".to_vec()));
        assert_eq!(parse_base64_tag_value("YW*j"), Err(TagListParseError::Syntax));
    }

    #[test]
    fn parse_copied_header_field_ok() {
        let (name, value) =
            parse_copied_header_field(" Date:July=205,=0D=0A=092005=20\r\n\t3:44:08=20PM=20-0700 ")
                .unwrap();
        assert_eq!(name, "Date");
        assert_eq!(&*value, b"July 5,\r\n\t2005 3:44:08 PM -0700");

        let (name, value) = parse_copied_header_field("Subject:").unwrap();
        assert_eq!(name, "Subject");
        assert!(value.is_empty());

        assert_eq!(parse_copied_header_field("Subject"), Err(TagListParseError::Syntax));
        assert_eq!(parse_copied_header_field(":x"), Err(TagListParseError::Syntax));
        assert_eq!(parse_copied_header_field("To:a=2"), Err(TagListParseError::Syntax));
    }
}
