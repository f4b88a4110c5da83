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

//! DKIM-Quoted-Printable, the encoding of the `z=` tag (RFC 6376, section 2.11).

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// An error that occurs when decoding DKIM-Quoted-Printable data.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct QuotedPrintableError;

impl Display for QuotedPrintableError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid DKIM-Quoted-Printable data")
    }
}

impl Error for QuotedPrintableError {}

/// Encodes bytes as DKIM-Quoted-Printable.
///
/// Bytes outside *dkim-safe-char* become `=XX`. When `encode_bar` is set, the
/// vertical bar is encoded as well, as the `z=` tag requires.
pub fn encode(bytes: &[u8], encode_bar: bool) -> String {
    let mut result = String::with_capacity(bytes.len());
    for &b in bytes {
        if is_dkim_safe(b) && !(encode_bar && b == b'|') {
            result.push(char::from(b));
        } else {
            result.push('=');
            result.push(char::from(HEX_DIGITS[usize::from(b >> 4)]));
            result.push(char::from(HEX_DIGITS[usize::from(b & 0xf)]));
        }
    }
    result
}

/// Decodes DKIM-Quoted-Printable data.
///
/// Folding whitespace anywhere in the input is ignored. Literal UTF-8
/// characters are accepted and passed through.
pub fn decode(s: &str) -> Result<Vec<u8>, QuotedPrintableError> {
    let mut result = Vec::with_capacity(s.len());

    let mut bytes = s
        .bytes()
        .filter(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'));

    while let Some(b) = bytes.next() {
        if b == b'=' {
            let hi = bytes.next().and_then(hex_value).ok_or(QuotedPrintableError)?;
            let lo = bytes.next().and_then(hex_value).ok_or(QuotedPrintableError)?;
            result.push(hi << 4 | lo);
        } else if is_dkim_safe(b) || !b.is_ascii() {
            result.push(b);
        } else {
            return Err(QuotedPrintableError);
        }
    }

    Ok(result)
}

// dkim-safe-char = %x21-3A / %x3C / %x3E-7E
fn is_dkim_safe(b: u8) -> bool {
    matches!(b, 0x21..=0x3a | 0x3c | 0x3e..=0x7e)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_ok() {
        assert_eq!(encode(b"abc", false), "abc");
        assert_eq!(encode(b"abc|; d", false), "abc|=3B=20d");
        assert_eq!(encode(b"abc|; d", true), "abc=7C=3B=20d");
        assert_eq!(encode(b"a=b\r\n\tc", true), "a=3Db=0D=0A=09c");
        assert_eq!(encode("ä".as_bytes(), true), "=C3=A4");
    }

    #[test]
    fn decode_ok() {
        assert_eq!(decode("abc=7C=3B=20d"), Ok(b"abc|; d".to_vec()));
        assert_eq!(decode("July=205,=0D=0A=092005"), Ok(b"July 5,\r\n\t2005".to_vec()));
        assert_eq!(decode("de mo=\r\n\t20run"), Ok(b"demo run".to_vec()));
        assert_eq!(decode("=c3=a4x"), Ok("äx".as_bytes().to_vec()));
        assert_eq!(decode("ä"), Ok("ä".as_bytes().to_vec()));
        assert_eq!(decode(""), Ok(vec![]));
    }

    #[test]
    fn decode_invalid() {
        assert_eq!(decode("a;b"), Err(QuotedPrintableError));
        assert_eq!(decode("ab="), Err(QuotedPrintableError));
        assert_eq!(decode("ab=4"), Err(QuotedPrintableError));
        assert_eq!(decode("ab=4G"), Err(QuotedPrintableError));
    }
}
