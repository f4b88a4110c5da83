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

//! Canonicalization of header fields and message body.

use crate::{
    header::{FieldName, HeaderField, HeaderFields},
    signature::CanonicalizationAlgorithm,
};
use bstr::ByteSlice;
use std::borrow::Cow;

const SP: u8 = b' ';
const CR: u8 = b'\r';
const LF: u8 = b'\n';
const CRLF: [u8; 2] = [CR, LF];

fn is_wsp(b: u8) -> bool {
    matches!(b, b' ' | b'\t')
}

/// Rewrites bare LF line endings to CRLF.
///
/// The fixer remembers whether the previous chunk ended in CR, so that a CRLF
/// split across two chunks is left alone.
#[derive(Clone, Debug, Default)]
pub struct LineEndingFixer {
    prev_cr: bool,
}

impl LineEndingFixer {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn fix<'a>(&mut self, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        let needs_fix = bytes
            .iter()
            .enumerate()
            .any(|(i, &b)| b == LF && !self.preceded_by_cr(bytes, i));

        let result = if needs_fix {
            let mut fixed = Vec::with_capacity(bytes.len() + 8);
            for (i, &b) in bytes.iter().enumerate() {
                if b == LF && !self.preceded_by_cr(bytes, i) {
                    fixed.push(CR);
                }
                fixed.push(b);
            }
            Cow::Owned(fixed)
        } else {
            Cow::Borrowed(bytes)
        };

        if let Some(&last) = bytes.last() {
            self.prev_cr = last == CR;
        }

        result
    }

    fn preceded_by_cr(&self, bytes: &[u8], i: usize) -> bool {
        if i == 0 {
            self.prev_cr
        } else {
            bytes[i - 1] == CR
        }
    }
}

/// Rewrites bare LF line endings in a self-contained piece of data.
pub fn fix_line_endings(bytes: &[u8]) -> Cow<'_, [u8]> {
    LineEndingFixer::new().fix(bytes)
}

// what did we see last?
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum BodyState {
    Start,
    LineEnd,
    Cr,
    Wsp,
    WspCr,
    Content,
}

/// An incremental body canonicalizer.
///
/// Only CRLF is recognised as a line ending, stray CR and LF are treated like
/// other bytes. Empty lines are not emitted until content follows them; any
/// empty lines still held back when the body ends are dropped.
#[derive(Clone, Debug)]
pub struct BodyCanonicalizer {
    algorithm: CanonicalizationAlgorithm,
    state: BodyState,
    line_blank: bool,
    held_lines: usize,
}

impl BodyCanonicalizer {
    pub fn new(algorithm: CanonicalizationAlgorithm) -> Self {
        Self {
            algorithm,
            state: BodyState::Start,
            line_blank: true,
            held_lines: 0,
        }
    }

    pub fn simple() -> Self {
        Self::new(CanonicalizationAlgorithm::Simple)
    }

    pub fn relaxed() -> Self {
        Self::new(CanonicalizationAlgorithm::Relaxed)
    }

    /// Canonicalizes a chunk of body data, appending output to `result`.
    pub fn canonicalize_chunk(&mut self, bytes: &[u8], result: &mut Vec<u8>) {
        match self.algorithm {
            CanonicalizationAlgorithm::Simple => {
                for &b in bytes {
                    self.step_simple(b, result);
                }
            }
            CanonicalizationAlgorithm::Relaxed => {
                for &b in bytes {
                    self.step_relaxed(b, result);
                }
            }
        }
    }

    fn step_simple(&mut self, b: u8, result: &mut Vec<u8>) {
        match self.state {
            BodyState::Start | BodyState::LineEnd | BodyState::Content if b == CR => {
                self.state = BodyState::Cr;
            }
            BodyState::Start | BodyState::LineEnd => {
                self.release_held_lines(result);
                result.push(b);
                self.state = BodyState::Content;
            }
            BodyState::Content => result.push(b),
            BodyState::Cr => {
                if b == LF {
                    self.end_line(result);
                } else {
                    self.release_held_lines(result);
                    result.push(CR);
                    if b != CR {
                        result.push(b);
                        self.state = BodyState::Content;
                    }
                }
            }
            BodyState::Wsp | BodyState::WspCr => {
                debug_assert!(false, "whitespace state in simple canonicalization");
            }
        }
    }

    fn step_relaxed(&mut self, b: u8, result: &mut Vec<u8>) {
        match self.state {
            BodyState::Start | BodyState::LineEnd | BodyState::Content => {
                if is_wsp(b) {
                    self.state = BodyState::Wsp;
                } else if b == CR {
                    self.state = BodyState::Cr;
                } else {
                    if self.state != BodyState::Content {
                        self.release_held_lines(result);
                    }
                    result.push(b);
                    self.state = BodyState::Content;
                }
            }
            BodyState::Wsp => {
                if b == CR {
                    self.state = BodyState::WspCr;
                } else if !is_wsp(b) {
                    self.release_held_lines(result);
                    result.push(SP);
                    result.push(b);
                    self.state = BodyState::Content;
                }
            }
            BodyState::Cr => {
                if b == LF {
                    self.end_line(result);
                } else {
                    self.release_held_lines(result);
                    result.push(CR);
                    if is_wsp(b) {
                        self.state = BodyState::Wsp;
                    } else if b != CR {
                        result.push(b);
                        self.state = BodyState::Content;
                    }
                }
            }
            BodyState::WspCr => {
                if b == LF {
                    // trailing whitespace on the line is dropped
                    self.end_line(result);
                } else {
                    self.release_held_lines(result);
                    result.push(SP);
                    result.push(CR);
                    if b == CR {
                        self.state = BodyState::Cr;
                    } else if is_wsp(b) {
                        self.state = BodyState::Wsp;
                    } else {
                        result.push(b);
                        self.state = BodyState::Content;
                    }
                }
            }
        }
    }

    fn end_line(&mut self, result: &mut Vec<u8>) {
        if self.line_blank {
            self.held_lines += 1;
        } else {
            result.extend(CRLF);
            self.line_blank = true;
        }
        self.state = BodyState::LineEnd;
    }

    // content follows: the held back empty lines were not trailing after all
    fn release_held_lines(&mut self, result: &mut Vec<u8>) {
        for _ in 0..self.held_lines {
            result.extend(CRLF);
        }
        self.held_lines = 0;
        self.line_blank = false;
    }

    /// Completes canonicalization, appending any final output to `result`.
    pub fn finish(mut self, result: &mut Vec<u8>) {
        match (self.algorithm, self.state) {
            // a zero-length body is a single CRLF in simple canonicalization
            (CanonicalizationAlgorithm::Simple, BodyState::Start) => result.extend(CRLF),
            (_, BodyState::Start | BodyState::LineEnd) => {}
            (_, BodyState::Cr) => {
                self.release_held_lines(result);
                result.push(CR);
                result.extend(CRLF);
            }
            (_, BodyState::WspCr) => {
                self.release_held_lines(result);
                result.push(SP);
                result.push(CR);
                result.extend(CRLF);
            }
            // a final blank line without line ending is an empty trailing line
            (_, BodyState::Wsp) if self.line_blank => {}
            // final whitespace without line ending is dropped
            (_, BodyState::Wsp | BodyState::Content) => result.extend(CRLF),
        }
    }
}

/// Canonicalizes a complete body in one go.
pub fn canonicalize_body(algorithm: CanonicalizationAlgorithm, body: &[u8]) -> Vec<u8> {
    let mut result = vec![];
    let mut canon = BodyCanonicalizer::new(algorithm);
    canon.canonicalize_chunk(body, &mut result);
    canon.finish(&mut result);
    result
}

/// Produces the canonicalized header block for the selected header names.
///
/// Each occurrence of a name in `selected` consumes the next not yet used
/// field of that name, counting from the bottom of the header. Names without
/// a remaining occurrence contribute nothing.
pub fn canonicalize_headers(
    algorithm: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected: &[FieldName],
) -> Vec<u8> {
    let fields = headers.as_ref();
    let mut used = vec![false; fields.len()];
    let mut result = vec![];

    for name in selected {
        let next = fields
            .iter()
            .enumerate()
            .rev()
            .find(|(i, f)| !used[*i] && f.name == *name);

        if let Some((i, field)) = next {
            canonicalize_field(&mut result, algorithm, field);
            result.extend(CRLF);
            used[i] = true;
        }
    }

    result
}

/// Canonicalizes a received header field, without the final CRLF.
pub fn canonicalize_field(
    result: &mut Vec<u8>,
    algorithm: CanonicalizationAlgorithm,
    field: &HeaderField,
) {
    canonicalize_padded_header(
        result,
        algorithm,
        &field.name,
        &field.name_padding,
        &field.body,
    );
}

/// Canonicalizes a header field given as name, whitespace between name and
/// colon, and value, without the final CRLF.
pub fn canonicalize_padded_header(
    result: &mut Vec<u8>,
    algorithm: CanonicalizationAlgorithm,
    name: impl AsRef<str>,
    name_padding: &str,
    value: impl AsRef<[u8]>,
) {
    match algorithm {
        CanonicalizationAlgorithm::Simple => {
            result.extend(name.as_ref().bytes());
            result.extend(name_padding.bytes());
            result.push(b':');
            result.extend(value.as_ref());
        }
        CanonicalizationAlgorithm::Relaxed => {
            canonicalize_header(result, algorithm, name, value);
        }
    }
}

/// Canonicalizes a header field given as name and value, without the final
/// CRLF.
pub fn canonicalize_header(
    result: &mut Vec<u8>,
    algorithm: CanonicalizationAlgorithm,
    name: impl AsRef<str>,
    value: impl AsRef<[u8]>,
) {
    let name = name.as_ref();
    let value = value.as_ref();

    match algorithm {
        CanonicalizationAlgorithm::Simple => {
            result.extend(name.bytes());
            result.push(b':');
            result.extend(value);
        }
        CanonicalizationAlgorithm::Relaxed => {
            result.extend(name.to_ascii_lowercase().bytes());
            result.push(b':');
            canonicalize_value_relaxed(result, value);
        }
    }
}

// unfolds, collapses whitespace runs, trims
fn canonicalize_value_relaxed(result: &mut Vec<u8>, value: &[u8]) {
    fn is_space(c: char) -> bool {
        matches!(c, ' ' | '\t' | '\r' | '\n')
    }

    let mut in_space = false;
    for &b in value.trim_with(is_space) {
        if is_space(b.into()) {
            if !in_space {
                result.push(SP);
                in_space = true;
            }
        } else {
            result.push(b);
            in_space = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BStr;

    fn canonicalize_chunks(mut canon: BodyCanonicalizer, chunks: &[&[u8]]) -> Vec<u8> {
        let mut result = vec![];
        for c in chunks {
            canon.canonicalize_chunk(c, &mut result);
        }
        canon.finish(&mut result);
        result
    }

    #[test]
    fn relaxed_header_example() {
        let field = HeaderField::parse(b"Subject:  Hello   World  \r\n").unwrap();
        let headers = HeaderFields::new(vec![field]).unwrap();

        let result = canonicalize_headers(
            CanonicalizationAlgorithm::Relaxed,
            &headers,
            &[FieldName::new("subject").unwrap()],
        );

        assert_eq!(BStr::new(&result), BStr::new("subject:Hello World\r\n"));
    }

    #[test]
    fn header_name_padding() {
        let field = HeaderField::parse(b"Subject \t:\r\n\tfolded  text").unwrap();

        let mut simple = vec![];
        canonicalize_field(&mut simple, CanonicalizationAlgorithm::Simple, &field);
        assert_eq!(BStr::new(&simple), BStr::new("Subject \t:\r\n\tfolded  text"));

        let mut relaxed = vec![];
        canonicalize_field(&mut relaxed, CanonicalizationAlgorithm::Relaxed, &field);
        assert_eq!(BStr::new(&relaxed), BStr::new("subject:folded text"));
    }

    #[test]
    fn headers_selected_bottom_up() {
        let headers = HeaderFields::from_vec(vec![
            ("from".to_owned(), b" Good \t ".to_vec()),
            ("to".to_owned(), b" see   me".to_vec()),
            ("Date".to_owned(), b" Fri 24\r\n\tfoo".to_vec()),
            ("To".to_owned(), b" another one".to_vec()),
        ])
        .unwrap();

        let selected = [
            FieldName::new("to").unwrap(),
            FieldName::new("from").unwrap(),
            FieldName::new("to").unwrap(),
            FieldName::new("to").unwrap(),
            FieldName::new("date").unwrap(),
        ];

        assert_eq!(
            BStr::new(&canonicalize_headers(
                CanonicalizationAlgorithm::Relaxed,
                &headers,
                &selected,
            )),
            BStr::new("to:another one\r\nfrom:Good\r\nto:see me\r\ndate:Fri 24 foo\r\n"),
        );
    }

    #[test]
    fn simple_body_examples() {
        assert_eq!(
            canonicalize_body(CanonicalizationAlgorithm::Simple, b"abc\r\n\r\n\r\n"),
            b"abc\r\n"
        );
        assert_eq!(
            canonicalize_body(CanonicalizationAlgorithm::Simple, b"\r\n\r\n\r\n"),
            b""
        );
        assert_eq!(canonicalize_body(CanonicalizationAlgorithm::Simple, b""), b"\r\n");
        assert_eq!(
            canonicalize_body(CanonicalizationAlgorithm::Simple, b"no line ending"),
            b"no line ending\r\n"
        );
    }

    #[test]
    fn relaxed_body_examples() {
        assert_eq!(
            canonicalize_body(CanonicalizationAlgorithm::Relaxed, b"a  b \r\nc\t\r\n\r\n"),
            b"a b\r\nc\r\n"
        );
        assert_eq!(
            canonicalize_body(CanonicalizationAlgorithm::Relaxed, b" \r\n\t\r\n"),
            b""
        );
        assert_eq!(canonicalize_body(CanonicalizationAlgorithm::Relaxed, b""), b"");
    }

    #[test]
    fn relaxed_body_unterminated_blank_line() {
        let canon = |body: &[u8]| canonicalize_body(CanonicalizationAlgorithm::Relaxed, body);

        assert_eq!(BStr::new(&canon(b"   ")), BStr::new(""));
        assert_eq!(BStr::new(&canon(b"a\r\n  ")), BStr::new("a\r\n"));
        assert_eq!(BStr::new(&canon(b"a\r\n\r\n \t")), BStr::new("a\r\n"));
        assert_eq!(BStr::new(&canon(b"a\r\n\r\n b")), BStr::new("a\r\n\r\n b\r\n"));
        assert_eq!(BStr::new(&canon(b"a  ")), BStr::new("a\r\n"));

        let body = canonicalize_chunks(BodyCanonicalizer::relaxed(), &[b"a\r\n", b"\r\n ", b"\t"]);
        assert_eq!(BStr::new(&body), BStr::new("a\r\n"));
    }

    #[test]
    fn simple_body_chunked() {
        let body = canonicalize_chunks(
            BodyCanonicalizer::simple(),
            &[b"well  hello \r\n", b"\r\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(BStr::new(&body), BStr::new("well  hello \r\n\r\n what agi \r\n"));
    }

    #[test]
    fn relaxed_body_small_chunks() {
        let body = canonicalize_chunks(
            BodyCanonicalizer::relaxed(),
            &[b"well ", b" hello ", b"\r", b"\n\r", b"\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(BStr::new(&body), BStr::new("well hello\r\n\r\n what agi\r\n"));
    }

    #[test]
    fn relaxed_body_held_lines_released() {
        let body = canonicalize_chunks(
            BodyCanonicalizer::relaxed(),
            &[b"\r\n\r\n", b"\ra \r", b"\nb  ", b"c"],
        );

        assert_eq!(BStr::new(&body), BStr::new("\r\n\r\n\ra\r\nb c\r\n"));
    }

    #[test]
    fn line_endings_fixed_across_chunks() {
        let mut fixer = LineEndingFixer::new();

        assert_eq!(fixer.fix(b"a\nb\r"), &b"a\r\nb\r"[..]);
        assert!(matches!(fixer.fix(b"\nc"), Cow::Borrowed(_)));
        assert_eq!(fixer.fix(b"\n\n"), &b"\r\n\r\n"[..]);

        assert_eq!(fix_line_endings(b"To: x\n"), &b"To: x\r\n"[..]);
    }
}
