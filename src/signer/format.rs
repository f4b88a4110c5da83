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

//! Formatting of the *DKIM-Signature* header field.

use crate::{
    header::FieldName,
    quoted_printable,
    signature::{Canonicalization, DkimSignature, DomainName, Selector, SignatureAlgorithm},
    util::{self, CanonicalStr},
};
use std::iter;

// Note: Careful with offsets: formatting works with *characters*, not bytes!

/// The default maximum line width of the formatted header.
pub const LINE_WIDTH: usize = 78;

/// The indentation used for continuation lines.
pub const INDENT: &str = "\t";

/// DKIM signature data that does not yet have a cryptographic signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnsignedDkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub signed_headers: Box<[FieldName]>,
    pub body_length: Option<u64>,
    pub selector: Selector,
    pub timestamp: u64,
    pub expiration: Option<u64>,
    pub copied_headers: Option<Box<[(FieldName, Box<[u8]>)]>>,
}

impl UnsignedDkimSignature {
    /// Returns the formatted header value without the *b=* tag value, and the
    /// index where the *b=* tag value is to be inserted.
    ///
    /// The value starts with a single space, so that it can be appended to
    /// `header_name` and a colon.
    pub fn format_without_signature(
        &self,
        header_name: &str,
        line_width: usize,
        b_tag_len: usize,
    ) -> (String, usize) {
        format_without_signature(self, header_name, line_width, b_tag_len)
    }

    pub fn into_signature(self, signature_data: Box<[u8]>) -> DkimSignature {
        DkimSignature {
            algorithm: self.algorithm,
            signature_data,
            body_hash: self.body_hash,
            canonicalization: self.canonicalization,
            domain: self.domain,
            signed_headers: self.signed_headers,
            body_length: self.body_length,
            selector: self.selector,
            timestamp: Some(self.timestamp),
            expiration: self.expiration,
            copied_headers: self.copied_headers,
        }
    }
}

// Ephemeral context holding current formatting options.
#[derive(Clone, Copy)]
struct Fmt<'a> {
    width: usize,
    indent: &'a str,
    last: bool,
}

fn format_without_signature(
    sig: &UnsignedDkimSignature,
    header_name: &str,
    line_width: usize,
    b_tag_len: usize,
) -> (String, usize) {
    // The starting point of cursor `i` is just past header name + ':'.
    let mut output = String::new();
    let mut i = header_name.chars().count() + 1;

    let out = &mut output;
    let i = &mut i;

    let fmt = Fmt { width: line_width, indent: INDENT, last: false };

    // The tag order is fixed: v, a, c, d, s, t, [x], h, [l], [z], bh, b.
    format_tag(out, i, fmt, "v", "1");
    format_tag(out, i, fmt, "a", sig.algorithm.canonical_str());
    format_tag(out, i, fmt, "c", sig.canonicalization.canonical_str());
    format_tag_d(out, i, fmt, &sig.domain);
    format_tag_s(out, i, fmt, &sig.selector);
    format_tag(out, i, fmt, "t", &sig.timestamp.to_string());
    if let Some(expiration) = sig.expiration {
        format_tag(out, i, fmt, "x", &expiration.to_string());
    }
    format_tag_h(out, i, fmt, &sig.signed_headers);
    if let Some(body_length) = sig.body_length {
        format_tag(out, i, fmt, "l", &body_length.to_string());
    }
    if let Some(copied_headers) = sig.copied_headers.as_deref().filter(|h| !h.is_empty()) {
        format_tag_z(out, i, fmt, copied_headers);
    }
    format_tag_bh(out, i, fmt, &sig.body_hash);

    let insertion_i = format_tag_name_b(out, i, Fmt { last: true, ..fmt }, b_tag_len);

    (output, insertion_i)
}

// Note: Throughout, `out` is the final formatted output. `i` is the ‘cursor’ in
// the current line, based on *characters*, not bytes!

fn format_tag_d(out: &mut String, i: &mut usize, fmt: Fmt<'_>, domain: &DomainName) {
    let xdomain = domain.to_ascii();
    let domain = select_str_form(domain, &xdomain);

    format_tag(out, i, fmt, "d", domain);
}

fn format_tag_s(out: &mut String, i: &mut usize, fmt: Fmt<'_>, selector: &Selector) {
    let xselector = selector.to_ascii();
    let selector = select_str_form(selector, &xselector);

    format_tag(out, i, fmt, "s", selector);
}

// Pick transformed (A-label) string only if it was changed further than
// trivial ASCII-case differences.
fn select_str_form<'a>(orig: &'a impl AsRef<str>, xformed: &'a str) -> &'a str {
    if orig.as_ref().eq_ignore_ascii_case(xformed) {
        orig.as_ref()
    } else {
        xformed
    }
}

fn format_tag(out: &mut String, i: &mut usize, fmt: Fmt<'_>, name: &str, value: &str) {
    debug_assert!(name.is_ascii());

    let Fmt { last, .. } = fmt;

    // name + '=' + val [+ ';']
    let taglen = name.len() + value.chars().count() + if last { 1 } else { 2 };

    advance_i_initial(out, i, taglen, fmt);
    out.push_str(name);
    out.push('=');
    out.push_str(value);

    if !last {
        out.push(';');
    }
}

fn format_tag_h(out: &mut String, i: &mut usize, fmt: Fmt<'_>, value: &[FieldName]) {
    let Fmt { last, .. } = fmt;

    let mut names = value.iter().map(|f| f.as_ref()).peekable();

    let first_name = names.next().unwrap_or_default();

    // "h=" + name [+ ';'/':']
    let taglen = first_name.chars().count() + if names.peek().is_none() && last { 2 } else { 3 };

    advance_i_initial(out, i, taglen, fmt);
    out.push_str("h=");
    out.push_str(first_name);
    // the following ';'/':' is already accounted for in `i`

    while let Some(name) = names.next() {
        out.push(':');

        // name [+ ';'/':']
        let len = name.chars().count() + if names.peek().is_none() && last { 0 } else { 1 };

        advance_i(out, i, len, fmt);
        out.push_str(name);
    }

    if !last {
        out.push(';');
    }
}

fn format_tag_z(out: &mut String, i: &mut usize, fmt: Fmt<'_>, value: &[(FieldName, Box<[u8]>)]) {
    let Fmt { last, .. } = fmt;

    let value = value
        .iter()
        .map(|(name, value)| format!("{name}:{}", quoted_printable::encode(value, true)))
        .collect::<Vec<_>>()
        .join("|");

    // the encoded value is ASCII; a line break never splits an =XX triple
    let mut units = encoded_units(&value);

    let first_unit = units.next().unwrap_or_default();

    // "z=" + first unit
    advance_i_initial(out, i, first_unit.len() + 2, fmt);
    out.push_str("z=");
    out.push_str(first_unit);

    for unit in units {
        advance_i(out, i, unit.len(), fmt);
        out.push_str(unit);
    }

    // as with bh=, the final ; may exceed the width by one
    if !last {
        out.push(';');
        *i += 1;
    }
}

// Splits DKIM-Quoted-Printable text into single characters and =XX triples.
fn encoded_units<'a>(mut s: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    iter::from_fn(move || {
        let c = s.chars().next()?;
        let n = if c == '=' { s.len().min(3) } else { c.len_utf8() };
        let unit;
        (unit, s) = s.split_at(n);
        Some(unit)
    })
}

fn format_tag_bh(out: &mut String, i: &mut usize, fmt: Fmt<'_>, value: &[u8]) {
    let Fmt { last, .. } = fmt;

    let value = util::encode_base64(value);

    // "bh=" + 1 char (we prefer at least one additional char behind =)
    let taglen = 4;

    advance_i_initial(out, i, taglen, fmt);
    *i -= 1;  // backwards again before the ghost character
    out.push_str("bh=");

    format_chunks_into_string(out, i, fmt, &value);

    // if final chunk makes line *width* chars long, the final ; will be
    // appended nevertheless (giving a width of *width + 1*; this is fine)
    if !last {
        out.push(';');
        *i += 1;
    }
}

fn format_tag_name_b(out: &mut String, i: &mut usize, fmt: Fmt<'_>, b_tag_len: usize) -> usize {
    let Fmt { width, indent, last } = fmt;

    // "b=" + 1 char (we prefer at least one additional char behind =)
    let taglen = 3;
    advance_i_initial(out, i, taglen, fmt);
    *i -= 1;  // backwards again before the ghost character
    out.push_str("b=");

    let insertion_i = out.len();

    // Where in the line are we now given the estimated b= tag value length?
    let chunk_len = width.saturating_sub(indent.len()).max(1);
    let remaining_len = width.saturating_sub(*i);
    if b_tag_len <= remaining_len {
        *i += b_tag_len;
    } else {
        let mut final_chunk_len = (b_tag_len - remaining_len) % chunk_len;
        if final_chunk_len == 0 {
            final_chunk_len = chunk_len;
        }
        *i = final_chunk_len + indent.len();
    }

    if !last {
        out.push(';');
        *i += 1;
    }

    insertion_i
}

fn push_line_break(out: &mut String, indent: &str) {
    out.push_str("\r\n");
    out.push_str(indent);
}

/// Advances the cursor `i`, making space for an item of length `len`, inserting
/// line break and indentation if necessary.
fn advance_i(out: &mut String, i: &mut usize, len: usize, fmt: Fmt<'_>) {
    let Fmt { width, indent, .. } = fmt;

    if *i + len <= width {
        *i += len;
    } else {
        push_line_break(out, indent);
        *i = indent.len() + len;
    }
}

fn advance_i_initial(out: &mut String, i: &mut usize, len: usize, fmt: Fmt<'_>) {
    let Fmt { width, indent, .. } = fmt;

    // + 1 for initial SP
    if *i + len + 1 <= width {
        out.push(' ');
        *i += len + 1;
    } else {
        push_line_break(out, indent);
        *i = indent.len() + len;
    }
}

fn format_chunks_into_string(out: &mut String, i: &mut usize, fmt: Fmt<'_>, mut s: &str) {
    let Fmt { width, indent, .. } = fmt;

    let first_chunk_len = width.saturating_sub(*i);
    let first_chunk_len = first_chunk_len.min(s.chars().count());

    if first_chunk_len > 0 {
        let c = match s.char_indices().nth(first_chunk_len) {
            Some((c, _)) => c,
            None => s.len(),
        };
        let first_chunk;
        (first_chunk, s) = s.split_at(c);
        out.push_str(first_chunk);
        *i += first_chunk.chars().count();
    }

    let chunk_width = width.saturating_sub(indent.len()).max(1);  // no empty chunks
    let chunks = iter::from_fn(|| {
        if s.is_empty() {
            None
        } else {
            let chunk;
            match s.char_indices().nth(chunk_width) {
                Some((c, _)) => {
                    (chunk, s) = s.split_at(c);
                    Some(chunk)
                }
                None => {
                    (chunk, s) = s.split_at(s.len());
                    Some(chunk)
                }
            }
        }
    });

    for chunk in chunks {
        push_line_break(out, indent);
        out.push_str(chunk);
        *i = chunk.chars().count() + indent.len();
    }
}

/// Inserts the Base64-encoded signature data at the insertion index obtained
/// from [`UnsignedDkimSignature::format_without_signature`].
pub fn insert_signature_data(
    formatted_header: &mut String,
    insertion_index: usize,
    header_name: &str,
    signature_data: &[u8],
    line_width: usize,
) {
    debug_assert!(insertion_index <= formatted_header.len());

    let fmt = Fmt { width: line_width, indent: INDENT, last: true };

    let s = util::encode_base64(signature_data);

    let formatted_header_pre = &formatted_header[..insertion_index];

    let mut it = formatted_header_pre.rsplit("\r\n");
    let last_line = it.next().unwrap_or_default();
    let mut len = if it.next().is_some() {
        last_line.chars().count()
    } else {
        header_name.chars().count() + last_line.chars().count() + 1
    };

    let mut result = String::with_capacity(s.len());
    format_chunks_into_string(&mut result, &mut len, fmt, &s);

    formatted_header.insert_str(insertion_index, &result);
}
