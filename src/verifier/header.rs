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

//! Inspection of the message header for verification.

use crate::{
    engine::Config,
    header::{HeaderField, HeaderFields},
    signature::{DkimSignature, DomainName, DKIM_SIGNATURE_NAME},
    verifier::PolicyError,
};
use bstr::ByteSlice;
use std::str;
use tracing::trace;

/// Returns the first *DKIM-Signature* header field, if any.
pub fn find_dkim_signature(headers: &HeaderFields) -> Option<&HeaderField> {
    headers.find(DKIM_SIGNATURE_NAME).next()
}

/// Extracts the domain of the address in the (bottom-most) *From* header.
///
/// Only the common forms `local@domain` and `Name <local@domain>` are
/// recognised.
pub fn from_domain(headers: &HeaderFields) -> Option<DomainName> {
    let field = headers.find("From").last()?;
    let value = field.body.as_ref();

    let addr = match (value.rfind_byte(b'<'), value.rfind_byte(b'>')) {
        (Some(start), Some(end)) if start < end => &value[(start + 1)..end],
        _ => value,
    };

    let (_, domain) = addr.rsplit_once_str("@")?;
    let domain = str::from_utf8(domain).ok()?;
    let domain = domain.trim_matches(|c: char| c.is_ascii_whitespace());

    DomainName::new(domain).ok()
}

/// Checks the signature against the configured policy before a key has been
/// obtained.
pub fn check_signature_policy(
    sig: &DkimSignature,
    config: &Config,
    current_t: u64,
) -> Result<(), PolicyError> {
    for h in &config.required_signed_headers {
        if !sig.signed_headers.contains(h) {
            trace!("header {h} required but not signed");
            return Err(PolicyError::RequiredHeadersNotSigned);
        }
    }

    let delta = config.time_tolerance.as_secs();

    if config.fail_if_expired {
        if let Some(t) = sig.expiration {
            if current_t >= t.saturating_add(delta) {
                trace!("signature expired");
                return Err(PolicyError::SignatureExpired);
            }
        }
    }

    if config.fail_if_in_future {
        if let Some(t) = sig.timestamp {
            if t.saturating_sub(delta) > current_t {
                trace!("timestamp in future");
                return Err(PolicyError::TimestampInFuture);
            }
        }
    }

    Ok(())
}
