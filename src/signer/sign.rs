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
    crypto::{self, SigningKey},
    header::{FieldName, HeaderFields},
    message_hash::{self, BodyHash},
    signature::DKIM_SIGNATURE_NAME,
    signer::{
        format::{self, UnsignedDkimSignature},
        request, BodyLength, HeaderSelection, SignRequest, SignerError, SigningResult, Timestamp,
    },
};
use std::collections::HashSet;
use tracing::trace;

pub fn perform_signing(
    request: SignRequest,
    headers: &HeaderFields,
    body_hash: BodyHash,
    now: u64,
    line_width: usize,
) -> Result<SigningResult, SignerError> {
    if !headers.as_ref().iter().any(|field| field.name == "From") {
        return Err(SignerError::MissingFromHeader);
    }

    let algorithm = request.algorithm;

    // l= records the number of canonical body bytes actually hashed

    let body_length = match request.body_length {
        BodyLength::All => None,
        BodyLength::MessageContent | BodyLength::Exact(_) => {
            let n = body_hash.length.try_into().map_err(|_| SignerError::Overflow)?;
            Some(n)
        }
    };

    // select headers

    let mut signed_headers: Vec<FieldName> = match &request.header_selection {
        HeaderSelection::Auto => select_signed_headers(headers).into_iter().cloned().collect(),
        HeaderSelection::Manual(h) => h.clone(),
    };

    if signed_headers.is_empty() {
        return Err(SignerError::NoSignedHeaders);
    }

    signed_headers.extend(request.oversigned_headers.iter().cloned());

    // calculate timestamp and expiration

    let timestamp = match request.timestamp {
        Timestamp::Now => now,
        Timestamp::Exact(t) => t,
    };

    let expiration = request
        .valid_duration
        .map(|duration| timestamp.saturating_add(duration.as_secs()));

    // copy signed header fields into z=

    let copied_headers = if request.copy_headers {
        Some(copy_signed_headers(headers, &signed_headers).into())
    } else {
        None
    };

    // prepare complete formatted signature header with body hash except with contents of b= tag

    let sig = UnsignedDkimSignature {
        algorithm,
        body_hash: body_hash.digest,
        canonicalization: request.canonicalization,
        domain: request.domain,
        signed_headers: signed_headers.into(),
        body_length,
        selector: request.selector,
        timestamp,
        expiration,
        copied_headers,
    };

    produce_signature(sig, &request.signing_key, headers, line_width)
}

fn select_signed_headers(headers: &HeaderFields) -> Vec<&FieldName> {
    let def: HashSet<_> = request::default_signed_headers().into_iter().collect();
    request::select_headers(headers, move |name| def.contains(name)).collect()
}

fn copy_signed_headers(
    headers: &HeaderFields,
    signed_headers: &[FieldName],
) -> Vec<(FieldName, Box<[u8]>)> {
    headers
        .as_ref()
        .iter()
        .filter(|field| signed_headers.contains(&field.name))
        .map(|field| (field.name.clone(), field.body.as_ref().into()))
        .collect()
}

fn produce_signature(
    sig: UnsignedDkimSignature,
    signing_key: &SigningKey,
    headers: &HeaderFields,
    line_width: usize,
) -> Result<SigningResult, SignerError> {
    let header_name = DKIM_SIGNATURE_NAME;

    let b_len = estimate_b_tag_length(signing_key);

    let (mut formatted_header_value, insertion_index) =
        sig.format_without_signature(header_name, line_width, b_len);

    let hash_alg = sig.algorithm.hash_algorithm();

    let data_hash = message_hash::compute_data_hash(
        hash_alg,
        sig.canonicalization.header,
        headers,
        &sig.signed_headers,
        header_name,
        "",
        &formatted_header_value,
    );

    let signature_data = match crypto::sign_rsa(hash_alg, signing_key.as_rsa(), &data_hash) {
        Ok(s) => {
            trace!("RSA signing successful");
            s.into_boxed_slice()
        }
        Err(e) => {
            trace!("RSA signing failed: {e}");
            return Err(SignerError::SigningFailure);
        }
    };

    // insert signature into formatted dkim-sig header

    format::insert_signature_data(
        &mut formatted_header_value,
        insertion_index,
        header_name,
        &signature_data,
        line_width,
    );

    let signature = sig.into_signature(signature_data);

    Ok(SigningResult {
        signature,
        header_name: header_name.into(),
        header_value: formatted_header_value,
    })
}

fn estimate_b_tag_length(signing_key: &SigningKey) -> usize {
    let n = signing_key.signature_length();
    // n is the signature length in bytes, now compute the length of the
    // base64-encoded value:
    (n + 2) / 3 * 4
}
