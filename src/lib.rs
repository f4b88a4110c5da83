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

//! A streaming engine for signing and verifying email messages with
//! *DomainKeys Identified Mail* (DKIM) signatures, as described in
//! [RFC 6376].
//!
//! A signer computes a digest over a canonicalised form of selected header
//! fields and the message body, and embeds an RSA signature in a new
//! *DKIM-Signature* header. A verifier recomputes the same digest from a
//! received message and checks it against the public key published for the
//! signing domain and selector.
//!
//! # Usage
//!
//! An [`Engine`] holds the configuration and creates [`Session`]s, one per
//! message. A session is fed header lines, the end of the header, body chunks,
//! and finally the end of the message:
//!
//! ```no_run
//! # async fn f(
//! #     key_pem: &str,
//! #     resolver: impl dkim_engine::KeyResolver + 'static,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! use dkim_engine::*;
//!
//! let engine = Engine::new(Config::default());
//!
//! let request = SignRequest::new(
//!     DomainName::new("example.com")?,
//!     Selector::new("selector")?,
//!     SignatureAlgorithm::RsaSha256,
//!     SigningKey::from_pem(key_pem)?,
//! );
//!
//! let mut session = engine.sign(request)?;
//! session.header("From: me@example.com\r\n")?;
//! session.header("Subject: Re: Thursday 8pm\r\n")?;
//! session.eoh()?;
//! session.body("Ready for tonight? ;)\r\n")?;
//! session.eom().await?;
//!
//! let text = session.signature_header_text().unwrap();
//! println!("DKIM-Signature: {text}");
//!
//! let mut session = engine.verify(resolver);
//! session.header(format!("DKIM-Signature: {text}\r\n"))?;
//! session.header("From: me@example.com\r\n")?;
//! session.header("Subject: Re: Thursday 8pm\r\n")?;
//! session.eoh()?;
//! session.body("Ready for tonight? ;)\r\n")?;
//! session.eom().await?;
//!
//! assert!(session.verification_outcome().unwrap().is_passed());
//! # Ok(())
//! # }
//! ```
//!
//! Public keys are obtained through a [`KeyResolver`]. The adapter
//! [`TxtKeyResolver`] turns any DNS TXT lookup implementing
//! [`LookupTxt`][crate::verifier::LookupTxt] into a resolver.
//!
//! The low-level building blocks (canonicalisation, hashing, the signature
//! and key record formats) are available in the public modules.
//!
//! [RFC 6376]: https://www.rfc-editor.org/rfc/rfc6376

pub mod canonicalize;
pub mod crypto;
pub mod engine;
pub mod header;
pub mod message_hash;
pub mod quoted_printable;
pub mod record;
pub mod session;
pub mod signature;
pub mod signer;
mod tag_list;
mod util;
pub mod verifier;

pub use crate::{
    crypto::SigningKey,
    engine::{Config, Engine},
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    session::{EomStatus, Error, Operation, Session, State, SyntaxError},
    signature::{
        Canonicalization, CanonicalizationAlgorithm, DkimSignature, DomainName, Selector,
        SignatureAlgorithm,
    },
    signer::{BodyLength, HeaderSelection, SignRequest, Timestamp},
    util::{decode_base64, encode_base64, Base64Error, CanonicalStr},
    verifier::{
        BodyHashStatus, KeyResolveError, KeyResolver, PublicKey, SigFlags, TxtKeyResolver,
        VerificationOutcome,
    },
};
