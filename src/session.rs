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

//! Signing and verifying sessions.

use crate::{
    canonicalize,
    engine::Config,
    header::{HeaderField, HeaderFieldError, HeaderFields},
    signature::DkimSignatureError,
    signer::{Signer, SignerError},
    verifier::{KeyResolver, VerificationOutcome, Verifier, VerifierError},
};
use std::{
    error,
    fmt::{self, Debug, Display, Formatter},
    mem,
    sync::Arc,
};
use tracing::{debug, trace};

/// The lifecycle state of a [`Session`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum State {
    Created,
    CollectingHeaders,
    BodyPhase,
    Finalized,
    Failed,
    Released,
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::CollectingHeaders => write!(f, "collecting headers"),
            Self::BodyPhase => write!(f, "body phase"),
            Self::Finalized => write!(f, "finalized"),
            Self::Failed => write!(f, "failed"),
            Self::Released => write!(f, "released"),
        }
    }
}

/// A session operation that is only valid in certain states.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    Header,
    Eoh,
    Body,
    Eom,
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header => write!(f, "header"),
            Self::Eoh => write!(f, "eoh"),
            Self::Body => write!(f, "body"),
            Self::Eom => write!(f, "eom"),
        }
    }
}

/// Malformed input.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyntaxError {
    /// A header line is not a well-formed header field.
    Header(HeaderFieldError),
    /// The *DKIM-Signature* header is not a well-formed DKIM signature.
    Signature(DkimSignatureError),
}

impl Display for SyntaxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header(e) => Display::fmt(e, f),
            Self::Signature(e) => Display::fmt(e, f),
        }
    }
}

/// An error that occurs when using a [`Session`].
///
/// A cryptographic mismatch is not an error, see [`VerificationOutcome`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// Malformed header, body, or signature text. The session has failed.
    Syntax(SyntaxError),
    /// The operation is not valid in the current state. The state is
    /// unchanged.
    ProtocolMisuse { operation: Operation, state: State },
    /// The key lookup timed out or was unavailable. The session has failed.
    Resource,
    /// No key exists for the signature.
    NoKey,
    /// The key could not be retrieved or decoded.
    KeyFail,
    /// The key has been revoked.
    Revoked,
    /// The signing primitive failed.
    SigGen,
    /// The signing request is invalid.
    Invalid(SignerError),
    /// The message cannot be signed.
    Internal(SignerError),
    /// The message carries no signature.
    NoSig,
    /// The session lost the signer or verifier for the current state. The
    /// session has failed.
    Inconsistent,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(e) => write!(f, "syntax error: {e}"),
            Self::ProtocolMisuse { operation, state } => {
                write!(f, "operation {operation} not allowed in state {state}")
            }
            Self::Resource => write!(f, "key lookup timed out"),
            Self::NoKey => write!(f, "no key found"),
            Self::KeyFail => write!(f, "key unavailable"),
            Self::Revoked => write!(f, "key revoked"),
            Self::SigGen => write!(f, "signature generation failed"),
            Self::Invalid(e) => write!(f, "invalid request: {e}"),
            Self::Internal(e) => write!(f, "internal error: {e}"),
            Self::NoSig => write!(f, "no signature"),
            Self::Inconsistent => write!(f, "inconsistent session state"),
        }
    }
}

impl error::Error for Error {}

/// The status returned from a successful [`Session::eom`].
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct EomStatus {
    /// Whether a test key was used in verification.
    pub test_key: bool,
}

enum Mode {
    Sign {
        signer: Option<Signer>,
        header_text: Option<String>,
    },
    Verify {
        resolver: Arc<dyn KeyResolver>,
        verifier: Option<Verifier>,
        outcome: Option<VerificationOutcome>,
    },
}

/// A signing or verifying session for a single message.
///
/// Header lines are fed with [`header`][Session::header], the end of the
/// header is marked with [`eoh`][Session::eoh], the body is fed with any
/// number of calls to [`body`][Session::body], and processing is completed
/// with [`eom`][Session::eom]. Sessions are created by an
/// [`Engine`][crate::Engine].
pub struct Session {
    config: Arc<Config>,
    state: State,
    mode: Mode,
    headers: Vec<HeaderField>,
    header_fields: Option<HeaderFields>,
    last_error: Option<String>,
}

impl Session {
    pub(crate) fn for_signing(config: Arc<Config>, signer: Signer) -> Self {
        Self::new(config, Mode::Sign { signer: Some(signer), header_text: None })
    }

    pub(crate) fn for_verifying(config: Arc<Config>, resolver: Arc<dyn KeyResolver>) -> Self {
        Self::new(
            config,
            Mode::Verify {
                resolver,
                verifier: None,
                outcome: None,
            },
        )
    }

    fn new(config: Arc<Config>, mode: Mode) -> Self {
        Self {
            config,
            state: State::Created,
            mode,
            headers: vec![],
            header_fields: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_signing(&self) -> bool {
        matches!(self.mode, Mode::Sign { .. })
    }

    /// Adds a header line, such as `"Subject: hello\r\n"`.
    ///
    /// Folded header fields must be passed as a single line, including the
    /// internal line breaks.
    pub fn header(&mut self, line: impl AsRef<[u8]>) -> Result<(), Error> {
        self.check_state(Operation::Header, &[State::Created, State::CollectingHeaders])?;

        let line = line.as_ref();
        let line = if self.config.fix_crlf {
            canonicalize::fix_line_endings(line)
        } else {
            line.into()
        };

        let field = match HeaderField::parse(&line) {
            Ok(field) => field,
            Err(e) => {
                trace!("malformed header line");
                return Err(self.fail(Error::Syntax(SyntaxError::Header(e))));
            }
        };

        self.headers.push(field);
        self.state = State::CollectingHeaders;

        Ok(())
    }

    /// Marks the end of the header.
    pub fn eoh(&mut self) -> Result<(), Error> {
        self.check_state(Operation::Eoh, &[State::CollectingHeaders])?;

        let headers = match HeaderFields::new(mem::take(&mut self.headers)) {
            Ok(headers) => headers,
            Err(e) => return Err(self.fail(Error::Syntax(SyntaxError::Header(e)))),
        };

        if let Mode::Verify { verifier, .. } = &mut self.mode {
            *verifier = Some(Verifier::prepare(&headers, &self.config));
        }

        self.header_fields = Some(headers);
        self.state = State::BodyPhase;

        Ok(())
    }

    /// Adds a chunk of the message body.
    ///
    /// The chunk is canonicalised and hashed, but not otherwise retained in
    /// memory.
    pub fn body(&mut self, chunk: impl AsRef<[u8]>) -> Result<(), Error> {
        self.check_state(Operation::Body, &[State::BodyPhase])?;

        let chunk = chunk.as_ref();

        let _ = match &mut self.mode {
            Mode::Sign { signer: Some(signer), .. } => signer.hash_body_chunk(chunk),
            Mode::Verify { verifier: Some(verifier), .. } => verifier.process_body_chunk(chunk),
            _ => return Err(self.fail(Error::Inconsistent)),
        };

        Ok(())
    }

    /// Completes processing of the message.
    ///
    /// In signing mode, the signature header becomes available through
    /// [`signature_header_text`][Session::signature_header_text]. In verifying
    /// mode, the public key is resolved and the outcome becomes available
    /// through [`verification_outcome`][Session::verification_outcome]; the
    /// outcome is also recorded when a key or signature error is returned.
    pub async fn eom(&mut self) -> Result<EomStatus, Error> {
        self.check_state(Operation::Eom, &[State::BodyPhase])?;

        let headers = self.header_fields.take();

        match &mut self.mode {
            Mode::Sign { signer, header_text } => {
                let (Some(signer), Some(headers)) = (signer.take(), headers) else {
                    return Err(self.fail(Error::Inconsistent));
                };

                let now = self.config.current_timestamp();

                match signer.finish(&headers, now, self.config.line_width) {
                    Ok(result) => {
                        debug!(domain = %result.signature.domain, "message signed");
                        let text = result.header_value;
                        *header_text = Some(match text.strip_prefix(' ') {
                            Some(s) => s.into(),
                            None => text,
                        });
                        self.state = State::Finalized;
                        Ok(EomStatus::default())
                    }
                    Err(e) => {
                        debug!("signing failed: {e}");
                        let error = match e {
                            SignerError::SigningFailure => Error::SigGen,
                            SignerError::MissingFromHeader | SignerError::NoSignedHeaders => {
                                Error::Internal(e)
                            }
                            _ => Error::Invalid(e),
                        };
                        Err(self.fail(error))
                    }
                }
            }
            Mode::Verify { resolver, verifier, outcome } => {
                let (Some(verifier), Some(headers)) = (verifier.take(), headers) else {
                    return Err(self.fail(Error::Inconsistent));
                };

                let resolver = resolver.clone();
                let config = self.config.clone();

                let result = verifier.finish(&*resolver, &headers, &config).await;

                let error = match &result.error {
                    None => None,
                    Some(VerifierError::SignatureSyntax(e)) => {
                        let error = Error::Syntax(SyntaxError::Signature(e.clone()));
                        return Err(self.fail(error));
                    }
                    Some(VerifierError::KeyLookupTimeout) => {
                        return Err(self.fail(Error::Resource));
                    }
                    Some(VerifierError::NoSignature) => Some(Error::NoSig),
                    Some(VerifierError::NoKey) => Some(Error::NoKey),
                    Some(VerifierError::KeyFail) => Some(Error::KeyFail),
                    Some(VerifierError::KeyRevoked) => Some(Error::Revoked),
                };

                debug!(flags = ?result.flags, "message verified");

                let status = EomStatus {
                    test_key: result.is_test_key(),
                };

                *outcome = Some(result);
                self.state = State::Finalized;

                match error {
                    Some(error) => Err(self.record(error)),
                    None => Ok(status),
                }
            }
        }
    }

    /// Returns the formatted *DKIM-Signature* header value produced by a
    /// signing session.
    ///
    /// The value is to be inserted as `DKIM-Signature: {value}`, that is, with a
    /// single space after the colon.
    pub fn signature_header_text(&self) -> Option<&str> {
        match &self.mode {
            Mode::Sign { header_text, .. } => header_text.as_deref(),
            Mode::Verify { .. } => None,
        }
    }

    /// Returns the outcome of a verifying session.
    pub fn verification_outcome(&self) -> Option<&VerificationOutcome> {
        match &self.mode {
            Mode::Sign { .. } => None,
            Mode::Verify { outcome, .. } => outcome.as_ref(),
        }
    }

    /// Returns a description of the last error that occurred.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Releases the resources held by this session, in particular the private
    /// key of a signing session.
    ///
    /// Results already produced remain available. Calling this method more than
    /// once has no further effect.
    pub fn release(&mut self) {
        if self.state == State::Released {
            return;
        }

        match &mut self.mode {
            Mode::Sign { signer, .. } => {
                // dropping the key zeroizes its secret components
                *signer = None;
            }
            Mode::Verify { verifier, .. } => {
                *verifier = None;
            }
        }

        self.headers = vec![];
        self.header_fields = None;
        self.state = State::Released;
    }

    fn check_state(&mut self, operation: Operation, valid: &[State]) -> Result<(), Error> {
        if valid.contains(&self.state) {
            Ok(())
        } else {
            debug!(%operation, state = %self.state, "operation not allowed");
            Err(self.record(Error::ProtocolMisuse {
                operation,
                state: self.state,
            }))
        }
    }

    fn fail(&mut self, error: Error) -> Error {
        self.state = State::Failed;
        self.record(error)
    }

    fn record(&mut self, error: Error) -> Error {
        self.last_error = Some(error.to_string());
        error
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("signing", &self.is_signing())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
