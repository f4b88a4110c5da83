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

//! Engine configuration and session factory.

use crate::{
    header::FieldName,
    session::{Error, Session},
    signer::{SignRequest, Signer, LINE_WIDTH},
    verifier::KeyResolver,
};
use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};
use tracing::debug;

/// Configuration shared by all sessions of an [`Engine`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The maximum duration of public key lookups. When this duration is
    /// exceeded verification fails with a resource error.
    pub lookup_timeout: Duration,

    /// When this flag is set, tags in a *DKIM-Signature* header that are not
    /// defined in RFC 6376 make the signature invalid. Otherwise they are
    /// ignored.
    pub strict_tags: bool,

    /// When this flag is set, bare LF line endings in header and body input are
    /// treated as CRLF.
    pub fix_crlf: bool,

    /// Minimum acceptable key size in bits. When the key size of an RSA public
    /// key is below this limit, the verification result is advisory only.
    pub min_key_bits: usize,

    /// If given required headers are not signed in a DKIM signature, the
    /// verification result is advisory only.
    pub required_signed_headers: Vec<FieldName>,

    /// When this flag is set, the result for an expired DKIM signature (x=) is
    /// advisory only.
    pub fail_if_expired: bool,

    /// When this flag is set, the result for a DKIM signature with a timestamp
    /// in the future (t=) is advisory only.
    pub fail_if_in_future: bool,

    /// Tolerance applied to time values when checking signature expiration or
    /// timestamp validity, to allow for clock drift. Resolution is in seconds.
    pub time_tolerance: Duration,

    /// The `SystemTime` value to use as the instant ‘now’.
    pub fixed_system_time: Option<SystemTime>,

    /// The maximum line width used when formatting a *DKIM-Signature* header.
    pub line_width: usize,
}

impl Config {
    /// Returns the current time as a Unix timestamp.
    pub fn current_timestamp(&self) -> u64 {
        self.fixed_system_time
            .unwrap_or_else(SystemTime::now)
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(10),
            strict_tags: false,
            fix_crlf: true,
            min_key_bits: 1024,
            required_signed_headers: FieldName::new("From").into_iter().collect(),
            fail_if_expired: true,
            fail_if_in_future: true,
            time_tolerance: Duration::from_secs(30),
            fixed_system_time: None,
            line_width: LINE_WIDTH,
        }
    }
}

/// A DKIM engine, the factory for signing and verifying sessions.
///
/// The engine holds read-only configuration, which is shared by the sessions
/// it creates. Cloning an engine is cheap.
#[derive(Clone, Debug, Default)]
pub struct Engine {
    config: Arc<Config>,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Creates a signing session for the given request.
    ///
    /// Fails with [`Error::Invalid`] if the request cannot be honoured.
    pub fn sign(&self, request: SignRequest) -> Result<Session, Error> {
        let signer = Signer::prepare_signing(request, self.config.fix_crlf).map_err(|e| {
            debug!("invalid signing request: {e}");
            Error::Invalid(e)
        })?;

        Ok(Session::for_signing(self.config.clone(), signer))
    }

    /// Creates a verifying session that obtains public keys from `resolver`.
    pub fn verify(&self, resolver: impl KeyResolver + 'static) -> Session {
        Session::for_verifying(self.config.clone(), Arc::new(resolver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default() {
        let config = Config::default();

        assert_eq!(config.lookup_timeout, Duration::from_secs(10));
        assert!(config.fix_crlf);
        assert!(!config.strict_tags);
        assert_eq!(config.line_width, 78);
        assert_eq!(config.required_signed_headers, [FieldName::new("from").unwrap()]);
    }

    #[test]
    fn config_fixed_time() {
        let config = Config {
            fixed_system_time: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1687435411)),
            ..Default::default()
        };

        assert_eq!(config.current_timestamp(), 1687435411);
        assert_eq!(Engine::new(config).config().current_timestamp(), 1687435411);
    }
}
