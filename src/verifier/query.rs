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

//! Public key retrieval.

use crate::{
    crypto::HashAlgorithm,
    record::{DkimKeyRecord, DkimKeyRecordParseError},
    signature::{DomainName, Selector},
    verifier::LookupTxt,
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    future::Future,
    io::{self, ErrorKind},
    pin::Pin,
    str::FromStr,
    sync::Arc,
};
use tracing::trace;

/// A public key as obtained from a [`KeyResolver`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublicKey {
    /// The DER-encoded RSA public key, as in the *p=* tag of a key record.
    pub key_data: Box<[u8]>,
    /// Whether the key is a test key (*t=y*).
    pub testing: bool,
    /// Whether the key disallows signing on behalf of subdomains (*t=s*).
    pub no_subdomains: bool,
    /// The acceptable hash algorithms, or `None` if all are acceptable.
    pub hash_algorithms: Option<Box<[HashAlgorithm]>>,
}

impl PublicKey {
    pub fn new(key_data: impl Into<Box<[u8]>>) -> Self {
        Self {
            key_data: key_data.into(),
            testing: false,
            no_subdomains: false,
            hash_algorithms: None,
        }
    }

    /// Whether the key may be used with the given hash algorithm.
    pub fn allows_hash_algorithm(&self, hash_alg: HashAlgorithm) -> bool {
        match &self.hash_algorithms {
            Some(algs) => algs.contains(&hash_alg),
            None => true,
        }
    }
}

impl From<DkimKeyRecord> for PublicKey {
    fn from(record: DkimKeyRecord) -> Self {
        Self {
            testing: record.is_testing(),
            no_subdomains: record.no_subdomains(),
            hash_algorithms: Some(record.hash_algorithms),
            key_data: record.key_data,
        }
    }
}

/// An error that occurs when resolving a public key.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyResolveError {
    /// No key exists for the selector and domain.
    NoKey,
    /// The key could not be retrieved or is unusable.
    KeyFail,
    /// The key has been revoked.
    Revoked,
    /// The key lookup timed out.
    Timeout,
}

impl Display for KeyResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoKey => write!(f, "no key record found"),
            Self::KeyFail => write!(f, "key record lookup failed"),
            Self::Revoked => write!(f, "key revoked"),
            Self::Timeout => write!(f, "key record lookup timed out"),
        }
    }
}

impl Error for KeyResolveError {}

/// The future returned by a [`KeyResolver`].
pub type KeyQuery<'a> = Pin<Box<dyn Future<Output = Result<PublicKey, KeyResolveError>> + Send + 'a>>;

/// A source of public keys, keyed by selector and signing domain.
pub trait KeyResolver: Send + Sync {
    fn resolve<'a>(&'a self, selector: &'a Selector, domain: &'a DomainName) -> KeyQuery<'a>;
}

impl<T: KeyResolver + ?Sized> KeyResolver for Arc<T> {
    fn resolve<'a>(&'a self, selector: &'a Selector, domain: &'a DomainName) -> KeyQuery<'a> {
        (**self).resolve(selector, domain)
    }
}

/// A key resolver that retrieves DKIM public key records using a
/// [`LookupTxt`] implementation.
pub struct TxtKeyResolver<T> {
    lookup: T,
}

impl<T> TxtKeyResolver<T> {
    pub fn new(lookup: T) -> Self {
        Self { lookup }
    }

    pub fn into_inner(self) -> T {
        self.lookup
    }
}

impl<T: LookupTxt> KeyResolver for TxtKeyResolver<T> {
    fn resolve<'a>(&'a self, selector: &'a Selector, domain: &'a DomainName) -> KeyQuery<'a> {
        Box::pin(async move {
            let domain = domain.to_ascii();
            let selector = selector.to_ascii();

            let txts = match look_up_records(&self.lookup, &domain, &selector).await {
                Ok(txts) => txts,
                Err(e) => {
                    return Err(match e.kind() {
                        ErrorKind::NotFound => {
                            trace!(%domain, %selector, "no key record");
                            KeyResolveError::NoKey
                        }
                        ErrorKind::TimedOut => {
                            trace!(%domain, %selector, "key record lookup timed out");
                            KeyResolveError::Timeout
                        }
                        _ => {
                            trace!(%domain, %selector, "could not look up key record: {e}");
                            KeyResolveError::KeyFail
                        }
                    });
                }
            };

            select_public_key(txts)
        })
    }
}

async fn look_up_records<T: LookupTxt + ?Sized>(
    resolver: &T,
    domain: &str,
    selector: &str,
) -> io::Result<Vec<io::Result<String>>> {
    fn parse_utf8(txt: io::Result<Vec<u8>>) -> io::Result<String> {
        txt.and_then(|s| String::from_utf8(s).map_err(|_| ErrorKind::InvalidData.into()))
    }

    // Note the trailing dot: only absolute queries.
    let dname = format!("{selector}._domainkey.{domain}.");

    let txts = resolver.lookup_txt(&dname).await?;

    // §3.6.2.2: ‘TXT RRs MUST be unique for a particular selector name; […] if
    // there are multiple records in an RRset, the results are undefined.’
    // However, note §6.1.2: ‘If the query for the public key returns multiple
    // key records, the Verifier can choose one of the key records or may cycle
    // through the key records […].’ So, as a courtesy we do try at most three
    // records.

    let mut result = vec![];

    let mut last = None;
    for (i, txt) in txts.into_iter().enumerate() {
        if i < 2 {
            result.push(parse_utf8(txt));
        } else {
            last = Some(txt);
        }
    }
    if let Some(txt) = last {
        result.push(parse_utf8(txt));
    }

    Ok(result)
}

// Returns the first usable key; otherwise the error for the last record seen.
fn select_public_key(txts: Vec<io::Result<String>>) -> Result<PublicKey, KeyResolveError> {
    let mut error = KeyResolveError::NoKey;

    for (i, txt) in txts.into_iter().enumerate() {
        trace!("evaluating DKIM key record {}", i + 1);

        let txt = match txt {
            Ok(txt) => txt,
            Err(e) => {
                trace!("syntax error in DNS record: {e}");
                error = KeyResolveError::KeyFail;
                continue;
            }
        };

        match DkimKeyRecord::from_str(&txt) {
            Ok(record) if record.allows_email() => {
                return Ok(record.into());
            }
            Ok(_) => {
                trace!("disallowed service type");
                error = KeyResolveError::KeyFail;
            }
            Err(DkimKeyRecordParseError::RevokedKey) => {
                trace!("key revoked");
                error = KeyResolveError::Revoked;
            }
            Err(e) => {
                trace!("unusable key record: {e}");
                error = KeyResolveError::KeyFail;
            }
        }
    }

    Err(error)
}
