//! Trusted signing keys.
//!
//! # Responsibilities
//! - Hold the current key set behind an atomic pointer
//! - Discover the issuer's JWKS endpoint and fetch keys
//! - Refresh keys periodically in the background
//! - Refetch on demand when a token names an unknown `kid`
//!
//! # Design Decisions
//! - Validation reads a snapshot and never performs I/O
//! - A failed refresh keeps the previous keys
//! - Keys that cannot be decoded are skipped, not fatal
//! - On-demand refetches are serialized and spaced by a minimum interval so
//!   a flood of forged `kid`s cannot hammer the issuer

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{broadcast, Mutex};
use url::Url;

/// Error type for key discovery and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum KeyFetchError {
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("discovery document names issuer '{found}', expected '{expected}'")]
    IssuerMismatch { expected: String, found: String },
    #[error("JWKS at {0} contains no usable keys")]
    NoUsableKeys(String),
}

/// An immutable set of verification keys.
#[derive(Clone, Default)]
pub struct KeySet {
    by_kid: HashMap<String, DecodingKey>,
    default: Option<DecodingKey>,
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print key material
        f.debug_struct("KeySet")
            .field("kids", &self.by_kid.keys().collect::<Vec<_>>())
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

impl KeySet {
    /// A key set with a single shared HMAC secret used for every token.
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            by_kid: HashMap::new(),
            default: Some(DecodingKey::from_secret(secret)),
        }
    }

    /// Build from a JWKS document. Keys without a `kid` become the default.
    pub fn from_jwks(jwks: &JwkSet) -> Self {
        let mut set = Self::default();
        for jwk in &jwks.keys {
            let key = match DecodingKey::from_jwk(jwk) {
                Ok(k) => k,
                Err(e) => {
                    tracing::warn!(kid = ?jwk.common.key_id, error = %e, "Skipping unusable JWK");
                    continue;
                }
            };
            match &jwk.common.key_id {
                Some(kid) => {
                    set.by_kid.insert(kid.clone(), key);
                }
                None if set.default.is_none() => set.default = Some(key),
                None => tracing::warn!("Ignoring additional JWK without 'kid'"),
            }
        }
        set
    }

    /// Pick the key for a token header's `kid`.
    pub fn select(&self, kid: Option<&str>) -> Option<&DecodingKey> {
        match kid {
            Some(kid) => self.by_kid.get(kid).or(self.default.as_ref()),
            None if self.by_kid.len() == 1 && self.default.is_none() => self.by_kid.values().next(),
            None => self.default.as_ref(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_kid.len() + usize::from(self.default.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared, atomically replaceable key set.
#[derive(Debug, Default)]
pub struct KeyStore {
    current: ArcSwap<KeySet>,
}

impl KeyStore {
    pub fn new(initial: KeySet) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn snapshot(&self) -> Arc<KeySet> {
        self.current.load_full()
    }

    pub fn replace(&self, keys: KeySet) {
        self.current.store(Arc::new(keys));
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    jwks_uri: String,
}

/// Fetches the issuer's published keys.
#[derive(Debug, Clone)]
pub struct JwksClient {
    http: reqwest::Client,
    issuer: String,
    jwks_uri: Option<String>,
}

impl JwksClient {
    pub fn new(
        issuer: &str,
        jwks_uri: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, KeyFetchError> {
        Url::parse(issuer)?;
        if let Some(uri) = jwks_uri {
            Url::parse(uri)?;
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            issuer: issuer.to_string(),
            jwks_uri: jwks_uri.map(str::to_string),
        })
    }

    /// `<issuer>/.well-known/openid-configuration`
    pub fn discovery_url(&self) -> Result<Url, KeyFetchError> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            self.issuer.trim_end_matches('/')
        );
        Ok(Url::parse(&url)?)
    }

    async fn resolve_jwks_uri(&self) -> Result<String, KeyFetchError> {
        if let Some(uri) = &self.jwks_uri {
            return Ok(uri.clone());
        }

        let doc: DiscoveryDocument = self
            .http
            .get(self.discovery_url()?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if doc.issuer.trim_end_matches('/') != self.issuer.trim_end_matches('/') {
            return Err(KeyFetchError::IssuerMismatch {
                expected: self.issuer.clone(),
                found: doc.issuer,
            });
        }
        Ok(doc.jwks_uri)
    }

    /// Discover (if needed) and download the current key set.
    pub async fn fetch(&self) -> Result<KeySet, KeyFetchError> {
        let uri = self.resolve_jwks_uri().await?;
        let jwks: JwkSet = self
            .http
            .get(&uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let keys = KeySet::from_jwks(&jwks);
        if keys.is_empty() {
            return Err(KeyFetchError::NoUsableKeys(uri));
        }
        Ok(keys)
    }
}

/// Refetches keys on a `kid` miss, at most once per `min_interval`.
#[derive(Debug)]
pub struct KeyRefresher {
    client: JwksClient,
    store: Arc<KeyStore>,
    min_interval: Duration,
    last_attempt: Mutex<Option<Instant>>,
}

impl KeyRefresher {
    pub fn new(client: JwksClient, store: Arc<KeyStore>, min_interval: Duration) -> Self {
        Self {
            client,
            store,
            min_interval,
            last_attempt: Mutex::new(None),
        }
    }

    /// Fetch and install the current keys unless an attempt was made within
    /// the minimum interval. Returns true if the store was replaced.
    ///
    /// Concurrent callers wait for an in-flight fetch instead of starting
    /// their own.
    pub async fn refresh_on_miss(&self) -> bool {
        let mut last = self.last_attempt.lock().await;
        let now = Instant::now();
        if last.is_some_and(|at| now.duration_since(at) < self.min_interval) {
            return false;
        }
        *last = Some(now);

        match self.client.fetch().await {
            Ok(keys) => {
                tracing::info!(keys = keys.len(), issuer = %self.client.issuer, "Signing keys refetched for unknown kid");
                self.store.replace(keys);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, issuer = %self.client.issuer, "Signing key refetch failed");
                false
            }
        }
    }
}

/// Refresh `store` from `client` every `interval` until shutdown.
///
/// The first fetch happens immediately.
pub async fn run_key_refresh(
    client: JwksClient,
    store: Arc<KeyStore>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match client.fetch().await {
                    Ok(keys) => {
                        tracing::info!(keys = keys.len(), issuer = %client.issuer, "Signing keys refreshed");
                        store.replace(keys);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, issuer = %client.issuer, "Signing key refresh failed, keeping current keys");
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Key refresh received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwks(json: serde_json::Value) -> JwkSet {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn secret_key_is_default() {
        let set = KeySet::from_secret(b"secret");
        assert_eq!(set.len(), 1);
        assert!(set.select(None).is_some());
        assert!(set.select(Some("any")).is_some());
    }

    #[test]
    fn jwks_keys_indexed_by_kid() {
        // "c2VjcmV0LW9uZQ" / "c2VjcmV0LXR3bw" are base64url("secret-one") / ("secret-two")
        let set = KeySet::from_jwks(&jwks(serde_json::json!({
            "keys": [
                { "kty": "oct", "kid": "k1", "alg": "HS256", "k": "c2VjcmV0LW9uZQ" },
                { "kty": "oct", "kid": "k2", "alg": "HS256", "k": "c2VjcmV0LXR3bw" }
            ]
        })));

        assert_eq!(set.len(), 2);
        assert!(set.select(Some("k1")).is_some());
        assert!(set.select(Some("k2")).is_some());
        assert!(set.select(Some("k3")).is_none());
        assert!(set.select(None).is_none());
    }

    #[test]
    fn single_kid_key_used_without_kid() {
        let set = KeySet::from_jwks(&jwks(serde_json::json!({
            "keys": [ { "kty": "oct", "kid": "only", "alg": "HS256", "k": "c2VjcmV0LW9uZQ" } ]
        })));
        assert!(set.select(None).is_some());
    }

    #[test]
    fn store_swaps_atomically() {
        let store = KeyStore::new(KeySet::default());
        assert!(store.snapshot().is_empty());
        store.replace(KeySet::from_secret(b"s"));
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn discovery_url_appends_well_known() {
        let client = JwksClient::new(
            "http://keycloak:8080/realms/shop/",
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            client.discovery_url().unwrap().as_str(),
            "http://keycloak:8080/realms/shop/.well-known/openid-configuration"
        );
    }
}
