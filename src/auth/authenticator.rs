//! Bearer token authentication.
//!
//! `jsonwebtoken::Validation` checks signature, `exp`, `nbf` and `iss`.
//! On top of that the authenticator requires a non-blank subject and turns
//! the claims into a [`Principal`].

use std::str::FromStr;
use std::sync::Arc;

use axum::http::{header, HeaderMap};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};

use crate::auth::claims::{derive_authorities, TokenClaims};
use crate::auth::keys::{KeyRefresher, KeyStore};
use crate::auth::principal::Principal;
use crate::config::AuthConfig;

/// Why a presented token was rejected. Always surfaces as 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("token is expired or not yet valid")]
    Expired,
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token issuer is not trusted")]
    UnknownIssuer,
}

impl AuthFailure {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailure::Expired => "expired",
            AuthFailure::Malformed => "malformed",
            AuthFailure::BadSignature => "bad_signature",
            AuthFailure::UnknownIssuer => "unknown_issuer",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthFailure {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => AuthFailure::Expired,
            ErrorKind::InvalidIssuer => AuthFailure::UnknownIssuer,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey => AuthFailure::BadSignature,
            _ => AuthFailure::Malformed,
        }
    }
}

/// Error building an authenticator from configuration.
#[derive(Debug, thiserror::Error)]
pub enum AuthSetupError {
    #[error("unknown JWS algorithm '{0}'")]
    UnknownAlgorithm(String),
    #[error("at least one JWS algorithm must be accepted")]
    NoAlgorithms,
}

/// Validates bearer tokens against the trusted issuer's keys.
#[derive(Clone)]
pub struct TokenAuthenticator {
    keys: Arc<KeyStore>,
    validation: Validation,
    refresher: Option<Arc<KeyRefresher>>,
}

impl std::fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("issuer", &self.validation.iss)
            .field("algorithms", &self.validation.algorithms)
            .field("refetch_on_unknown_kid", &self.refresher.is_some())
            .finish()
    }
}

impl TokenAuthenticator {
    pub fn new(config: &AuthConfig, keys: Arc<KeyStore>) -> Result<Self, AuthSetupError> {
        let algorithms = parse_algorithms(&config.algorithms)?;

        let mut validation = Validation::new(algorithms[0]);
        validation.algorithms = algorithms;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.leeway = config.leeway_secs;

        Ok(Self {
            keys,
            validation,
            refresher: None,
        })
    }

    /// Refetch keys through `refresher` when a token names an unknown `kid`.
    pub fn with_refresher(mut self, refresher: Arc<KeyRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// [`authenticate`](Self::authenticate), retried once after a key
    /// refetch when the token's `kid` has no key.
    pub async fn authenticate_refreshing(&self, token: &str) -> Result<Principal, AuthFailure> {
        let result = self.authenticate(token);
        let Some(refresher) = &self.refresher else {
            return result;
        };
        match result {
            Err(AuthFailure::BadSignature) if self.is_unknown_key(token) => {
                refresher.refresh_on_miss().await;
                self.authenticate(token)
            }
            other => other,
        }
    }

    fn is_unknown_key(&self, token: &str) -> bool {
        jsonwebtoken::decode_header(token)
            .map(|header| self.keys.snapshot().select(header.kid.as_deref()).is_none())
            .unwrap_or(false)
    }

    /// Validate `token` and build the caller's principal.
    pub fn authenticate(&self, token: &str) -> Result<Principal, AuthFailure> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| AuthFailure::Malformed)?;
        if !self.validation.algorithms.contains(&header.alg) {
            return Err(AuthFailure::BadSignature);
        }

        let keys = self.keys.snapshot();
        let key = keys
            .select(header.kid.as_deref())
            .ok_or(AuthFailure::BadSignature)?;

        let data = jsonwebtoken::decode::<TokenClaims>(token, key, &self.validation)?;
        let claims = data.claims;

        if claims.sub.trim().is_empty() {
            return Err(AuthFailure::Malformed);
        }

        let authorities = derive_authorities(&claims);
        tracing::debug!(
            subject = %claims.sub,
            authorities = authorities.len(),
            "Token authenticated"
        );
        Ok(Principal::new(claims.sub, authorities))
    }
}

fn parse_algorithms(names: &[String]) -> Result<Vec<Algorithm>, AuthSetupError> {
    if names.is_empty() {
        return Err(AuthSetupError::NoAlgorithms);
    }
    names
        .iter()
        .map(|n| Algorithm::from_str(n).map_err(|_| AuthSetupError::UnknownAlgorithm(n.clone())))
        .collect()
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively. Any other scheme, or an empty
/// token, counts as no token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::keys::{JwksClient, KeySet};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const SECRET: &[u8] = b"unit-test-secret-with-enough-bytes";
    const ISSUER: &str = "https://idp.example.com/realms/shop";

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    fn authenticator() -> TokenAuthenticator {
        let config = AuthConfig {
            issuer: ISSUER.to_string(),
            algorithms: vec!["HS256".to_string()],
            leeway_secs: 0,
            ..AuthConfig::default()
        };
        let keys = Arc::new(KeyStore::new(KeySet::from_secret(SECRET)));
        TokenAuthenticator::new(&config, keys).unwrap()
    }

    fn sign(claims: serde_json::Value, secret: &[u8]) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn valid_claims() -> serde_json::Value {
        json!({ "sub": "alice", "iss": ISSUER, "iat": now(), "exp": now() + 300 })
    }

    fn signed_with_kid(kid: &str, secret: &[u8]) -> String {
        let mut header = Header::default();
        header.kid = Some(kid.to_string());
        encode(&header, &valid_claims(), &EncodingKey::from_secret(secret)).unwrap()
    }

    // k = base64url("secret-one") / base64url("secret-two")
    fn oct_key(kid: &str) -> serde_json::Value {
        let k = match kid {
            "k1" => "c2VjcmV0LW9uZQ",
            _ => "c2VjcmV0LXR3bw",
        };
        json!({ "kty": "oct", "kid": kid, "alg": "HS256", "k": k })
    }

    fn hs256_config() -> AuthConfig {
        AuthConfig {
            issuer: ISSUER.to_string(),
            algorithms: vec!["HS256".to_string()],
            ..AuthConfig::default()
        }
    }

    /// Serve `jwks` on every connection, counting connections.
    async fn serve_jwks(jwks: serde_json::Value) -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let body = jwks.to_string();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{}/certs", addr), hits)
    }

    #[test]
    fn valid_token_yields_principal() {
        let mut claims = valid_claims();
        claims["primary_role"] = json!("AdMiN");
        claims["scp"] = json!("read write");

        let principal = authenticator().authenticate(&sign(claims, SECRET)).unwrap();
        assert_eq!(principal.subject, "alice");
        let names: Vec<_> = principal.authorities.iter().map(|a| a.as_str()).collect();
        assert_eq!(names, vec!["ROLE_ADMIN", "SCOPE_read", "SCOPE_write"]);
    }

    #[test]
    fn token_without_role_or_scope_is_authenticated() {
        let principal = authenticator().authenticate(&sign(valid_claims(), SECRET)).unwrap();
        assert!(principal.authorities.is_empty());
    }

    #[test]
    fn expired_token_rejected() {
        let mut claims = valid_claims();
        claims["exp"] = json!(now() - 60);
        assert_eq!(
            authenticator().authenticate(&sign(claims, SECRET)),
            Err(AuthFailure::Expired)
        );
    }

    #[test]
    fn future_nbf_rejected() {
        let mut claims = valid_claims();
        claims["nbf"] = json!(now() + 120);
        assert_eq!(
            authenticator().authenticate(&sign(claims, SECRET)),
            Err(AuthFailure::Expired)
        );
    }

    #[test]
    fn wrong_key_rejected() {
        assert_eq!(
            authenticator().authenticate(&sign(valid_claims(), b"some-other-secret-of-enough-len")),
            Err(AuthFailure::BadSignature)
        );
    }

    #[test]
    fn foreign_issuer_rejected() {
        let mut claims = valid_claims();
        claims["iss"] = json!("https://evil.example.com");
        assert_eq!(
            authenticator().authenticate(&sign(claims, SECRET)),
            Err(AuthFailure::UnknownIssuer)
        );
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(authenticator().authenticate("not-a-jwt"), Err(AuthFailure::Malformed));
    }

    #[test]
    fn missing_subject_is_malformed() {
        let claims = json!({ "iss": ISSUER, "exp": now() + 300 });
        assert_eq!(
            authenticator().authenticate(&sign(claims, SECRET)),
            Err(AuthFailure::Malformed)
        );
    }

    #[test]
    fn disallowed_algorithm_rejected() {
        let token = encode(
            &Header::new(Algorithm::HS512),
            &valid_claims(),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert_eq!(authenticator().authenticate(&token), Err(AuthFailure::BadSignature));
    }

    #[test]
    fn unknown_kid_rejected() {
        let jwks = serde_json::from_value(json!({ "keys": [oct_key("k1")] })).unwrap();
        let store = Arc::new(KeyStore::new(KeySet::from_jwks(&jwks)));
        let auth = TokenAuthenticator::new(&hs256_config(), store).unwrap();

        assert!(auth.authenticate(&signed_with_kid("k1", b"secret-one")).is_ok());
        assert_eq!(
            auth.authenticate(&signed_with_kid("k9", b"secret-one")),
            Err(AuthFailure::BadSignature)
        );
    }

    #[tokio::test]
    async fn rotated_key_is_refetched_once() {
        let (uri, hits) = serve_jwks(json!({ "keys": [oct_key("k1"), oct_key("k2")] })).await;

        let initial = serde_json::from_value(json!({ "keys": [oct_key("k1")] })).unwrap();
        let store = Arc::new(KeyStore::new(KeySet::from_jwks(&initial)));
        let client = JwksClient::new(ISSUER, Some(&uri), Duration::from_secs(2)).unwrap();
        let refresher = KeyRefresher::new(client, store.clone(), Duration::from_secs(60));
        let auth = TokenAuthenticator::new(&hs256_config(), store)
            .unwrap()
            .with_refresher(Arc::new(refresher));

        let rotated = signed_with_kid("k2", b"secret-two");
        assert_eq!(auth.authenticate(&rotated), Err(AuthFailure::BadSignature));
        assert!(auth.authenticate_refreshing(&rotated).await.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Known kids and misses inside the refetch window never hit the issuer.
        assert!(auth
            .authenticate_refreshing(&signed_with_kid("k1", b"secret-one"))
            .await
            .is_ok());
        assert_eq!(
            auth.authenticate_refreshing(&signed_with_kid("k9", b"secret-two")).await,
            Err(AuthFailure::BadSignature)
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bad_signature_with_known_kid_does_not_refetch() {
        let (uri, hits) = serve_jwks(json!({ "keys": [oct_key("k1")] })).await;
        let initial = serde_json::from_value(json!({ "keys": [oct_key("k1")] })).unwrap();
        let store = Arc::new(KeyStore::new(KeySet::from_jwks(&initial)));
        let client = JwksClient::new(ISSUER, Some(&uri), Duration::from_secs(2)).unwrap();
        let auth = TokenAuthenticator::new(&hs256_config(), store.clone())
            .unwrap()
            .with_refresher(Arc::new(KeyRefresher::new(client, store, Duration::ZERO)));

        assert_eq!(
            auth.authenticate_refreshing(&signed_with_kid("k1", b"not-the-secret")).await,
            Err(AuthFailure::BadSignature)
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_algorithm_in_config() {
        let config = AuthConfig {
            algorithms: vec!["XS999".to_string()],
            ..AuthConfig::default()
        };
        let err = TokenAuthenticator::new(&config, Arc::new(KeyStore::default())).unwrap_err();
        assert!(matches!(err, AuthSetupError::UnknownAlgorithm(_)));
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, "bearer xyz".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(header::AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
