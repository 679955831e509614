//! Authentication and request signing stages.
//!
//! - [`BearerAuth`]: `Authorization: Bearer` from a [`TokenSource`]
//! - [`BasicAuth`]: `Authorization: Basic`
//! - [`HmacSigner`]: HMAC-SHA256 signature header over method, URL and timestamp
//! - [`OAuth1Signer`]: OAuth 1.0a `Authorization` header signed with HMAC-SHA256
//! - [`IdempotencyKey`]: a unique key on every non-safe request

use crate::middleware::{IdGenerator, Middleware, Next};
use crate::{HttpClientError, Request, Response, Result};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use http::{HeaderName, HeaderValue, Method, header};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Characters OAuth 1.0a leaves unescaped (RFC 3986 unreserved).
const OAUTH_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// `Basic` authorization header value.
pub fn basic_header_value(username: &str, password: Option<&str>) -> String {
    let credentials = format!("{}:{}", username, password.unwrap_or_default());
    format!("Basic {}", STANDARD.encode(credentials))
}

fn header_value(value: impl AsRef<str>) -> Result<HeaderValue> {
    HeaderValue::try_from(value.as_ref()).map_err(|e| HttpClientError::Auth(e.to_string()))
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| HttpClientError::Auth(e.to_string()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Supplies access tokens, e.g. from a refreshing OAuth 2.0 flow.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Get the token to send with the next request.
    async fn token(&self) -> Result<String>;
}

#[async_trait]
impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    async fn token(&self) -> Result<String> {
        (**self).token().await
    }
}

/// A token that never changes.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    access_token: String,
}

impl StaticTokenSource {
    /// Always return `access_token`.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<String> {
        Ok(self.access_token.clone())
    }
}

/// Sets `Authorization: Bearer <token>` from a [`TokenSource`] on every request.
#[derive(Clone)]
pub struct BearerAuth {
    source: Arc<dyn TokenSource>,
}

impl BearerAuth {
    /// Use tokens from `source`.
    pub fn new<S: TokenSource + 'static>(source: S) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    /// Use a fixed token.
    pub fn token(token: impl Into<String>) -> Self {
        Self::new(StaticTokenSource::new(token))
    }
}

#[async_trait]
impl Middleware for BearerAuth {
    async fn handle(&self, mut request: Request, next: Next) -> Result<Response> {
        let token = self.source.token().await?;
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, header_value(format!("Bearer {token}"))?);
        next.run(request).await
    }
}

/// Sets HTTP Basic authentication on every request.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    value: String,
}

impl BasicAuth {
    /// Authenticate as `username`.
    pub fn new(username: impl AsRef<str>, password: Option<&str>) -> Self {
        Self {
            value: basic_header_value(username.as_ref(), password),
        }
    }
}

#[async_trait]
impl Middleware for BasicAuth {
    async fn handle(&self, mut request: Request, next: Next) -> Result<Response> {
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, header_value(&self.value)?);
        next.run(request).await
    }
}

/// Signs requests with HMAC-SHA256.
///
/// The header value is `keyId=<id>,ts=<unix seconds>,sig=<hex>` where the
/// signature covers `METHOD\nURL\nts`.
#[derive(Debug, Clone)]
pub struct HmacSigner {
    key_id: String,
    secret: Vec<u8>,
    header: HeaderName,
}

impl HmacSigner {
    /// Sign into `X-Signature` with `secret`.
    pub fn new(key_id: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            key_id: key_id.into(),
            secret: secret.into(),
            header: HeaderName::from_static("x-signature"),
        }
    }

    /// Write the signature to a different header.
    pub fn with_header(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }

    /// Hex signature of `method`, `url` and `timestamp`.
    pub fn signature(&self, method: &Method, url: &Url, timestamp: u64) -> Result<String> {
        let message = format!("{}\n{}\n{}", method, url, timestamp);
        Ok(hex::encode(hmac_sha256(&self.secret, message.as_bytes())?))
    }

    /// Full header value for a request made at `timestamp`.
    pub fn header_value(&self, method: &Method, url: &Url, timestamp: u64) -> Result<String> {
        let sig = self.signature(method, url, timestamp)?;
        Ok(format!("keyId={},ts={},sig={}", self.key_id, timestamp, sig))
    }
}

#[async_trait]
impl Middleware for HmacSigner {
    async fn handle(&self, mut request: Request, next: Next) -> Result<Response> {
        let value = self.header_value(request.method(), request.url(), unix_timestamp())?;
        request
            .headers_mut()
            .insert(self.header.clone(), header_value(value)?);
        next.run(request).await
    }
}

/// OAuth 1.0a request signing with HMAC-SHA256.
#[derive(Debug, Clone)]
pub struct OAuth1Signer {
    consumer_key: String,
    consumer_secret: String,
    token: Option<String>,
    token_secret: String,
}

impl OAuth1Signer {
    /// Sign as the consumer only.
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            token: None,
            token_secret: String::new(),
        }
    }

    /// Sign on behalf of a user's access token.
    pub fn with_token(mut self, token: impl Into<String>, token_secret: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self.token_secret = token_secret.into();
        self
    }

    /// `Authorization` header value for a request with the given nonce and timestamp.
    pub fn authorization(
        &self,
        method: &Method,
        url: &Url,
        nonce: &str,
        timestamp: u64,
    ) -> Result<String> {
        let timestamp = timestamp.to_string();
        let mut oauth = vec![
            ("oauth_consumer_key", self.consumer_key.as_str()),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", "HMAC-SHA256"),
            ("oauth_timestamp", timestamp.as_str()),
            ("oauth_version", "1.0"),
        ];
        if let Some(token) = &self.token {
            oauth.push(("oauth_token", token.as_str()));
        }

        let mut params: Vec<(String, String)> = oauth
            .iter()
            .map(|(k, v)| (encode(k), encode(v)))
            .chain(url.query_pairs().map(|(k, v)| (encode(&k), encode(&v))))
            .collect();
        params.sort();

        let normalized = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let mut base_url = url.clone();
        base_url.set_query(None);
        base_url.set_fragment(None);

        let base_string = format!(
            "{}&{}&{}",
            method.as_str().to_uppercase(),
            encode(base_url.as_str()),
            encode(&normalized)
        );
        let key = format!(
            "{}&{}",
            encode(&self.consumer_secret),
            encode(&self.token_secret)
        );
        let signature = STANDARD.encode(hmac_sha256(key.as_bytes(), base_string.as_bytes())?);

        oauth.push(("oauth_signature", signature.as_str()));
        let header = oauth
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, encode(v)))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!("OAuth {header}"))
    }
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, OAUTH_ENCODE).to_string()
}

#[async_trait]
impl Middleware for OAuth1Signer {
    async fn handle(&self, mut request: Request, next: Next) -> Result<Response> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let value = self.authorization(request.method(), request.url(), &nonce, unix_timestamp())?;
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, header_value(value)?);
        next.run(request).await
    }
}

/// Adds a unique `Idempotency-Key` to requests that change state.
///
/// GET, HEAD and OPTIONS requests are left alone, as are requests that
/// already carry the header. Installed as a middleware it sits inside the
/// retry stage, so every attempt gets its own key; register
/// [`apply`](Self::apply) as a before-request hook instead to keep one key
/// across retries.
pub struct IdempotencyKey {
    header: HeaderName,
    generate: IdGenerator,
}

impl IdempotencyKey {
    /// Use `Idempotency-Key` with UUID v4 keys.
    pub fn new() -> Self {
        Self {
            header: HeaderName::from_static("idempotency-key"),
            generate: Arc::new(|| uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Use a custom header name.
    pub fn with_header(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }

    /// Use a custom key generator.
    pub fn with_generator<F>(mut self, generate: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.generate = Arc::new(generate);
        self
    }

    /// Add the key to `request` if it needs one.
    pub fn apply(&self, request: &mut Request) -> Result<()> {
        let safe = matches!(
            *request.method(),
            Method::GET | Method::HEAD | Method::OPTIONS
        );
        if safe || request.headers().contains_key(&self.header) {
            return Ok(());
        }

        let value = header_value((self.generate)())?;
        request.headers_mut().insert(self.header.clone(), value);
        Ok(())
    }
}

impl Default for IdempotencyKey {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for IdempotencyKey {
    async fn handle(&self, mut request: Request, next: Next) -> Result<Response> {
        self.apply(&mut request)?;
        next.run(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareChain;
    use crate::mock::MockTransport;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    fn request(method: Method, url: &str) -> Request {
        Request::parse(method, url).unwrap()
    }

    async fn sent_through<M: Middleware + 'static>(middleware: M, req: Request) -> Request {
        let mock = Arc::new(MockTransport::new());
        MiddlewareChain::from_transport(mock.clone())
            .with_middleware(middleware)
            .execute(req)
            .await
            .unwrap();
        mock.requests().remove(0)
    }

    #[test]
    fn test_basic_header_value() {
        assert_eq!(
            basic_header_value("admin", Some("secret")),
            "Basic YWRtaW46c2VjcmV0"
        );
        assert_eq!(basic_header_value("token", None), "Basic dG9rZW46");
    }

    #[tokio::test]
    async fn test_bearer_static_token() {
        let seen = sent_through(
            BearerAuth::token("my-token"),
            request(Method::GET, "http://api.test/me"),
        )
        .await;
        assert_eq!(seen.header("authorization"), Some("Bearer my-token"));
    }

    struct RotatingSource {
        tokens: Vec<&'static str>,
        next: Mutex<usize>,
    }

    #[async_trait]
    impl TokenSource for RotatingSource {
        async fn token(&self) -> Result<String> {
            let mut next = self.next.lock();
            let token = self
                .tokens
                .get(*next)
                .ok_or_else(|| HttpClientError::Auth("no more tokens".into()))?;
            *next += 1;
            Ok(token.to_string())
        }
    }

    #[tokio::test]
    async fn test_bearer_custom_source() {
        let mock = Arc::new(MockTransport::new());
        let chain = MiddlewareChain::from_transport(mock.clone()).with_middleware(BearerAuth::new(
            RotatingSource {
                tokens: vec!["token-v1", "token-v2"],
                next: Mutex::new(0),
            },
        ));

        for _ in 0..2 {
            chain.execute(request(Method::GET, "http://api.test/data")).await.unwrap();
        }
        let tokens: Vec<_> = mock
            .requests()
            .iter()
            .map(|r| r.header("authorization").unwrap().to_string())
            .collect();
        assert_eq!(tokens, vec!["Bearer token-v1", "Bearer token-v2"]);

        let err = chain
            .execute(request(Method::GET, "http://api.test/data"))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpClientError::Auth(_)));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_basic_auth_middleware() {
        let seen = sent_through(
            BasicAuth::new("admin", Some("secret")),
            request(Method::GET, "http://api.test/admin"),
        )
        .await;
        assert_eq!(seen.header("authorization"), Some("Basic YWRtaW46c2VjcmV0"));
    }

    #[tokio::test]
    async fn test_hmac_signature_verifies() {
        let signer = HmacSigner::new("key-2024", b"super-secret-key".to_vec());
        let seen = sent_through(
            signer.clone(),
            request(Method::GET, "http://api.test/api/orders"),
        )
        .await;

        let value = seen.header("x-signature").unwrap();
        let parts: std::collections::HashMap<_, _> = value
            .split(',')
            .filter_map(|part| part.split_once('='))
            .collect();
        assert_eq!(parts["keyId"], "key-2024");

        let ts: u64 = parts["ts"].parse().unwrap();
        let message = format!("GET\nhttp://api.test/api/orders\n{ts}");
        let mut mac = HmacSha256::new_from_slice(b"super-secret-key").unwrap();
        mac.update(message.as_bytes());
        assert_eq!(parts["sig"], hex::encode(mac.finalize().into_bytes()));
    }

    #[test]
    fn test_hmac_custom_header() {
        let signer = HmacSigner::new("k", "s").with_header(HeaderName::from_static("x-auth"));
        let url = Url::parse("http://api.test/").unwrap();
        let value = signer.header_value(&Method::POST, &url, 1_700_000_000).unwrap();
        assert!(value.starts_with("keyId=k,ts=1700000000,sig="));
        assert_eq!(signer.header, "x-auth");
    }

    #[test]
    fn test_oauth1_header_is_deterministic() {
        let signer = OAuth1Signer::new("my-consumer-key", "my-consumer-secret")
            .with_token("my-access-token", "my-token-secret");
        let url = Url::parse("https://api.test/api/resource?b=2&a=1").unwrap();

        let first = signer
            .authorization(&Method::GET, &url, "abc123", 1_700_000_000)
            .unwrap();
        let second = signer
            .authorization(&Method::GET, &url, "abc123", 1_700_000_000)
            .unwrap();
        let other_nonce = signer
            .authorization(&Method::GET, &url, "xyz789", 1_700_000_000)
            .unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other_nonce);
        assert!(first.starts_with("OAuth "));
        assert!(first.contains("oauth_consumer_key=\"my-consumer-key\""));
        assert!(first.contains("oauth_token=\"my-access-token\""));
        assert!(first.contains("oauth_signature_method=\"HMAC-SHA256\""));
        assert!(first.contains("oauth_signature=\""));
    }

    #[tokio::test]
    async fn test_oauth1_middleware_sets_header() {
        let seen = sent_through(
            OAuth1Signer::new("ck", "cs"),
            request(Method::POST, "http://api.test/statuses"),
        )
        .await;
        let auth = seen.header("authorization").unwrap();
        assert!(auth.contains("oauth_signature"));
        assert!(!auth.contains("oauth_token="));
    }

    #[test]
    fn test_oauth_encoding() {
        assert_eq!(encode("a b&c=d~e"), "a%20b%26c%3Dd~e");
    }

    #[tokio::test]
    async fn test_idempotency_key() {
        let mock = Arc::new(MockTransport::new());
        let chain =
            MiddlewareChain::from_transport(mock.clone()).with_middleware(IdempotencyKey::new());

        for _ in 0..3 {
            chain.execute(request(Method::POST, "http://api.test/payments")).await.unwrap();
        }
        chain.execute(request(Method::GET, "http://api.test/payments")).await.unwrap();

        let mut existing = request(Method::PUT, "http://api.test/payments/1");
        existing
            .headers_mut()
            .insert("idempotency-key", HeaderValue::from_static("caller-key"));
        chain.execute(existing).await.unwrap();

        let requests = mock.requests();
        let keys: HashSet<_> = requests[..3]
            .iter()
            .map(|r| r.header("idempotency-key").unwrap().to_string())
            .collect();
        assert_eq!(keys.len(), 3);
        assert!(requests[3].header("idempotency-key").is_none());
        assert_eq!(requests[4].header("idempotency-key"), Some("caller-key"));
    }
}
