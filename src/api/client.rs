use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use reqwest::{header::HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use snafu::prelude::*;
use tokio::sync::Semaphore;

use super::error::variant::*;
use super::pending::PendingCall;
use super::route;
use super::types::*;
use super::Result;
use crate::{
    config::{Config, RestConfig, TokenType},
    ratelimit::RateLimiter,
};

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

static HEADER_REMAINING: &str = "x-ratelimit-remaining";
static HEADER_RESET: &str = "x-ratelimit-reset";
static HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
static HEADER_GLOBAL: &str = "x-ratelimit-global";
static HEADER_RETRY_AFTER: &str = "retry-after";

fn header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Absolute reset time given as epoch seconds
fn epoch_seconds(value: f64) -> Option<SystemTime> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    UNIX_EPOCH.checked_add(Duration::try_from_secs_f64(value).ok()?)
}

fn error_message(body: &[u8]) -> String {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(err) if !err.message.is_empty() => err.message,
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}

/// HTTP API client, the REST channel of the library.
///
/// Every call waits for the shared [`RateLimiter`] to admit it, and feeds the
/// rate limit headers of the response back into it. Cloning is cheap, clones share
/// connection pool, limiter, worker pool and stop flag.
#[derive(Debug, Clone)]
pub struct Client {
    client: reqwest::Client,
    base_url: Arc<str>,
    limiter: Arc<RateLimiter>,
    running: Arc<AtomicBool>,
    workers: Arc<Semaphore>,
}

impl Client {
    fn build(
        token_type: TokenType,
        token: &str,
        rest: &RestConfig,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let auth_header_value = format!("{} {}", token_type.scheme(), token)
            .parse()
            .map_err(|_| {
                TokenInvalid {
                    token: token.to_string(),
                }
                .build()
            })?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::AUTHORIZATION, auth_header_value);

        let client = reqwest::Client::builder()
            .gzip(true)
            .deflate(true)
            .user_agent(APP_USER_AGENT)
            .default_headers(headers)
            .connect_timeout(rest.connect_timeout)
            .timeout(rest.read_timeout)
            .build()
            .context(ClientCreateFailed)?;

        Ok(Self {
            client,
            base_url: rest.api_base.trim_end_matches('/').into(),
            limiter,
            running: Arc::new(AtomicBool::new(true)),
            workers: Arc::new(Semaphore::new(rest.workers.max(1))),
        })
    }

    /// create a api client from config, sharing given rate limiter
    pub fn new(config: &Config, limiter: Arc<RateLimiter>) -> Result<Self> {
        Self::build(config.token_type, &config.token, &config.rest, limiter)
    }

    /// create a new api client using bot token
    pub fn new_from_bot_token<S: AsRef<str> + ?Sized>(token: &S) -> Result<Self> {
        Self::build(
            TokenType::Bot,
            token.as_ref(),
            &RestConfig::default(),
            Arc::default(),
        )
    }

    /// create a new api client using oauth2 token
    pub fn new_from_oauth2_token<S: AsRef<str> + ?Sized>(token: &S) -> Result<Self> {
        Self::build(
            TokenType::Bearer,
            token.as_ref(),
            &RestConfig::default(),
            Arc::default(),
        )
    }

    /// the shared rate limiter
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Stop the client, later calls send nothing and fail with [`Stopped`](super::Error::Stopped)
    pub fn stop(&self) {
        log::info!("Api client stopped");
        self.running.store(false, Ordering::Release);
    }

    /// Check if the client accepts calls
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    async fn wait_admitted(&self, key: &str) {
        loop {
            let wait = self.limiter.check_limit(key);
            if wait.is_zero() {
                break;
            }

            log::debug!("Bucket {} rate limited, wait {:?}", key, wait);

            tokio::time::sleep(wait).await;
        }
    }

    fn apply_headers(&self, key: &str, headers: &HeaderMap) {
        let remaining = match header::<u32>(headers, HEADER_REMAINING) {
            Some(remaining) => remaining,
            None => return,
        };

        if let Some(reset_after) = header::<f64>(headers, HEADER_RESET_AFTER) {
            self.limiter
                .update_limit_after(key, server_seconds(reset_after), remaining);
        } else if let Some(reset_at) = header::<f64>(headers, HEADER_RESET).and_then(epoch_seconds)
        {
            self.limiter.update_limit(key, reset_at, remaining);
        } else {
            log::trace!("Response of bucket {} has remaining but no reset time", key);
        }
    }

    fn classify(
        &self,
        method: Method,
        url: String,
        key: &str,
        status: StatusCode,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Bytes> {
        if status.is_success() {
            return Ok(body);
        }

        match status {
            StatusCode::NOT_MODIFIED => NotModified {
                method,
                url,
                message: error_message(&body),
            }
            .fail(),
            StatusCode::TOO_MANY_REQUESTS => {
                let limited = serde_json::from_slice::<RateLimitedBody>(&body).ok();

                let global = limited.as_ref().map_or(false, |limited| limited.global)
                    || header::<bool>(headers, HEADER_GLOBAL).unwrap_or(false);

                // body is in milliseconds, the standard header in seconds
                let retry_after = match limited.as_ref().map(RateLimitedBody::retry_after) {
                    Some(retry_after) if !retry_after.is_zero() => retry_after,
                    _ => header::<f64>(headers, HEADER_RETRY_AFTER)
                        .map(server_seconds)
                        .unwrap_or_default(),
                };

                if global {
                    self.limiter.global_limit_exceeded(retry_after);
                } else {
                    self.limiter.update_limit_retry(key, retry_after);
                }

                RateLimited {
                    method,
                    url,
                    global,
                    retry_after,
                }
                .fail()
            }
            _ => HTTPStatusNotOK {
                method,
                url,
                status_code: status,
                message: error_message(&body),
            }
            .fail(),
        }
    }

    async fn call(&self, method: Method, endpoint: &str, body: Option<&Value>) -> Result<Bytes> {
        ensure!(self.is_running(), Stopped);

        let key = route::bucket_key(endpoint);
        self.wait_admitted(&key).await;

        ensure!(self.is_running(), Stopped);

        let url = format!(
            "{}/{}",
            self.base_url,
            endpoint.trim_start_matches('/')
        );

        log::trace!("{} {} (bucket {})", method, url, key);

        let mut req = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            req = req
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        let req = req.build().context(BuildRequestFailed)?;

        let resp = self
            .client
            .execute(req)
            .await
            .with_context(|_| RequestFailed {
                method: method.clone(),
                url: &url,
            })?;

        let status = resp.status();
        let headers = resp.headers().clone();
        self.apply_headers(&key, &headers);

        let body = resp.bytes().await.with_context(|_| RequestFailed {
            method: method.clone(),
            url: &url,
        })?;

        log::trace!("{} {} got status {}", method, url, status);

        self.classify(method, url, &key, status, &headers, body)
    }

    /// Perform a call and parse response body as json, empty body is `null`
    pub async fn execute(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let body = self.call(method, endpoint, body).await?;

        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&body).with_context(|_| ParseBodyFailed { body })
    }

    /// Perform a call and parse response body as `R`
    pub async fn request<R>(&self, method: Method, endpoint: &str, body: Option<&Value>) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let body = self.call(method, endpoint, body).await?;
        serde_json::from_slice(&body).with_context(|_| ParseBodyFailed { body })
    }

    /// Perform a call on a background worker
    ///
    /// Must be called inside a tokio runtime.
    pub fn execute_async<S: Into<String>>(
        &self,
        method: Method,
        endpoint: S,
        body: Option<Value>,
    ) -> PendingCall<Value> {
        let client = self.clone();
        let endpoint = endpoint.into();

        let handle = tokio::spawn(async move {
            let _permit = client.workers.acquire().await.map_err(|_| Stopped.build())?;
            client.execute(method, &endpoint, body.as_ref()).await
        });

        PendingCall { handle }
    }

    /// GET endpoint
    pub async fn get(&self, endpoint: &str) -> Result<Value> {
        self.execute(Method::GET, endpoint, None).await
    }

    /// POST json body to endpoint
    pub async fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        self.execute(Method::POST, endpoint, Some(body)).await
    }

    /// PATCH endpoint with json body
    pub async fn patch(&self, endpoint: &str, body: &Value) -> Result<Value> {
        self.execute(Method::PATCH, endpoint, Some(body)).await
    }

    /// PUT json body to endpoint
    pub async fn put(&self, endpoint: &str, body: &Value) -> Result<Value> {
        self.execute(Method::PUT, endpoint, Some(body)).await
    }

    /// DELETE endpoint
    pub async fn delete(&self, endpoint: &str) -> Result<Value> {
        self.execute(Method::DELETE, endpoint, None).await
    }

    /// GET on a background worker
    pub fn get_async<S: Into<String>>(&self, endpoint: S) -> PendingCall<Value> {
        self.execute_async(Method::GET, endpoint, None)
    }

    /// POST on a background worker
    pub fn post_async<S: Into<String>>(&self, endpoint: S, body: Value) -> PendingCall<Value> {
        self.execute_async(Method::POST, endpoint, Some(body))
    }

    /// PATCH on a background worker
    pub fn patch_async<S: Into<String>>(&self, endpoint: S, body: Value) -> PendingCall<Value> {
        self.execute_async(Method::PATCH, endpoint, Some(body))
    }

    /// PUT on a background worker
    pub fn put_async<S: Into<String>>(&self, endpoint: S, body: Value) -> PendingCall<Value> {
        self.execute_async(Method::PUT, endpoint, Some(body))
    }

    /// DELETE on a background worker
    pub fn delete_async<S: Into<String>>(&self, endpoint: S) -> PendingCall<Value> {
        self.execute_async(Method::DELETE, endpoint, None)
    }

    /// Call /gateway/bot, get gateway url
    pub async fn gateway_url(&self) -> Result<String> {
        let data: GatewayBotData = self.request(Method::GET, "/gateway/bot", None).await?;
        Ok(data.url)
    }
}

#[cfg(test)]
mod test {
    use std::time::SystemTime;

    use super::*;
    use crate::api::Error;

    fn limited_client() -> Client {
        Client::new(
            &Config::new("token").api_base("http://127.0.0.1:1"),
            Arc::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_token_with_newline_is_invalid() {
        let err = Client::new_from_bot_token("bad\ntoken").unwrap_err();
        assert!(matches!(err, Error::TokenInvalid { .. }));
    }

    #[test]
    fn test_error_message_from_json_body() {
        assert_eq!(
            error_message(br#"{"code": 10003, "message": "Unknown Channel"}"#),
            "Unknown Channel"
        );
        assert_eq!(error_message(b"bad gateway"), "bad gateway");
    }

    #[test]
    fn test_headers_update_limiter() {
        let client = limited_client();

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REMAINING, "0".parse().unwrap());
        headers.insert(HEADER_RESET_AFTER, "5".parse().unwrap());
        client.apply_headers("channels/1", &headers);

        let wait = client.limiter.check_limit("channels/1");
        assert!(wait > Duration::from_secs(4) && wait <= Duration::from_secs(5));

        headers.insert(HEADER_REMAINING, "3".parse().unwrap());
        client.apply_headers("channels/1", &headers);
        assert_eq!(client.limiter.check_limit("channels/1"), Duration::ZERO);
    }

    #[test]
    fn test_absolute_reset_header() {
        let client = limited_client();

        let reset = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs_f64()
            + 5.0;

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REMAINING, "0".parse().unwrap());
        headers.insert(HEADER_RESET, format!("{:.3}", reset).parse().unwrap());
        client.apply_headers("guilds/1", &headers);

        let wait = client.limiter.check_limit("guilds/1");
        assert!(wait > Duration::from_secs(4) && wait <= Duration::from_secs(5));
    }

    #[test]
    fn test_garbage_absolute_reset_header_is_ignored() {
        let client = limited_client();

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REMAINING, "0".parse().unwrap());
        headers.insert(HEADER_RESET, "1e300".parse().unwrap());
        client.apply_headers("guilds/2", &headers);

        headers.insert(HEADER_RESET, "NaN".parse().unwrap());
        client.apply_headers("guilds/3", &headers);

        assert_eq!(client.limiter.check_limit("guilds/2"), Duration::ZERO);
        assert_eq!(client.limiter.check_limit("guilds/3"), Duration::ZERO);
    }

    #[test]
    fn test_rate_limit_headers_without_json_body() {
        let client = limited_client();

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_GLOBAL, "true".parse().unwrap());
        headers.insert(HEADER_RETRY_AFTER, "2".parse().unwrap());

        let err = client
            .classify(
                Method::GET,
                "http://127.0.0.1:1/channels/9".to_string(),
                "channels/9",
                StatusCode::TOO_MANY_REQUESTS,
                &headers,
                Bytes::from_static(b"slow down"),
            )
            .unwrap_err();

        assert!(matches!(err, Error::RateLimited { global: true, .. }));

        let wait = client.limiter.check_limit("channels/9");
        assert!(wait > Duration::from_secs(1) && wait <= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_stopped_client_sends_nothing() {
        let client = limited_client();
        client.stop();

        let err = client.get("/users/@me").await.unwrap_err();
        assert!(matches!(err, Error::Stopped));
    }
}
