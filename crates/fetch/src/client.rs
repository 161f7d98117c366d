//! Cached Fetch Client - single chokepoint for dashboard API calls
//!
//! Request path:
//! 1. GET with a fresh cache entry → answered from cache, no network
//! 2. Same cache key already in flight → join that call (coalescing)
//! 3. Otherwise → middleware chain → transport, bounded by the timeout
//!
//! A key has at most one network call outstanding. Every caller that asked
//! for it meanwhile observes the same result or the same error. The call runs
//! on its own task, so it completes and releases its key even when every
//! caller has gone away.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{TokenProvider, TokenRefresher};
use crate::cache::{cache_key, CacheKey, ResponseCache};
use crate::config::ClientConfig;
use crate::error::{ApiError, Result};
use crate::events::{ApiFailure, FailureSink};
use crate::middleware::{BearerAuth, Middleware, Next, RefreshOnUnauthorized};
use crate::response::ResponseData;
use crate::transport::{FormPart, HttpRequest, HttpTransport, ReqwestTransport, RequestBody};

type SharedResponse = Shared<BoxFuture<'static, Result<ResponseData>>>;

/// Per-call options
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    /// Merged over the defaults; a header given here replaces the default one
    pub headers: HeaderMap,
    pub body: RequestBody,
    /// Return the body untouched as [`ResponseData::Binary`]; keyed apart from parsed reads
    pub raw: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            raw: false,
        }
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Encode(e.to_string()))?;
        Ok(self.body(RequestBody::Json(value)))
    }
}

struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    stages: Vec<Arc<dyn Middleware>>,
    cache: ResponseCache,
    in_flight: DashMap<CacheKey, SharedResponse>,
    failure_sink: Option<Arc<dyn FailureSink>>,
}

/// HTTP client with auth headers, GET caching and request coalescing.
///
/// Cheap to clone; clones share cache and in-flight state.
#[derive(Clone)]
pub struct CachedFetchClient {
    inner: Arc<ClientInner>,
}

impl CachedFetchClient {
    /// Client with the default `reqwest` transport and no auth
    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Issue a request. See the module docs for the cache → in-flight → network order.
    pub async fn request(&self, endpoint: &str, options: RequestOptions) -> Result<ResponseData> {
        let mut key = cache_key(&options.method, endpoint, &options.body);
        if options.raw {
            key.push_str(":raw");
        }

        if options.method == Method::GET {
            if let Some(data) = self.inner.cache.get(&key) {
                tracing::debug!(%key, "Cache hit");
                return Ok(data);
            }
        }

        let shared = match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                tracing::debug!(%key, "Joining in-flight request");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let task = tokio::spawn(Arc::clone(&self.inner).execute(
                    key,
                    endpoint.to_string(),
                    options,
                ));
                let call = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(ApiError::Network(format!("request task failed: {}", e)))
                    })
                }
                .boxed()
                .shared();
                entry.insert(call.clone());
                call
            }
        };

        shared.await
    }

    pub async fn get(&self, endpoint: &str) -> Result<ResponseData> {
        self.request(endpoint, RequestOptions::new(Method::GET)).await
    }

    pub async fn post<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> Result<ResponseData> {
        self.request(endpoint, RequestOptions::new(Method::POST).json(body)?)
            .await
    }

    pub async fn put<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> Result<ResponseData> {
        self.request(endpoint, RequestOptions::new(Method::PUT).json(body)?)
            .await
    }

    pub async fn patch<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> Result<ResponseData> {
        self.request(endpoint, RequestOptions::new(Method::PATCH).json(body)?)
            .await
    }

    pub async fn delete(&self, endpoint: &str) -> Result<ResponseData> {
        self.request(endpoint, RequestOptions::new(Method::DELETE))
            .await
    }

    /// Multipart POST. The JSON `Content-Type` default is dropped so the
    /// transport can set the multipart boundary.
    pub async fn upload(&self, endpoint: &str, parts: Vec<FormPart>) -> Result<ResponseData> {
        self.request(
            endpoint,
            RequestOptions::new(Method::POST).body(RequestBody::Multipart(parts)),
        )
        .await
    }

    /// GET that accepts any content type and returns the body bytes as received
    pub async fn download(&self, endpoint: &str) -> Result<Vec<u8>> {
        let options = RequestOptions::new(Method::GET)
            .header(ACCEPT, HeaderValue::from_static("*/*"))
            .raw();
        Ok(self.request(endpoint, options).await?.into_bytes())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.get(endpoint).await?.json()
    }

    pub async fn post_json<B, T>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.post(endpoint, body).await?.json()
    }

    /// Drop every cached response, e.g. after a mutation
    pub fn clear_cache(&self) {
        tracing::debug!(entries = self.inner.cache.len(), "Clearing response cache");
        self.inner.cache.clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.inner.cache.len()
    }

    /// Network calls currently outstanding
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }
}

impl ClientInner {
    async fn execute(
        self: Arc<Self>,
        key: CacheKey,
        endpoint: String,
        options: RequestOptions,
    ) -> Result<ResponseData> {
        let request_id = Uuid::now_v7();
        let method = options.method.clone();

        let result = self.perform(request_id, &endpoint, options).await;

        match &result {
            Ok(data) => {
                // Cache before releasing the in-flight slot so no caller sees neither
                if method == Method::GET {
                    self.cache.insert(key.clone(), data.clone());
                }
            }
            Err(error) => {
                tracing::warn!(
                    id = %request_id,
                    %method,
                    %endpoint,
                    status = error.status(),
                    "Request failed: {}",
                    error
                );
                if let Some(sink) = &self.failure_sink {
                    sink.report(&ApiFailure {
                        request_id,
                        method: method.clone(),
                        endpoint: endpoint.clone(),
                        error: error.clone(),
                    });
                }
            }
        }

        self.in_flight.remove(&key);
        result
    }

    async fn perform(
        &self,
        id: Uuid,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ResponseData> {
        let url = self.config.resolve(endpoint)?;
        let raw = options.raw;

        let mut headers = self.default_headers();
        headers.extend(options.headers);
        if matches!(options.body, RequestBody::Multipart(_)) {
            headers.remove(CONTENT_TYPE);
        }

        let request = HttpRequest {
            id,
            method: options.method,
            url,
            headers,
            body: options.body,
        };
        tracing::debug!(%id, method = %request.method, url = %request.url, "Sending request");

        let chain = Next::new(&self.stages, self.transport.as_ref());
        let response = match tokio::time::timeout(self.config.timeout, chain.run(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ApiError::Timeout {
                    after: self.config.timeout,
                })
            }
        };

        if !response.status.is_success() {
            return Err(ApiError::from_status(
                response.status,
                &response.headers,
                &response.body,
            ));
        }

        tracing::debug!(%id, status = response.status.as_u16(), bytes = response.body.len(), "Request complete");
        if raw {
            return Ok(ResponseData::Binary(response.body));
        }
        ResponseData::from_response(&response)
    }

    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(agent) = HeaderValue::from_str(&self.config.user_agent) {
            headers.insert(USER_AGENT, agent);
        }
        headers
    }
}

/// Builder for [`CachedFetchClient`]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    token_refresher: Option<Arc<dyn TokenRefresher>>,
    middleware: Vec<Arc<dyn Middleware>>,
    failure_sink: Option<Arc<dyn FailureSink>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            token_provider: None,
            token_refresher: None,
            middleware: Vec::new(),
            failure_sink: None,
        }
    }

    /// Replace the default `reqwest` transport
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Where bearer tokens come from
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Enables refresh-and-retry on 401
    pub fn token_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.token_refresher = Some(refresher);
        self
    }

    /// Append a custom stage; runs after the auth stages
    pub fn middleware(mut self, stage: Arc<dyn Middleware>) -> Self {
        self.middleware.push(stage);
        self
    }

    /// Receives every failure, e.g. the application's event bus
    pub fn failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.failure_sink = Some(sink);
        self
    }

    pub fn build(self) -> CachedFetchClient {
        let mut stages: Vec<Arc<dyn Middleware>> = Vec::new();
        if let Some(refresher) = self.token_refresher {
            stages.push(Arc::new(RefreshOnUnauthorized::new(refresher)));
        }
        if let Some(provider) = self.token_provider {
            stages.push(Arc::new(BearerAuth::new(provider)));
        }
        stages.extend(self.middleware);

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));

        tracing::debug!(
            base_url = %self.config.base_url,
            stages = stages.len(),
            ttl = ?self.config.cache_ttl,
            "Built fetch client"
        );

        CachedFetchClient {
            inner: Arc::new(ClientInner {
                cache: ResponseCache::new(self.config.cache_ttl),
                config: self.config,
                transport,
                stages,
                in_flight: DashMap::new(),
                failure_sink: self.failure_sink,
            }),
        }
    }
}
