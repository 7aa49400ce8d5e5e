//! The outbound RPC client.
//!
//! A call resolves its target through the
//! [`ServiceResolver`](crate::resolver::ServiceResolver), assembles headers
//! from the ambient [`ContextStore`] plus per-call overrides, and runs the
//! bounded failover policy: a refused connection invalidates the cached
//! address and retries exactly once against a fresh resolution; an
//! unreachable network fails immediately; everything the peer actually
//! said passes through untouched.

pub mod options;

use std::collections::HashMap;
use std::error::Error as _;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use microcall_core::context::{header, ContextStore};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::RpcError;
use crate::models::ApiResult;
use crate::resolver::ServiceResolver;

pub use options::{CallOptions, FileUpload, Protocol};

// Characters escaped when a path-parameter value lands in a path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%')
    .add(b'&')
    .add(b'+');

/// Discovery-backed HTTP client.
///
/// Cheap to clone; clones share the resolver, context, and connection
/// pool.
#[derive(Clone)]
pub struct RpcClient {
    resolver: Arc<ServiceResolver>,
    context: ContextStore,
    config: ClientConfig,
    http: reqwest::Client,
}

enum FailureClass {
    /// Refused connection: likely a stale cached address, worth one retry
    /// after re-resolving.
    RetryOnce,
    /// Unreachable network or host: a fresh address would fail the same
    /// way.
    Unavailable,
    /// Anything else (timeout, TLS, protocol).
    PassThrough,
}

impl RpcClient {
    /// Creates a client over the given resolver and ambient context.
    ///
    /// # Errors
    ///
    /// [`RpcError::Configuration`] when the underlying HTTP client cannot
    /// be built.
    pub fn new(
        resolver: Arc<ServiceResolver>,
        context: ContextStore,
        config: ClientConfig,
    ) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| RpcError::Configuration(format!("cannot build http client: {e}")))?;
        Ok(Self {
            resolver,
            context,
            config,
            http,
        })
    }

    /// Calls `path` on `service` and returns the raw response body.
    ///
    /// Header precedence, low to high: the calling unit's context
    /// attributes, explicit headers from `opts`, then the protocol's fixed
    /// content type. `X-Request-Id` is generated when neither source
    /// supplies one and `X-Lang` defaults to the unit's current language.
    /// The per-call timeout comes from an `X-Timeout` header (whole
    /// seconds) or the configured default.
    ///
    /// # Errors
    ///
    /// See [`RpcError`] for the failure classes and the retry policy.
    pub async fn call(
        &self,
        service: &str,
        path: &str,
        opts: &CallOptions,
    ) -> Result<String, RpcError> {
        let protocol = if !opts.files.is_empty() {
            Protocol::Multipart
        } else if let Some(protocol) = opts.protocol {
            protocol
        } else {
            Protocol::from_str(&self.config.call_protocol)?
        };
        let headers = self.assemble_headers(opts);
        let timeout = effective_timeout(&headers, self.config.default_timeout_secs);
        let path = render_path(path, &opts.path_params);
        let group = opts.group.as_deref().unwrap_or("");

        let (base, _) = self
            .resolver
            .resolve(service, group)
            .await
            .map_err(|source| RpcError::Resolution {
                service: service.to_string(),
                source,
            })?;

        let err = match self
            .attempt(&base, &path, protocol, &headers, timeout, opts)
            .await
        {
            Ok(response) => return finish(service, response).await,
            Err(err) => err,
        };

        match classify_transport(&err) {
            FailureClass::Unavailable => {
                warn!(service = %service, error = %err, "network unreachable");
                Err(RpcError::Unavailable {
                    service: service.to_string(),
                })
            }
            FailureClass::PassThrough => Err(RpcError::Transport {
                service: service.to_string(),
                source: err,
            }),
            FailureClass::RetryOnce => {
                warn!(service = %service, url = %base, "connection refused, re-resolving");
                self.resolver.invalidate(service);
                let (base, _) = self
                    .resolver
                    .resolve(service, group)
                    .await
                    .map_err(|source| RpcError::Resolution {
                        service: service.to_string(),
                        source,
                    })?;
                match self
                    .attempt(&base, &path, protocol, &headers, timeout, opts)
                    .await
                {
                    Ok(response) => finish(service, response).await,
                    Err(retry_err) => {
                        warn!(service = %service, error = %retry_err, "retry failed");
                        Err(RpcError::RetryExhausted {
                            service: service.to_string(),
                        })
                    }
                }
            }
        }
    }

    /// Like [`call`](Self::call), additionally parsing the body as the
    /// standard [`ApiResult`] envelope.
    ///
    /// # Errors
    ///
    /// Everything [`call`](Self::call) returns, plus
    /// [`RpcError::Malformed`] when a 2xx body does not parse.
    pub async fn call_typed<T: DeserializeOwned>(
        &self,
        service: &str,
        path: &str,
        opts: &CallOptions,
    ) -> Result<ApiResult<T>, RpcError> {
        let body = self.call(service, path, opts).await?;
        serde_json::from_str(&body).map_err(|source| RpcError::Malformed {
            service: service.to_string(),
            source,
        })
    }

    fn assemble_headers(&self, opts: &CallOptions) -> HashMap<String, String> {
        let mut headers = self.context.headers();
        for (name, value) in &opts.headers {
            headers.insert(name.clone(), value.clone());
        }
        if headers
            .get(header::REQUEST_ID)
            .map_or(true, String::is_empty)
        {
            headers.insert(
                header::REQUEST_ID.to_string(),
                Uuid::new_v4().simple().to_string(),
            );
        }
        if headers.get(header::LANG).map_or(true, String::is_empty) {
            headers.insert(header::LANG.to_string(), self.context.current_language());
        }
        headers
    }

    async fn attempt(
        &self,
        base: &str,
        path: &str,
        protocol: Protocol,
        headers: &HashMap<String, String>,
        timeout: Duration,
        opts: &CallOptions,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let method = opts.method.clone().unwrap_or(Method::GET);
        let url = format!("{base}{path}");
        debug!(method = %method, url = %url, "outbound call");

        let mut request = self
            .http
            .request(method, &url)
            .timeout(timeout)
            .headers(build_header_map(headers, protocol));
        if !opts.query.is_empty() {
            request = request.query(&opts.query);
        }
        request = match protocol {
            Protocol::Form => {
                if opts.form.is_empty() {
                    request
                } else {
                    request.form(&opts.form)
                }
            }
            Protocol::Json | Protocol::Restful => match &opts.json {
                Some(body) => request.json(body),
                None => request.json(&opts.form),
            },
            Protocol::Multipart => {
                let mut form = reqwest::multipart::Form::new();
                for (name, value) in &opts.form {
                    form = form.text(name.clone(), value.clone());
                }
                for file in &opts.files {
                    form = form.part(
                        file.field.clone(),
                        reqwest::multipart::Part::bytes(file.bytes.clone())
                            .file_name(file.file_name.clone()),
                    );
                }
                request.multipart(form)
            }
        };
        request.send().await
    }
}

async fn finish(service: &str, response: reqwest::Response) -> Result<String, RpcError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| RpcError::Transport {
            service: service.to_string(),
            source,
        })?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(RpcError::Remote {
            service: service.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

fn build_header_map(headers: &HashMap<String, String>, protocol: Protocol) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len() + 1);
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!(header = %name, "dropping unencodable header"),
        }
    }
    match protocol.content_type() {
        // The protocol's content type outranks everything else.
        Some(content_type) => {
            map.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        // Multipart: the transport must set the boundary itself.
        None => {
            map.remove(CONTENT_TYPE);
        }
    }
    map
}

/// Replaces each `{name}` placeholder with the percent-escaped parameter
/// value. Unknown placeholders are left as-is.
fn render_path(path: &str, params: &HashMap<String, String>) -> String {
    let mut rendered = path.to_string();
    for (name, value) in params {
        let escaped = utf8_percent_encode(value, PATH_SEGMENT).to_string();
        rendered = rendered.replace(&format!("{{{name}}}"), &escaped);
    }
    rendered
}

fn effective_timeout(headers: &HashMap<String, String>, default_secs: u64) -> Duration {
    let secs = headers
        .get(header::TIMEOUT)
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}

fn classify_transport(err: &reqwest::Error) -> FailureClass {
    match io_error_kind(err) {
        Some(std::io::ErrorKind::ConnectionRefused) => FailureClass::RetryOnce,
        Some(std::io::ErrorKind::NetworkUnreachable | std::io::ErrorKind::HostUnreachable) => {
            FailureClass::Unavailable
        }
        _ => FailureClass::PassThrough,
    }
}

// reqwest wraps the io::Error a few layers deep; walk the chain.
fn io_error_kind(err: &reqwest::Error) -> Option<std::io::ErrorKind> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = cause.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use axum::extract::Path;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use microcall_core::cache::CacheRegistry;
    use serde_json::{json, Value};

    use crate::config::DEFAULT_GROUP;
    use crate::models::ServiceInstance;
    use crate::registry::MemoryRegistry;

    use super::*;

    async fn serve(app: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    /// A port that refuses connections: bound, then immediately released.
    fn dead_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn harness(
        registry: Arc<MemoryRegistry>,
        config: ClientConfig,
    ) -> (CacheRegistry, Arc<ServiceResolver>, RpcClient) {
        let caches = CacheRegistry::new();
        let resolver = Arc::new(
            ServiceResolver::new(registry, &caches, config.default_group.clone()).unwrap(),
        );
        let context = ContextStore::new(&caches).unwrap();
        let client = RpcClient::new(Arc::clone(&resolver), context, config).unwrap();
        (caches, resolver, client)
    }

    fn seed(registry: &MemoryRegistry, service: &str, port: u16) {
        registry.set_instances(
            service,
            DEFAULT_GROUP,
            vec![ServiceInstance::new(service, "127.0.0.1", port)],
        );
    }

    #[tokio::test]
    async fn successful_call_returns_body() {
        let port = serve(Router::new().route("/ping", get(|| async { "pong" }))).await;
        let registry = Arc::new(MemoryRegistry::new());
        seed(&registry, "orders", port);
        let (_caches, _resolver, client) = harness(registry, ClientConfig::default());

        let body = client
            .call("orders", "/ping", &CallOptions::new())
            .await
            .unwrap();
        assert_eq!(body, "pong");
    }

    #[tokio::test]
    async fn refused_connection_retries_exactly_once() {
        let registry = Arc::new(MemoryRegistry::new());
        seed(&registry, "orders", dead_port());
        let (_caches, _resolver, client) = harness(Arc::clone(&registry), ClientConfig::default());

        let err = client
            .call("orders", "/ping", &CallOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::RetryExhausted { service } if service == "orders"));
        // Initial resolve plus the single forced re-resolve; never a loop.
        assert_eq!(registry.select_count(), 2);
    }

    #[tokio::test]
    async fn failover_reaches_the_replacement_instance() {
        let port = serve(Router::new().route("/ping", get(|| async { "pong" }))).await;
        let registry = Arc::new(MemoryRegistry::new());
        seed(&registry, "orders", dead_port());
        let (_caches, resolver, client) = harness(Arc::clone(&registry), ClientConfig::default());

        // Warm the cache with the soon-to-be-dead address, then move the
        // service in the registry.
        resolver.resolve("orders", "").await.unwrap();
        seed(&registry, "orders", port);

        let body = client
            .call("orders", "/ping", &CallOptions::new())
            .await
            .unwrap();
        assert_eq!(body, "pong");
        assert_eq!(registry.select_count(), 2);

        // The cache now reflects the replacement address.
        let (url, _) = resolver.resolve("orders", "").await.unwrap();
        assert_eq!(url, format!("http://127.0.0.1:{port}"));
        assert_eq!(registry.select_count(), 2);
    }

    #[tokio::test]
    async fn remote_error_passes_through_without_retry() {
        let app = Router::new().route(
            "/fail",
            get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let port = serve(app).await;
        let registry = Arc::new(MemoryRegistry::new());
        seed(&registry, "orders", port);
        let (_caches, _resolver, client) = harness(Arc::clone(&registry), ClientConfig::default());

        let err = client
            .call("orders", "/fail", &CallOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RpcError::Remote { status: 500, ref body, .. } if body == "boom"
        ));
        assert_eq!(registry.select_count(), 1);
    }

    #[tokio::test]
    async fn context_headers_flow_and_explicit_headers_win() {
        let app = Router::new().route(
            "/echo",
            get(|headers: axum::http::HeaderMap| async move {
                Json(json!({
                    "request_id": headers["X-Request-Id"].to_str().unwrap(),
                    "lang": headers["X-Lang"].to_str().unwrap(),
                }))
            }),
        );
        let port = serve(app).await;
        let registry = Arc::new(MemoryRegistry::new());
        seed(&registry, "orders", port);
        let (caches, _resolver, client) = harness(registry, ClientConfig::default());

        let context = ContextStore::new(&caches).unwrap();
        context.put_context(
            [
                ("X-Request-Id".to_string(), "ctx-req".to_string()),
                ("X-Lang".to_string(), "en-us".to_string()),
            ]
            .into_iter()
            .collect(),
        );

        let body = client
            .call(
                "orders",
                "/echo",
                &CallOptions::new().header("X-Request-Id", "explicit-req"),
            )
            .await
            .unwrap();
        let echoed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(echoed["request_id"], "explicit-req");
        assert_eq!(echoed["lang"], "en-us");
    }

    #[tokio::test]
    async fn request_id_generated_without_context() {
        let app = Router::new().route(
            "/echo",
            get(|headers: axum::http::HeaderMap| async move {
                headers["X-Request-Id"].to_str().unwrap().to_string()
            }),
        );
        let port = serve(app).await;
        let registry = Arc::new(MemoryRegistry::new());
        seed(&registry, "orders", port);
        let (_caches, _resolver, client) = harness(registry, ClientConfig::default());

        let body = client
            .call("orders", "/echo", &CallOptions::new())
            .await
            .unwrap();
        assert_eq!(body.len(), 32);
        assert!(body.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn path_params_are_templated_and_escaped() {
        let app = Router::new().route(
            "/api/items/{id}",
            get(|Path(id): Path<String>| async move { id }),
        );
        let port = serve(app).await;
        let registry = Arc::new(MemoryRegistry::new());
        seed(&registry, "orders", port);
        let (_caches, _resolver, client) = harness(registry, ClientConfig::default());

        let body = client
            .call(
                "orders",
                "/api/items/{id}",
                &CallOptions::new().path_param("id", "a b"),
            )
            .await
            .unwrap();
        assert_eq!(body, "a b");
    }

    #[tokio::test]
    async fn json_protocol_sends_json_body() {
        let app = Router::new().route("/submit", post(|Json(body): Json<Value>| async move {
            Json(body)
        }));
        let port = serve(app).await;
        let registry = Arc::new(MemoryRegistry::new());
        seed(&registry, "orders", port);
        let (_caches, _resolver, client) = harness(registry, ClientConfig::default());

        // Per-call protocol override beats the configured x-form default.
        let body = client
            .call(
                "orders",
                "/submit",
                &CallOptions::new()
                    .method(Method::POST)
                    .protocol(Protocol::Json)
                    .json(json!({"amount": 42})),
            )
            .await
            .unwrap();
        let echoed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(echoed["amount"], 42);
    }

    #[tokio::test]
    async fn form_protocol_sends_form_body() {
        let app = Router::new().route(
            "/submit",
            post(
                |axum::extract::Form(fields): axum::extract::Form<HashMap<String, String>>| async move {
                    fields.get("amount").cloned().unwrap_or_default()
                },
            ),
        );
        let port = serve(app).await;
        let registry = Arc::new(MemoryRegistry::new());
        seed(&registry, "orders", port);
        let (_caches, _resolver, client) = harness(registry, ClientConfig::default());

        let body = client
            .call(
                "orders",
                "/submit",
                &CallOptions::new().method(Method::POST).field("amount", "42"),
            )
            .await
            .unwrap();
        assert_eq!(body, "42");
    }

    #[tokio::test]
    async fn unknown_protocol_fails_before_resolving() {
        let registry = Arc::new(MemoryRegistry::new());
        let config = ClientConfig {
            call_protocol: "soap".to_string(),
            ..ClientConfig::default()
        };
        let (_caches, _resolver, client) = harness(Arc::clone(&registry), config);

        let err = client
            .call("orders", "/ping", &CallOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Configuration(_)));
        assert_eq!(registry.select_count(), 0);
    }

    #[tokio::test]
    async fn typed_call_parses_the_envelope() {
        let app = Router::new().route(
            "/typed",
            get(|| async { Json(json!({"status": 1, "msg": "ok", "data": {"id": 9}})) }),
        );
        let port = serve(app).await;
        let registry = Arc::new(MemoryRegistry::new());
        seed(&registry, "orders", port);
        let (_caches, _resolver, client) = harness(registry, ClientConfig::default());

        #[derive(serde::Deserialize)]
        struct Item {
            id: u64,
        }

        let result: ApiResult<Item> = client
            .call_typed("orders", "/typed", &CallOptions::new())
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.data.unwrap().id, 9);
    }

    #[tokio::test]
    async fn typed_call_flags_unparseable_body() {
        let app = Router::new().route("/typed", get(|| async { "not json" }));
        let port = serve(app).await;
        let registry = Arc::new(MemoryRegistry::new());
        seed(&registry, "orders", port);
        let (_caches, _resolver, client) = harness(registry, ClientConfig::default());

        let err = client
            .call_typed::<Value>("orders", "/typed", &CallOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Malformed { .. }));
    }

    #[test]
    fn timeout_header_overrides_the_default() {
        let mut headers = HashMap::new();
        assert_eq!(effective_timeout(&headers, 90), Duration::from_secs(90));

        headers.insert("X-Timeout".to_string(), "7".to_string());
        assert_eq!(effective_timeout(&headers, 90), Duration::from_secs(7));

        headers.insert("X-Timeout".to_string(), "zero".to_string());
        assert_eq!(effective_timeout(&headers, 90), Duration::from_secs(90));

        headers.insert("X-Timeout".to_string(), "0".to_string());
        assert_eq!(effective_timeout(&headers, 90), Duration::from_secs(90));
    }

    #[test]
    fn render_path_escapes_values() {
        let params: HashMap<String, String> = [
            ("id".to_string(), "a b/c".to_string()),
            ("unused".to_string(), "x".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            render_path("/api/items/{id}", &params),
            "/api/items/a%20b%2Fc"
        );
        assert_eq!(render_path("/api/{other}", &params), "/api/{other}");
    }
}
