//! HTTP transport port and its reqwest adapter.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Method};

use super::error::TransportError;

/// A fully prepared HTTP call: signed, with an absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpCall {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL without query string.
    pub url: String,
    /// Query string pairs.
    pub query: Vec<(String, String)>,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// JSON body, if any.
    pub body: Option<String>,
    /// Return the body as a chunk stream instead of buffering it.
    pub stream: bool,
}

/// Response body.
pub enum Body {
    /// Entire body, already read.
    Full(String),
    /// Body chunks as they arrive.
    Chunks(BoxStream<'static, Result<Vec<u8>, TransportError>>),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(text) => f.debug_tuple("Full").field(text).finish(),
            Self::Chunks(_) => f.write_str("Chunks(..)"),
        }
    }
}

/// HTTP response.
#[derive(Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Body,
}

impl HttpResponse {
    /// Buffered response.
    pub fn full(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: Body::Full(body.into()),
        }
    }

    /// Returns true for a 2xx status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// One reusable transport session.
#[async_trait]
pub trait HttpSession: Send {
    /// Execute `call`.
    async fn send(&mut self, call: &HttpCall) -> Result<HttpResponse, TransportError>;
}

/// Creates sessions for the pool.
pub trait SessionFactory: Send + Sync {
    /// Create a new session.
    fn create(&self) -> Result<Box<dyn HttpSession>, TransportError>;
}

/// Session backed by a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestSession {
    client: Client,
}

#[async_trait]
impl HttpSession for ReqwestSession {
    async fn send(&mut self, call: &HttpCall) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(call.method.clone(), &call.url)
            .query(&call.query);
        for (name, value) in &call.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &call.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let status = response.status().as_u16();

        let body = if call.stream {
            Body::Chunks(
                response
                    .bytes_stream()
                    .map(|chunk| {
                        chunk
                            .map(|bytes| bytes.to_vec())
                            .map_err(|e| TransportError::Body(e.to_string()))
                    })
                    .boxed(),
            )
        } else {
            Body::Full(
                response
                    .text()
                    .await
                    .map_err(|e| TransportError::Body(e.to_string()))?,
            )
        };

        Ok(HttpResponse { status, body })
    }
}

/// Builds [`ReqwestSession`]s.
#[derive(Debug, Clone)]
pub struct ReqwestSessionFactory {
    connect_timeout: Duration,
    user_agent: String,
}

impl ReqwestSessionFactory {
    /// Factory with the given connect timeout.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            user_agent: concat!("bybit-gateway/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for ReqwestSessionFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl SessionFactory for ReqwestSessionFactory {
    fn create(&self) -> Result<Box<dyn HttpSession>, TransportError> {
        let mut headers = HeaderMap::new();
        let agent =
            HeaderValue::from_str(&self.user_agent).map_err(|e| TransportError::Session(e.to_string()))?;
        headers.insert(USER_AGENT, agent);

        let client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Session(e.to_string()))?;
        Ok(Box::new(ReqwestSession { client }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn call(server: &MockServer, method: Method, route: &str) -> HttpCall {
        HttpCall {
            method,
            url: format!("{}{route}", server.uri()),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            stream: false,
        }
    }

    #[test]
    fn success_range() {
        assert!(HttpResponse::full(200, "").is_success());
        assert!(HttpResponse::full(204, "").is_success());
        assert!(!HttpResponse::full(301, "").is_success());
        assert!(!HttpResponse::full(403, "").is_success());
    }

    #[tokio::test]
    async fn sends_query_and_reads_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/private/order"))
            .and(query_param("symbol", "BTCUSD"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ret_code":0}"#))
            .mount(&server)
            .await;

        let mut session = ReqwestSessionFactory::default().create().unwrap();
        let mut call = call(&server, Method::GET, "/v2/private/order");
        call.query.push(("symbol".to_string(), "BTCUSD".to_string()));

        let response = session.send(&call).await.unwrap();

        assert_eq!(response.status, 200);
        assert!(matches!(response.body, Body::Full(ref text) if text == r#"{"ret_code":0}"#));
    }

    #[tokio::test]
    async fn posts_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/private/order/create"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({"symbol": "BTCUSD"})))
            .respond_with(ResponseTemplate::new(201).set_body_string("{}"))
            .mount(&server)
            .await;

        let mut session = ReqwestSessionFactory::default().create().unwrap();
        let mut call = call(&server, Method::POST, "/v2/private/order/create");
        call.body = Some(r#"{"symbol":"BTCUSD"}"#.to_string());

        let response = session.send(&call).await.unwrap();

        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn streaming_returns_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"a\":1}\n{\"a\":2}\n"))
            .mount(&server)
            .await;

        let mut session = ReqwestSessionFactory::default().create().unwrap();
        let mut call = call(&server, Method::GET, "/stream");
        call.stream = true;

        let response = session.send(&call).await.unwrap();
        let Body::Chunks(mut chunks) = response.body else {
            panic!("expected chunked body");
        };
        let mut collected = Vec::new();
        while let Some(chunk) = chunks.next().await {
            collected.extend(chunk.unwrap());
        }

        assert_eq!(collected, b"{\"a\":1}\n{\"a\":2}\n");
    }

    #[tokio::test]
    async fn connection_failure_is_transport_error() {
        let mut session = ReqwestSessionFactory::default().create().unwrap();
        let call = HttpCall {
            method: Method::GET,
            url: "http://127.0.0.1:1/unreachable".to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            stream: false,
        };

        let err = session.send(&call).await.unwrap_err();

        assert!(matches!(err, TransportError::Http(_)));
    }
}
