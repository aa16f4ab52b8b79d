//! Outbound request value, its handlers and its lifecycle.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tokio::sync::watch;

use super::error::RequestError;
use super::signer::{ParamValue, Params, SIGN_PARAM};

/// Invoked with a parsed 2xx body, or once per streamed message.
pub type SuccessHandler = Arc<dyn Fn(Value, &Request) + Send + Sync>;
/// Invoked when the exchange refuses a request.
pub type RejectedHandler = Arc<dyn Fn(&Rejection, &Request) + Send + Sync>;
/// Invoked when a request fails before a usable response exists.
pub type ExceptionHandler = Arc<dyn Fn(&RequestError, &Request) + Send + Sync>;
/// Invoked once a streaming response has started.
pub type ConnectedHandler = Arc<dyn Fn(&Request) + Send + Sync>;

/// Request lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    /// Created or queued, not yet resolved.
    Ready,
    /// Success handler ran.
    Success,
    /// Rejected handler ran.
    Rejected,
    /// Exception handler ran.
    Errored,
}

impl RequestStatus {
    /// Returns true once the request has been resolved.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Ready)
    }

    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the exchange refused a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// HTTP status of the response.
    pub status: u16,
    /// Exchange error code, if the body carried one.
    pub ret_code: Option<i64>,
    /// Exchange error message, if the body carried one.
    pub message: Option<String>,
    /// Raw response body.
    pub body: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}", self.status)?;
        if let Some(code) = self.ret_code {
            write!(f, " ret_code={code}")?;
        }
        if let Some(message) = &self.message {
            write!(f, " {message}")?;
        }
        Ok(())
    }
}

/// Result of executing a request, dispatched to exactly one handler kind.
#[derive(Debug)]
pub enum Outcome {
    /// 2xx response with a parsed JSON body.
    Success(Value),
    /// Streaming response fully consumed; messages were delivered as they arrived.
    Streamed {
        /// Number of messages delivered.
        messages: usize,
    },
    /// The exchange refused the request.
    Rejected(Rejection),
    /// No usable response.
    Exception(RequestError),
}

impl Outcome {
    /// Metrics label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success(_) | Self::Streamed { .. } => "success",
            Self::Rejected(_) => "rejected",
            Self::Exception(_) => "exception",
        }
    }
}

/// One outbound REST call.
///
/// Built by the caller, moved into the engine on submit and mutated only by
/// the worker executing it.
pub struct Request {
    method: Method,
    path: String,
    params: Params,
    data: Params,
    headers: BTreeMap<String, String>,
    stream: bool,
    extra: Option<Value>,
    on_success: Option<SuccessHandler>,
    on_rejected: Option<RejectedHandler>,
    on_exception: Option<ExceptionHandler>,
    on_connected: Option<ConnectedHandler>,
    status: RequestStatus,
    status_code: Option<u16>,
    response: Option<String>,
}

impl Request {
    /// Create a request for `method` on `path`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Params::new(),
            data: Params::new(),
            headers: BTreeMap::new(),
            stream: false,
            extra: None,
            on_success: None,
            on_rejected: None,
            on_exception: None,
            on_connected: None,
            status: RequestStatus::Ready,
            status_code: None,
            response: None,
        }
    }

    /// GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Add a query parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add a body parameter.
    #[must_use]
    pub fn data(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Treat the response as a newline-delimited JSON stream.
    #[must_use]
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Attach opaque caller context.
    #[must_use]
    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Set the success handler.
    #[must_use]
    pub fn on_success(mut self, handler: impl Fn(Value, &Self) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(handler));
        self
    }

    /// Set the rejection handler. Without one the engine's fallback is used.
    #[must_use]
    pub fn on_rejected(
        mut self,
        handler: impl Fn(&Rejection, &Self) + Send + Sync + 'static,
    ) -> Self {
        self.on_rejected = Some(Arc::new(handler));
        self
    }

    /// Set the exception handler. Without one the engine's fallback is used.
    #[must_use]
    pub fn on_exception(
        mut self,
        handler: impl Fn(&RequestError, &Self) + Send + Sync + 'static,
    ) -> Self {
        self.on_exception = Some(Arc::new(handler));
        self
    }

    /// Set the handler run when a streaming response starts.
    #[must_use]
    pub fn on_connected(mut self, handler: impl Fn(&Self) + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Arc::new(handler));
        self
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Path relative to the engine's base URL.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query parameters.
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// Body parameters.
    #[must_use]
    pub const fn body(&self) -> &Params {
        &self.data
    }

    /// Headers.
    #[must_use]
    pub const fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Whether the response is streamed.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.stream
    }

    /// Caller context.
    #[must_use]
    pub const fn extra(&self) -> Option<&Value> {
        self.extra.as_ref()
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> RequestStatus {
        self.status
    }

    /// HTTP status of the response, once one arrived.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Parameters that get signed: query for GET, body otherwise.
    pub(crate) fn signed_params_mut(&mut self) -> &mut Params {
        if self.method == Method::GET {
            &mut self.params
        } else {
            &mut self.data
        }
    }

    pub(crate) fn set_response(&mut self, status_code: u16, response: Option<String>) {
        self.status_code = Some(status_code);
        if response.is_some() {
            self.response = response;
        }
    }

    pub(crate) fn success_handler(&self) -> Option<SuccessHandler> {
        self.on_success.clone()
    }

    pub(crate) fn rejected_handler(&self) -> Option<RejectedHandler> {
        self.on_rejected.clone()
    }

    pub(crate) fn exception_handler(&self) -> Option<ExceptionHandler> {
        self.on_exception.clone()
    }

    pub(crate) fn connected_handler(&self) -> Option<ConnectedHandler> {
        self.on_connected.clone()
    }

    /// Move from `Ready` to `status`. Returns false if already resolved.
    pub(crate) fn resolve(&mut self, status: RequestStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }
}

fn fmt_params(params: &Params) -> String {
    let rendered: Vec<String> = params
        .iter()
        .map(|(k, v)| match k.as_str() {
            "api_key" | SIGN_PARAM => format!("{k}=***"),
            _ => format!("{k}={v}"),
        })
        .collect();
    format!("{{{}}}", rendered.join(", "))
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self
            .status_code
            .map_or_else(|| "terminated".to_string(), |c| c.to_string());
        writeln!(f, "request: {} {} {}:", self.method, self.path, code)?;
        writeln!(f, "status: {}", self.status)?;
        writeln!(f, "headers: {:?}", self.headers)?;
        writeln!(f, "params: {}", fmt_params(&self.params))?;
        writeln!(f, "data: {}", fmt_params(&self.data))?;
        writeln!(f, "response: {}", self.response.as_deref().unwrap_or("None"))
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("stream", &self.stream)
            .field("status", &self.status)
            .field("status_code", &self.status_code)
            .finish_non_exhaustive()
    }
}

/// Caller-side view of a submitted request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    status: watch::Receiver<RequestStatus>,
}

impl RequestHandle {
    pub(crate) fn channel() -> (watch::Sender<RequestStatus>, Self) {
        let (tx, rx) = watch::channel(RequestStatus::Ready);
        (tx, Self { status: rx })
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> RequestStatus {
        *self.status.borrow()
    }

    /// Wait until the request is resolved and its handler has returned.
    ///
    /// Returns `Ready` only if the worker died without resolving it.
    pub async fn wait(&mut self) -> RequestStatus {
        let resolved = self
            .status
            .wait_for(|s| s.is_terminal())
            .await
            .map(|status| *status);
        resolved.unwrap_or_else(|_| *self.status.borrow())
    }
}
