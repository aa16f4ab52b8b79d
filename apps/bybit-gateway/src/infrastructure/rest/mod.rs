//! Signed REST Request Engine
//!
//! Exchange-agnostic pieces: HMAC signing, the request value and its
//! handlers, pooled transport sessions and the concurrent engine.

pub mod engine;
pub mod error;
pub mod request;
pub mod session_pool;
pub mod signer;
pub mod transport;

pub use engine::{EngineOptions, EnvelopeCheck, LogFallback, RequestEngine, RequestFallback};
pub use error::{RequestError, SigningError, TransportError};
pub use request::{Outcome, Rejection, Request, RequestHandle, RequestStatus};
pub use session_pool::{PooledSession, SessionPool};
pub use signer::{ParamValue, Params, RECV_WINDOW_MS, Signer};
pub use transport::{
    Body, HttpCall, HttpResponse, HttpSession, ReqwestSessionFactory, SessionFactory,
};
