//! Courier
//!
//! Dual-mode HTTP requests on top of hyper. A request is a body sink and a future of its
//! response at the same time; a response hands out its body as raw chunks, or as one
//! value collected and parsed in a single step.
//!
//! ```no_run
//! # async fn demo() -> Result<(), courier::Error> {
//! use courier::{request, Method, RequestOptions};
//!
//! let mut response = request(
//!     "http://localhost:8080/api",
//!     RequestOptions::new()
//!         .method(Method::Post)
//!         .path("users")
//!         .json(&serde_json::json!({"name": "ferris"})),
//! )?
//! .await?;
//!
//! let user: serde_json::Value = response.json().await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod body;
pub mod collector;
mod error;
pub mod request;
pub mod response;
pub mod target;
mod timeout;
pub mod transport;

pub use self::body::BodySource;
pub use self::collector::Collector;
pub use self::error::Error;
pub use self::request::{
    request, BodyWriter, Descriptor, Finalized, Method, Phase, RequestHandle, RequestOptions,
    ResponseFuture,
};
pub use self::response::Response;
pub use self::target::{Query, QueryValue, Target};
pub use self::timeout::DEFAULT_TIMEOUT;
pub use self::transport::{Agent, AgentOption};

/// A type-erased, thread-safe error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
