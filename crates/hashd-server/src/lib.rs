//! # hashd server
//!
//! HTTP front end for the [`hashd_core`] engine, built on Hyper and Tokio.
//!
//! - `POST /hash` accepts a form field `password` and returns an id
//! - `GET /hash/{id}` returns the digest once the delay has passed
//! - `GET /stats` reports `{"total": N, "average": M}`
//! - `/shutdown` (or SIGINT/SIGTERM) stops accepting connections and drains
//!
//! ## Example
//!
//! ```rust,ignore
//! use hashd_core::{EngineConfig, HashEngine};
//! use hashd_server::{Server, ServerConfig};
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//! let server = Server::new(ServerConfig::default(), HashEngine::new(EngineConfig::default()));
//! let report = server.serve(listener).await?;
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod routes;
pub mod server;
pub mod shutdown;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{ServerError, ServerResult};
pub use routes::{HttpResponse, ResponseBody};
pub use server::{Server, MAX_BODY_BYTES};
pub use shutdown::{spawn_signal_listener, ConnectionToken, ConnectionTracker};
