//! Tollgate - an mTLS-terminating TCP load balancer.
//!
//! Tollgate accepts mutually-authenticated TLS connections from clients,
//! applies per-client rate limiting and authorization, and forwards the
//! decrypted byte stream to one of a set of upstream TCP endpoints. It is
//! deliberately application-protocol-agnostic: the forwarded stream is
//! never inspected or framed.
//!
//! # Features
//! - TLS 1.3 termination with required client certificates; client
//!   identity derived from the certificate Subject CommonName
//! - Per-client concurrent connection caps with bounded memory
//! - Static group-based authorization (flags or config file)
//! - Least-connections upstream selection with retry-on-failure dialing
//! - Passive + active health belief tracking with periodic probing
//! - Bidirectional forwarding with half-close propagation and an
//!   application-data idle timeout
//! - Structured tracing via `tracing` and exporter-agnostic metrics
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters**
//! (implementations) and keeps domain logic inside `core`. The binary
//! crate wires a handler pipeline (recovery, authentication, rate
//! limiting, authorization, forwarding) onto an accept loop; each layer
//! owns its inner layer and the client connection is closed by ownership
//! on every exit path.
//!
//! # Quick Example
//! ```no_run
//! use tollgate::{adapters::build_server, config::models::AppConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = AppConfig {
//!     upstreams: vec![tollgate::core::Upstream::tcp("10.0.0.1:9000")],
//!     insecure_accept_tcp: true,
//!     ..AppConfig::default()
//! };
//! let built = build_server(&cfg).await?;
//! built.server.serve(CancellationToken::new()).await?;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Domain errors are small `thiserror` enums; wiring and I/O setup errors
//! are `eyre::Result` with context attached. A connection is never told
//! why it was refused: the balancer signals failure by closing.

pub mod adapters;
pub mod config;
pub mod core;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub use crate::{
    adapters::{build_server, BuiltServer, ForwardingSupervisor, ProbePool, Server},
    config::models::AppConfig,
    core::{ClientID, Upstream, UpstreamSet},
    utils::GracefulShutdown,
};
