pub mod forwarder;
pub mod handlers;
pub mod probe_pool;
pub mod retry_dialer;
pub mod server;
pub mod tcp_dialer;
pub mod tls;

/// Re-export commonly used types from adapters
pub use forwarder::{AggregateError, ForwardFailure, ForwardingSupervisor};
pub use probe_pool::{ProbePool, ProbePoolConfig};
pub use retry_dialer::RetryDialer;
pub use server::{build_server, BuiltServer, Server};
pub use tcp_dialer::{TcpUpstreamDialer, TimeoutDialer};
