pub mod authorizer;
pub mod client;
pub mod dial_policy;
pub mod health;
pub mod reserver;
pub mod upstream;

pub use authorizer::{AuthzTables, StaticAuthorizer};
pub use client::ClientID;
pub use dial_policy::LeastConnectionPolicy;
pub use health::{AlwaysHealthy, BeliefConfig, BeliefHealthTracker, HealthBelief};
pub use reserver::{BoundedClientReserver, UnboundedClientReserver};
pub use upstream::{Upstream, UpstreamSet};
