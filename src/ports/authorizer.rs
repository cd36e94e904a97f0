use crate::core::{client::ClientID, upstream::UpstreamSet};

/// An authorization policy controlling which clients may forward to which
/// upstreams.
///
/// Implementations may be invoked concurrently from any number of tasks.
pub trait Authorizer: Send + Sync {
    /// The set of upstreams the given client is authorized to reach.
    ///
    /// A client that is not authorized for any upstream yields an empty
    /// set; an unknown client is not an error.
    fn authorized_upstreams(&self, client: &ClientID) -> UpstreamSet;
}
