//! Static forwarding authorization.
//!
//! Authorization data is a three-level mapping: clients belong to groups,
//! groups grant upstream groups, upstream groups contain upstreams. The
//! tables are fixed at construction and evaluated purely in memory.

use std::collections::HashMap;

use crate::{
    core::{
        client::ClientID,
        upstream::{Upstream, UpstreamSet},
    },
    ports::authorizer::Authorizer,
};

/// A logical group of clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Group(pub String);

/// A logical group of upstreams.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamGroup(pub String);

/// The authorization tables consumed by [`StaticAuthorizer`].
#[derive(Debug, Clone, Default)]
pub struct AuthzTables {
    pub groups_by_client: HashMap<ClientID, Vec<Group>>,
    pub upstream_groups_by_group: HashMap<Group, Vec<UpstreamGroup>>,
    pub upstreams_by_upstream_group: HashMap<UpstreamGroup, UpstreamSet>,
}

impl AuthzTables {
    /// Tables granting each of `clients` membership of a single default
    /// group that maps onto all of `upstreams`. This is the shape produced
    /// by the `--authzd-clients` flag.
    pub fn uniform(clients: impl IntoIterator<Item = ClientID>, upstreams: UpstreamSet) -> Self {
        let group = Group("default".to_string());
        let upstream_group = UpstreamGroup("default".to_string());

        let mut groups_by_client = HashMap::new();
        for client in clients {
            groups_by_client.insert(client, vec![group.clone()]);
        }

        let mut upstream_groups_by_group = HashMap::new();
        upstream_groups_by_group.insert(group, vec![upstream_group.clone()]);

        let mut upstreams_by_upstream_group = HashMap::new();
        upstreams_by_upstream_group.insert(upstream_group, upstreams);

        Self {
            groups_by_client,
            upstream_groups_by_group,
            upstreams_by_upstream_group,
        }
    }
}

/// An [`Authorizer`] backed by static in-memory tables.
pub struct StaticAuthorizer {
    tables: AuthzTables,
}

impl StaticAuthorizer {
    pub fn new(tables: AuthzTables) -> Self {
        Self { tables }
    }
}

impl Authorizer for StaticAuthorizer {
    fn authorized_upstreams(&self, client: &ClientID) -> UpstreamSet {
        let mut result = UpstreamSet::empty();
        let Some(groups) = self.tables.groups_by_client.get(client) else {
            return result;
        };
        for group in groups {
            let Some(upstream_groups) = self.tables.upstream_groups_by_group.get(group) else {
                continue;
            };
            for upstream_group in upstream_groups {
                if let Some(upstreams) =
                    self.tables.upstreams_by_upstream_group.get(upstream_group)
                {
                    result.union_update(upstreams);
                }
            }
        }
        result
    }
}

/// Convenience used by tests and the uniform-table constructor.
pub fn upstream_set(upstreams: &[Upstream]) -> UpstreamSet {
    upstreams.iter().cloned().collect()
}
