use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

/// A named TCP endpoint that client connections may be forwarded to.
///
/// Two upstreams are the same upstream iff their `(network, address)` pairs
/// are equal. Ordering is derived so that scans over sets of upstreams are
/// reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Upstream {
    /// Network tag, e.g. `"tcp"`.
    pub network: String,
    /// Endpoint address as `host:port`.
    pub address: String,
}

impl Upstream {
    /// A TCP upstream at the given `host:port` address.
    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            network: "tcp".to_string(),
            address: address.into(),
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.network, self.address)
    }
}

/// An unordered set of upstreams.
///
/// Backed by a `BTreeSet` so that iteration order is deterministic; the
/// least-connections policy relies on this for reproducible tie-breaking
/// within a single selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamSet {
    members: BTreeSet<Upstream>,
}

impl UpstreamSet {
    /// An empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, upstream: Upstream) -> bool {
        self.members.insert(upstream)
    }

    pub fn remove(&mut self, upstream: &Upstream) -> bool {
        self.members.remove(upstream)
    }

    pub fn contains(&self, upstream: &Upstream) -> bool {
        self.members.contains(upstream)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Upstream> {
        self.members.iter()
    }

    /// Extend this set in place with the members of `other`.
    pub fn union_update(&mut self, other: &UpstreamSet) {
        for u in other.iter() {
            self.members.insert(u.clone());
        }
    }

    /// The members of this set that are also members of `other`.
    pub fn intersection(&self, other: &UpstreamSet) -> UpstreamSet {
        UpstreamSet {
            members: self.members.intersection(&other.members).cloned().collect(),
        }
    }
}

impl FromIterator<Upstream> for UpstreamSet {
    fn from_iter<I: IntoIterator<Item = Upstream>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a UpstreamSet {
    type Item = &'a Upstream;
    type IntoIter = std::collections::btree_set::Iter<'a, Upstream>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}
