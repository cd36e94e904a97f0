//! Runtime configuration data structures.
//!
//! The main `AppConfig` is assembled from command-line flags; the
//! authorization file models are serde-friendly and map directly onto
//! JSON / YAML / TOML authorization files.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::core::{
    authorizer::{AuthzTables, Group, UpstreamGroup},
    client::ClientID,
    upstream::{Upstream, UpstreamSet},
};

/// Paths to the PEM material for terminating TLS.
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub ca_root_file: PathBuf,
}

/// Active health probing settings. A zero period disables probing, in
/// which case every configured upstream is always considered healthy.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub period: Duration,
    pub timeout: Duration,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Complete runtime configuration of the load balancer.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_address: String,
    pub upstreams: Vec<Upstream>,
    /// Per-client concurrent connection cap; zero or negative disables it.
    pub max_conns_per_client: i64,
    /// Clients granted access to all upstreams (CommonName namespace).
    pub authorized_clients: Vec<ClientID>,
    /// Optional authorization config file with full group mappings.
    pub authz_file: Option<PathBuf>,
    /// TLS material; `None` only in insecure TCP mode.
    pub tls: Option<TlsPaths>,
    pub insecure_accept_tcp: bool,
    pub handshake_timeout: Duration,
    pub dial_timeout: Duration,
    pub idle_timeout: Duration,
    pub probe: ProbeSettings,
    pub accept_error_cooldown: Duration,
}

impl AppConfig {
    /// The configured upstreams as a set.
    pub fn upstream_set(&self) -> UpstreamSet {
        self.upstreams.iter().cloned().collect()
    }

    /// Build the authorization tables for this configuration.
    ///
    /// With an authorization file, the file's mappings are used verbatim.
    /// Otherwise every client named by `--authzd-clients` (plus the
    /// anonymous identity in insecure mode) is granted all configured
    /// upstreams through a single default group.
    pub fn authz_tables(&self) -> eyre::Result<AuthzTables> {
        if let Some(path) = &self.authz_file {
            let file_config = crate::config::loader::load_authz_file(path)?;
            return Ok(file_config.into_tables());
        }

        let mut clients = self.authorized_clients.clone();
        if self.insecure_accept_tcp {
            clients.push(ClientID::anonymous());
        }
        Ok(AuthzTables::uniform(clients, self.upstream_set()))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:4321".to_string(),
            upstreams: Vec::new(),
            max_conns_per_client: 10,
            authorized_clients: Vec::new(),
            authz_file: None,
            tls: None,
            insecure_accept_tcp: false,
            handshake_timeout: Duration::from_secs(10),
            dial_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            probe: ProbeSettings::default(),
            accept_error_cooldown: Duration::from_secs(1),
        }
    }
}

/// Authorization config file model: three string-keyed mappings.
///
/// ```json
/// {
///   "clients": { "alice": ["admins"] },
///   "groups": { "admins": ["all"] },
///   "upstream_groups": { "all": ["10.0.0.1:9000", "10.0.0.2:9000"] }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthzFileConfig {
    /// Client CommonName -> groups.
    #[serde(default)]
    pub clients: HashMap<String, Vec<String>>,
    /// Group -> upstream groups.
    #[serde(default)]
    pub groups: HashMap<String, Vec<String>>,
    /// Upstream group -> upstream `host:port` addresses.
    #[serde(default)]
    pub upstream_groups: HashMap<String, Vec<String>>,
}

impl AuthzFileConfig {
    pub fn into_tables(self) -> AuthzTables {
        let groups_by_client = self
            .clients
            .into_iter()
            .map(|(name, groups)| {
                (
                    ClientID::from_common_name(name),
                    groups.into_iter().map(Group).collect(),
                )
            })
            .collect();

        let upstream_groups_by_group = self
            .groups
            .into_iter()
            .map(|(name, upstream_groups)| {
                (
                    Group(name),
                    upstream_groups.into_iter().map(UpstreamGroup).collect(),
                )
            })
            .collect();

        let upstreams_by_upstream_group = self
            .upstream_groups
            .into_iter()
            .map(|(name, addresses)| {
                (
                    UpstreamGroup(name),
                    addresses.into_iter().map(Upstream::tcp).collect::<UpstreamSet>(),
                )
            })
            .collect();

        AuthzTables {
            groups_by_client,
            upstream_groups_by_group,
            upstreams_by_upstream_group,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{core::authorizer::StaticAuthorizer, ports::authorizer::Authorizer};

    #[test]
    fn test_uniform_tables_grant_all_upstreams() {
        let cfg = AppConfig {
            upstreams: vec![Upstream::tcp("a:1"), Upstream::tcp("b:2")],
            authorized_clients: vec![ClientID::from_common_name("alice")],
            ..AppConfig::default()
        };
        let authorizer = StaticAuthorizer::new(cfg.authz_tables().unwrap());
        assert_eq!(
            authorizer.authorized_upstreams(&ClientID::from_common_name("alice")),
            cfg.upstream_set()
        );
        assert!(authorizer
            .authorized_upstreams(&ClientID::from_common_name("mallory"))
            .is_empty());
    }

    #[test]
    fn test_insecure_mode_authorizes_anonymous() {
        let cfg = AppConfig {
            upstreams: vec![Upstream::tcp("a:1")],
            insecure_accept_tcp: true,
            ..AppConfig::default()
        };
        let authorizer = StaticAuthorizer::new(cfg.authz_tables().unwrap());
        assert!(!authorizer
            .authorized_upstreams(&ClientID::anonymous())
            .is_empty());
    }

    #[test]
    fn test_authz_file_config_into_tables() {
        let file_config = AuthzFileConfig {
            clients: HashMap::from([("alice".to_string(), vec!["admins".to_string()])]),
            groups: HashMap::from([("admins".to_string(), vec!["all".to_string()])]),
            upstream_groups: HashMap::from([(
                "all".to_string(),
                vec!["10.0.0.1:9000".to_string()],
            )]),
        };
        let authorizer = StaticAuthorizer::new(file_config.into_tables());
        let got = authorizer.authorized_upstreams(&ClientID::from_common_name("alice"));
        assert!(got.contains(&Upstream::tcp("10.0.0.1:9000")));
    }
}
