use std::fmt;

use serde::{Deserialize, Serialize};

/// Namespace used for identities derived from a certificate Subject CommonName.
pub const COMMON_NAME_NAMESPACE: &str = "CommonName";

/// Namespace used for the fixed identity assigned to anonymous TCP clients.
pub const ANONYMOUS_NAMESPACE: &str = "Anonymous";

/// The identity of an authenticated client.
///
/// A `ClientID` is a plain value: a namespace naming the authentication
/// scheme that produced it, plus an opaque key unique within that namespace.
/// Additional namespaces (e.g. SAN entries) can be introduced without
/// changing any consumer of this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientID {
    pub namespace: String,
    pub key: String,
}

impl ClientID {
    /// Identity derived from a certificate Subject CommonName.
    pub fn from_common_name(common_name: impl Into<String>) -> Self {
        Self {
            namespace: COMMON_NAME_NAMESPACE.to_string(),
            key: common_name.into(),
        }
    }

    /// The fixed identity assigned to clients in insecure TCP mode.
    pub fn anonymous() -> Self {
        Self {
            namespace: ANONYMOUS_NAMESPACE.to_string(),
            key: "anonymous".to_string(),
        }
    }
}

impl fmt::Display for ClientID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_equality() {
        let a = ClientID::from_common_name("alice");
        let b = ClientID::from_common_name("alice");
        let c = ClientID::from_common_name("carol");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_client_id_namespaces_are_distinct() {
        let cn = ClientID::from_common_name("anonymous");
        let anon = ClientID::anonymous();
        assert_ne!(cn, anon);
    }

    #[test]
    fn test_client_id_display() {
        let id = ClientID::from_common_name("alice");
        assert_eq!(id.to_string(), "CommonName:alice");
    }
}
