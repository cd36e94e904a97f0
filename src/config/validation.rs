use crate::config::models::AppConfig;

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Validates an [`AppConfig`] before the server is built from it.
pub struct AppConfigValidator;

impl AppConfigValidator {
    pub fn validate(config: &AppConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_address(&config.listen_address, "listen-address") {
            errors.push(e);
        }

        if config.upstreams.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "upstreams".to_string(),
            });
        }
        for upstream in &config.upstreams {
            if let Err(e) = Self::validate_address(&upstream.address, "upstreams") {
                errors.push(e);
            }
        }

        if let Err(e) = Self::validate_tls(config) {
            errors.push(e);
        }

        if config.authz_file.is_some() && !config.authorized_clients.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "authz-file".to_string(),
                message: "cannot be combined with --authzd-clients".to_string(),
            });
        }

        for (field, duration) in [
            ("handshake-timeout", config.handshake_timeout),
            ("dial-timeout", config.dial_timeout),
            ("idle-timeout", config.idle_timeout),
        ] {
            if duration.is_zero() {
                errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        if config.probe.unhealthy_threshold < 1 {
            errors.push(ValidationError::InvalidField {
                field: "unhealthy-threshold".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if config.probe.healthy_threshold < 1 {
            errors.push(ValidationError::InvalidField {
                field: "healthy-threshold".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !config.probe.period.is_zero() && config.probe.timeout.is_zero() {
            errors.push(ValidationError::InvalidField {
                field: "probe-timeout".to_string(),
                message: "must be greater than zero when probing is enabled".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Addresses must be `host:port` with a numeric port; the host part
    /// may be a name, an IPv4 address, or a bracketed IPv6 address.
    fn validate_address(address: &str, field: &str) -> ValidationResult<()> {
        let invalid = |reason: &str| ValidationError::InvalidAddress {
            address: address.to_string(),
            reason: format!("{field}: {reason}"),
        };

        let Some((host, port)) = address.rsplit_once(':') else {
            return Err(invalid("expected host:port"));
        };
        if host.is_empty() {
            return Err(invalid("host must not be empty"));
        }
        if port.parse::<u16>().is_err() {
            return Err(invalid("port must be an integer in 0..=65535"));
        }
        Ok(())
    }

    fn validate_tls(config: &AppConfig) -> ValidationResult<()> {
        match (&config.tls, config.insecure_accept_tcp) {
            (Some(_), true) => Err(ValidationError::InvalidTls {
                message: "TLS flags are mutually exclusive with --insecure-accept-tcp".to_string(),
            }),
            (None, false) => Err(ValidationError::InvalidTls {
                message: "either all of --key-file, --cert-file and --ca-root-file, \
                          or --insecure-accept-tcp, must be given"
                    .to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        errors
            .iter()
            .map(|e| format!("  - {e}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{
        config::models::TlsPaths,
        core::{client::ClientID, upstream::Upstream},
    };

    fn valid_config() -> AppConfig {
        AppConfig {
            upstreams: vec![Upstream::tcp("10.0.0.1:9000")],
            insecure_accept_tcp: true,
            ..AppConfig::default()
        }
    }

    fn tls_paths() -> TlsPaths {
        TlsPaths {
            cert_file: PathBuf::from("cert.pem"),
            key_file: PathBuf::from("key.pem"),
            ca_root_file: PathBuf::from("ca.pem"),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        AppConfigValidator::validate(&valid_config()).unwrap();
    }

    #[test]
    fn test_no_upstreams_fails() {
        let cfg = AppConfig {
            upstreams: Vec::new(),
            ..valid_config()
        };
        assert!(AppConfigValidator::validate(&cfg).is_err());
    }

    #[test]
    fn test_bad_listen_address_fails() {
        for bad in ["nocolon", ":9000", "host:notaport"] {
            let cfg = AppConfig {
                listen_address: bad.to_string(),
                ..valid_config()
            };
            assert!(
                AppConfigValidator::validate(&cfg).is_err(),
                "address {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_ipv6_listen_address_passes() {
        let cfg = AppConfig {
            listen_address: "[::1]:4321".to_string(),
            ..valid_config()
        };
        AppConfigValidator::validate(&cfg).unwrap();
    }

    #[test]
    fn test_tls_and_insecure_are_mutually_exclusive() {
        let cfg = AppConfig {
            tls: Some(tls_paths()),
            insecure_accept_tcp: true,
            ..valid_config()
        };
        assert!(AppConfigValidator::validate(&cfg).is_err());
    }

    #[test]
    fn test_neither_tls_nor_insecure_fails() {
        let cfg = AppConfig {
            insecure_accept_tcp: false,
            tls: None,
            ..valid_config()
        };
        assert!(AppConfigValidator::validate(&cfg).is_err());
    }

    #[test]
    fn test_tls_mode_passes() {
        let cfg = AppConfig {
            tls: Some(tls_paths()),
            insecure_accept_tcp: false,
            ..valid_config()
        };
        AppConfigValidator::validate(&cfg).unwrap();
    }

    #[test]
    fn test_authz_file_conflicts_with_authzd_clients() {
        let cfg = AppConfig {
            authz_file: Some(PathBuf::from("authz.json")),
            authorized_clients: vec![ClientID::from_common_name("alice")],
            ..valid_config()
        };
        assert!(AppConfigValidator::validate(&cfg).is_err());
    }

    #[test]
    fn test_zero_thresholds_fail() {
        let mut cfg = valid_config();
        cfg.probe.healthy_threshold = 0;
        assert!(AppConfigValidator::validate(&cfg).is_err());
    }
}
