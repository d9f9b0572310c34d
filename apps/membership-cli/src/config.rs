use std::path::PathBuf;

use membership_core::MembershipError;
use membership_directory::DirectoryConfig;

/// Configuration for the membership CLI.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Directory connection settings.
    pub directory: DirectoryConfig,

    /// JSON file describing the local principals and groups.
    pub local_store_path: PathBuf,
}

impl CliConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// This allows tests to supply variables without mutating process-global
    /// environment state.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let required = |key: &str| reader(key).map_err(|_| ConfigError::MissingVar(key.into()));

        let host = required("MEMBERSHIP_LDAP_HOST")?;
        let base_dn = required("MEMBERSHIP_LDAP_BASE_DN")?;
        let bind_dn = required("MEMBERSHIP_LDAP_BIND_DN")?;
        let domain = required("MEMBERSHIP_LDAP_DOMAIN")?;
        let local_store_path = PathBuf::from(required("MEMBERSHIP_LOCAL_STORE_PATH")?);

        let mut directory = DirectoryConfig::new(host, base_dn, bind_dn, domain);

        if let Ok(password) = reader("MEMBERSHIP_LDAP_BIND_PASSWORD") {
            directory = directory.with_password(password);
        }

        let use_ssl = reader("MEMBERSHIP_LDAP_USE_SSL")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .map_err(|e| ConfigError::InvalidValue("MEMBERSHIP_LDAP_USE_SSL".into(), e.to_string()))?;
        if use_ssl {
            directory = directory.with_ssl();
        }

        directory.use_starttls = reader("MEMBERSHIP_LDAP_USE_STARTTLS")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .map_err(|e| {
                ConfigError::InvalidValue("MEMBERSHIP_LDAP_USE_STARTTLS".into(), e.to_string())
            })?;

        if let Ok(port) = reader("MEMBERSHIP_LDAP_PORT") {
            directory.port = port.parse::<u16>().map_err(|e| {
                ConfigError::InvalidValue("MEMBERSHIP_LDAP_PORT".into(), e.to_string())
            })?;
        }

        directory.connection_timeout_secs = reader("MEMBERSHIP_LDAP_CONNECT_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .unwrap_or(30);

        directory.search_timeout_secs = reader("MEMBERSHIP_LDAP_SEARCH_TIMEOUT_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .unwrap_or(60);

        directory.validate()?;

        Ok(Self {
            directory,
            local_store_path,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error(transparent)]
    Directory(#[from] MembershipError),
}
