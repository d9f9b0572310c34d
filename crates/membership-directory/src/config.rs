//! Directory client configuration
//!
//! Connection and search settings for an Active Directory domain.

use membership_core::{MembershipError, MembershipResult};
use serde::{Deserialize, Serialize};

/// Configuration for [`LdapDirectory`](crate::LdapDirectory).
#[derive(Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Domain controller hostname or IP address.
    pub host: String,

    /// Port (389 for LDAP, 636 for LDAPS).
    #[serde(default = "default_ldap_port")]
    pub port: u16,

    /// Use SSL/TLS (LDAPS).
    #[serde(default)]
    pub use_ssl: bool,

    /// Use STARTTLS upgrade on plain LDAP connection.
    #[serde(default)]
    pub use_starttls: bool,

    /// Base DN searched for users and groups (e.g., "DC=corp,DC=example,DC=com").
    pub base_dn: String,

    /// Service account DN or UPN used to bind.
    pub bind_dn: String,

    /// Service account password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// NetBIOS domain name used in `DOMAIN\account` logins (e.g., "CORP").
    pub domain: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Per-search timeout in seconds; 0 disables it.
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
}

impl std::fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("use_starttls", &self.use_starttls)
            .field("base_dn", &self.base_dn)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("domain", &self.domain)
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .field("search_timeout_secs", &self.search_timeout_secs)
            .finish()
    }
}

fn default_ldap_port() -> u16 {
    389
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_search_timeout() -> u64 {
    60
}

impl DirectoryConfig {
    /// Create a new config with required fields.
    pub fn new(
        host: impl Into<String>,
        base_dn: impl Into<String>,
        bind_dn: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_ldap_port(),
            use_ssl: false,
            use_starttls: false,
            base_dn: base_dn.into(),
            bind_dn: bind_dn.into(),
            bind_password: None,
            domain: domain.into(),
            connection_timeout_secs: default_connection_timeout(),
            search_timeout_secs: default_search_timeout(),
        }
    }

    /// Create a config from the DNS name of the domain.
    ///
    /// The base DN is derived from the DNS name, and the NetBIOS name
    /// defaults to its first label in upper case.
    #[must_use]
    pub fn from_dns_domain(dns_domain: &str, bind_dn: &str) -> Self {
        // corp.example.com -> DC=corp,DC=example,DC=com
        let base_dn = dns_domain
            .split('.')
            .map(|part| format!("DC={part}"))
            .collect::<Vec<_>>()
            .join(",");
        let netbios = dns_domain
            .split('.')
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        Self::new(dns_domain, base_dn, bind_dn, netbios)
    }

    /// Set bind password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.bind_password = Some(password.into());
        self
    }

    /// Enable SSL (LDAPS).
    #[must_use]
    pub fn with_ssl(mut self) -> Self {
        self.use_ssl = true;
        self.port = 636;
        self
    }

    /// Enable STARTTLS.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.use_starttls = true;
        self
    }

    /// Get the LDAP URL.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Copy with the password replaced for logging.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.bind_password.is_some() {
            config.bind_password = Some("***REDACTED***".to_string());
        }
        config
    }

    /// Check required fields and option combinations.
    pub fn validate(&self) -> MembershipResult<()> {
        let invalid = |message: &str| MembershipError::InvalidConfiguration {
            message: message.to_string(),
        };

        if self.host.is_empty() {
            return Err(invalid("host is required"));
        }
        if self.base_dn.is_empty() {
            return Err(invalid("base_dn is required"));
        }
        if self.bind_dn.is_empty() {
            return Err(invalid("bind_dn is required"));
        }
        if self.domain.is_empty() {
            return Err(invalid("domain is required"));
        }
        if self.domain.contains('\\') || self.domain.contains('.') {
            return Err(invalid("domain must be the NetBIOS name, e.g. CORP"));
        }
        if self.use_ssl && self.use_starttls {
            return Err(invalid("cannot use both SSL and STARTTLS"));
        }
        Ok(())
    }
}
