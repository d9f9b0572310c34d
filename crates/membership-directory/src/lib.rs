//! Active Directory client for membership resolution.
//!
//! [`LdapDirectory`] implements [`membership_core::DirectoryClient`] over
//! LDAP using the `ldap3` crate.
//!
//! # Example
//!
//! ```no_run
//! use membership_directory::{DirectoryConfig, LdapDirectory};
//!
//! # async fn example() -> membership_core::MembershipResult<()> {
//! let config = DirectoryConfig::from_dns_domain("corp.example.com", "svc-membership@corp.example.com")
//!     .with_password("secret")
//!     .with_starttls();
//! let directory = LdapDirectory::new(config)?;
//! directory.test_connection().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;

pub use config::DirectoryConfig;
pub use connector::{escape_filter_value, LdapDirectory};
