//! Collaborator capability traits
//!
//! The core talks to the directory service and to the local group store only
//! through these narrow async capabilities. Implementations run under whatever
//! service account the composition root gives them.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MembershipResult;

/// Structural object class of a directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralClass {
    User,
    Group,
    Computer,
    Other(String),
}

impl StructuralClass {
    /// Classify from the most specific `objectClass` value.
    #[must_use]
    pub fn from_object_class(object_class: &str) -> Self {
        match object_class.to_ascii_lowercase().as_str() {
            "user" | "inetorgperson" => Self::User,
            "group" => Self::Group,
            "computer" => Self::Computer,
            _ => Self::Other(object_class.to_string()),
        }
    }

    /// Whether this is a leaf user object.
    #[must_use]
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User)
    }
}

impl fmt::Display for StructuralClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Group => f.write_str("group"),
            Self::Computer => f.write_str("computer"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// A principal as returned by the directory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryPrincipal {
    /// Distinguished name of the entry.
    pub distinguished_name: String,
    /// SID in text form.
    pub sid: String,
    /// Pre-Windows 2000 logon name.
    pub sam_account_name: String,
    /// Display name, if set.
    pub display_name: Option<String>,
    /// Mail address, if set.
    pub email: Option<String>,
    /// NetBIOS name of the domain the entry was read from.
    pub domain: String,
    /// Most specific structural class.
    pub structural_class: StructuralClass,
}

impl DirectoryPrincipal {
    /// `DOMAIN\sAMAccountName`, or the bare account name without a domain.
    #[must_use]
    pub fn login_name(&self) -> String {
        if self.domain.is_empty() {
            self.sam_account_name.clone()
        } else {
            format!("{}\\{}", self.domain, self.sam_account_name)
        }
    }
}

/// The identifying field used to locate a directory group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupLookup<'a> {
    SamAccountName(&'a str),
    Sid(&'a str),
    DisplayName(&'a str),
    LoginName(&'a str),
}

impl GroupLookup<'_> {
    /// Human-readable name of the identifying field.
    #[must_use]
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::SamAccountName(_) => "SamAccountName",
            Self::Sid(_) => "Sid",
            Self::DisplayName(_) => "DisplayName",
            Self::LoginName(_) => "LoginName",
        }
    }

    /// The value being looked up.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::SamAccountName(v) | Self::Sid(v) | Self::DisplayName(v) | Self::LoginName(v) => {
                v
            }
        }
    }
}

/// A principal as recorded in the local group store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalPrincipal {
    /// Store-assigned numeric id.
    pub id: i64,
    /// Login as stored, possibly claims-encoded.
    pub login_name: String,
    /// Display name; for directory-sourced entries often `DOMAIN\name`.
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Whether the entry stands for a directory group.
    #[serde(default)]
    pub is_directory_group: bool,
}

/// Capability set consumed from the directory service.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Find the directory principal behind a login (claims prefix already
    /// stripped). Returns `Ok(None)` when no principal matches.
    async fn bind_user(&self, login: &str) -> MembershipResult<Option<DirectoryPrincipal>>;

    /// Read the flattened transitive group membership of a principal as
    /// binary SIDs. Returns `Ok(None)` when the directory does not hand out
    /// the attribute, which callers treat as access denied.
    async fn flattened_group_sids(
        &self,
        principal: &DirectoryPrincipal,
    ) -> MembershipResult<Option<Vec<Vec<u8>>>>;

    /// Locate a group within `domain` by one identifying field.
    async fn find_group(
        &self,
        domain: &str,
        lookup: GroupLookup<'_>,
    ) -> MembershipResult<Option<DirectoryPrincipal>>;

    /// List the members of a group. With `recursive` set, nested groups are
    /// flattened by the directory and only leaf principals are returned.
    async fn group_members(
        &self,
        group: &DirectoryPrincipal,
        recursive: bool,
    ) -> MembershipResult<Vec<DirectoryPrincipal>>;

    /// Resolve a SID to `DOMAIN\account`. Returns `Ok(None)` for unknown SIDs.
    async fn reverse_resolve_sid(&self, sid: &str) -> MembershipResult<Option<String>>;
}

/// Capability set consumed from the local group store.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Names of all groups in the store.
    async fn list_group_names(&self) -> MembershipResult<Vec<String>>;

    /// Direct members of a group. Fails with `NotFound` for unknown groups.
    async fn group_members(&self, group_name: &str) -> MembershipResult<Vec<LocalPrincipal>>;

    /// Look up a login, registering a lightweight record when it is new.
    async fn ensure_user(&self, login: &str) -> MembershipResult<LocalPrincipal>;
}
