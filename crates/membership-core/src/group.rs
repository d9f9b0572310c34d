//! Directory group resolution.
//!
//! Expands a directory group to its leaf user members and records a
//! diagnostic log of how the group was located and how long the directory
//! took. Failures never escape: they end up as error text on the result.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{error_chain, MembershipError, MembershipResult};
use crate::identity::Identity;
use crate::traits::{DirectoryClient, DirectoryPrincipal, GroupLookup};

/// Delimiter used when flattening a resolution failure into error text.
const ERROR_TEXT_DELIMITER: &str = "\n";

/// A leaf user member of a directory group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    /// `DOMAIN\sAMAccountName`.
    pub login: String,
    /// Display name with control characters removed.
    pub display_name: String,
}

impl From<&DirectoryPrincipal> for DirectoryUser {
    fn from(principal: &DirectoryPrincipal) -> Self {
        Self {
            login: principal.login_name(),
            display_name: sanitize_display_name(principal.display_name.as_deref()),
        }
    }
}

/// Outcome of resolving a directory group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryGroupMembership {
    account: Identity,
    members: Vec<DirectoryUser>,
    member_count: usize,
    log: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl DirectoryGroupMembership {
    /// The group that was resolved.
    pub fn account(&self) -> &Identity {
        &self.account
    }

    /// Members, sorted by login.
    pub fn members(&self) -> &[DirectoryUser] {
        &self.members
    }

    pub fn member_count(&self) -> usize {
        self.member_count
    }

    /// Diagnostic lines, in the order they were recorded.
    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Error text, set only when resolution failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Member logins, in member order.
    pub fn member_logins(&self) -> Vec<String> {
        self.members.iter().map(|m| m.login.clone()).collect()
    }
}

/// Expands directory groups to their user members.
#[derive(Clone)]
pub struct GroupResolver {
    directory: Arc<dyn DirectoryClient>,
}

impl GroupResolver {
    pub fn new(directory: Arc<dyn DirectoryClient>) -> Self {
        Self { directory }
    }

    /// Resolve `account` to its transitive user members.
    #[instrument(skip(self, account), fields(group = %account))]
    pub async fn resolve_group(&self, account: &Identity) -> DirectoryGroupMembership {
        let mut log = vec![format!(
            "Reading members of directory group '{}'.",
            account.login_name()
        )];

        let (members, error) = match self.read_members(account, &mut log).await {
            Ok(members) => (members, None),
            Err(e) => {
                match &e {
                    MembershipError::UnexpectedPrincipalType { .. } => {
                        error!(error = %e, "Recursive member query returned a non-user entry");
                    }
                    _ => warn!(error = %e, error_code = e.error_code(), "Group resolution failed"),
                }
                (Vec::new(), Some(error_chain(&e, ERROR_TEXT_DELIMITER)))
            }
        };

        DirectoryGroupMembership {
            account: account.clone(),
            member_count: members.len(),
            members,
            log,
            error,
        }
    }

    async fn read_members(
        &self,
        account: &Identity,
        log: &mut Vec<String>,
    ) -> MembershipResult<Vec<DirectoryUser>> {
        let lookup = group_lookup(account);
        log.push(format!(
            "Using {} {} to find group.",
            lookup.field_name(),
            lookup.value()
        ));
        debug!(field = lookup.field_name(), value = lookup.value(), "Locating group");

        let Some(group) = self.directory.find_group(account.domain(), lookup).await? else {
            log.push("Group not found.".to_string());
            debug!("Group not found in directory");
            return Ok(Vec::new());
        };

        let started = Instant::now();
        let found = self.directory.group_members(&group, true).await?;
        log.push(format!(
            "Directory query took {} seconds.",
            started.elapsed().as_secs_f64()
        ));

        let started = Instant::now();
        let mut seen = HashSet::new();
        let mut members = Vec::with_capacity(found.len());
        for member in &found {
            if !member.structural_class.is_user() {
                return Err(MembershipError::UnexpectedPrincipalType {
                    principal: member.login_name(),
                    structural_class: member.structural_class.to_string(),
                });
            }
            if seen.insert(member.sid.to_ascii_uppercase()) {
                members.push(DirectoryUser::from(member));
            }
        }
        members.sort_by(|a, b| a.login.cmp(&b.login));

        log.push(format!(
            "{} members resolved, this took {} seconds.",
            members.len(),
            started.elapsed().as_secs_f64()
        ));
        info!(group = %group.login_name(), members = members.len(), "Resolved directory group");

        Ok(members)
    }
}

/// Account name first, then SID, display name and finally login.
fn group_lookup(account: &Identity) -> GroupLookup<'_> {
    if !account.account_name().is_empty() {
        GroupLookup::SamAccountName(account.account_name())
    } else if let Some(sid) = account.sid().filter(|s| !s.is_empty()) {
        GroupLookup::Sid(sid)
    } else if !account.display_name().is_empty() {
        GroupLookup::DisplayName(account.display_name())
    } else {
        GroupLookup::LoginName(account.login_name())
    }
}

fn sanitize_display_name(name: Option<&str>) -> String {
    name.unwrap_or_default()
        .chars()
        .filter(|c| u32::from(*c) >= 0x20)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_display_name() {
        assert_eq!(sanitize_display_name(Some("Alice\u{7}\tExample\n")), "AliceExample");
        assert_eq!(sanitize_display_name(Some("Zoë Ünal")), "Zoë Ünal");
        assert_eq!(sanitize_display_name(None), "");
    }
}
