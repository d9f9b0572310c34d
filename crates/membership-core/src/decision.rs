//! Membership decisions across the directory and the local store.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::directory::DirectoryMembershipResolver;
use crate::error::MembershipResult;
use crate::identity::{Identity, IdentityResolver};
use crate::traits::{LocalPrincipal, LocalStore};

/// A direct member of a local group, normalized.
struct LocalMember {
    identity: Identity,
    is_directory_group: bool,
}

/// Answers "is X a member of Y" for directory and local groups.
///
/// Every decision is all-or-nothing: the first collaborator failure is
/// returned and no partial answer is produced.
#[derive(Clone)]
pub struct MembershipEngine {
    identities: IdentityResolver,
    directory_groups: DirectoryMembershipResolver,
    store: Arc<dyn LocalStore>,
}

impl MembershipEngine {
    pub fn new(identities: IdentityResolver, store: Arc<dyn LocalStore>) -> Self {
        Self {
            directory_groups: DirectoryMembershipResolver::new(identities.clone()),
            identities,
            store,
        }
    }

    /// The resolver used for transitive directory lookups.
    pub fn directory_groups(&self) -> &DirectoryMembershipResolver {
        &self.directory_groups
    }

    /// Whether `candidate_login` is a transitive member of the directory group
    /// `group_ref`. A pseudo-principal group admits every candidate.
    #[instrument(skip(self))]
    pub async fn is_member_of_directory_group(
        &self,
        candidate_login: &str,
        group_ref: &str,
    ) -> MembershipResult<bool> {
        let group = self.identities.parse_login(group_ref).await?;
        if group.is_pseudo() {
            debug!(kind = ?group.kind(), "Pseudo-principal group admits everyone");
            return Ok(true);
        }

        let groups = self.directory_groups.user_groups(candidate_login).await?;
        Ok(groups.iter().any(|g| g.matches(&group)))
    }

    /// Whether `candidate_login` belongs to the local group `group_name`,
    /// directly, through a pseudo-principal member, or through a directory
    /// group member.
    #[instrument(skip(self))]
    pub async fn is_member_of_local_group(
        &self,
        candidate_login: &str,
        group_name: &str,
    ) -> MembershipResult<bool> {
        let members = self.local_members(group_name).await?;
        debug!(
            group = %group_name,
            members = ?members.iter().map(|m| m.identity.display_name()).collect::<Vec<_>>(),
            "Read local group members"
        );

        if members.iter().any(|m| m.identity.is_pseudo()) {
            return Ok(true);
        }

        let candidate = self.ensure_candidate(candidate_login).await?;
        if members.iter().any(|m| m.identity.matches(&candidate)) {
            return Ok(true);
        }

        if !members.iter().any(|m| m.is_directory_group) {
            return Ok(false);
        }

        let groups = self
            .directory_groups
            .user_groups(candidate.login_name())
            .await?;
        Ok(admits_through_directory_group(&members, &groups))
    }

    /// Names of every local group `candidate_login` belongs to.
    ///
    /// The candidate's directory groups are read at most once, and only when
    /// some group that does not already admit the candidate holds a directory
    /// group member.
    #[instrument(skip(self))]
    pub async fn local_groups_of_user(&self, candidate_login: &str) -> MembershipResult<Vec<String>> {
        let candidate = self.ensure_candidate(candidate_login).await?;
        let mut transitive: Option<Vec<Identity>> = None;
        let mut names = Vec::new();

        for group_name in self.store.list_group_names().await? {
            let members = self.local_members(&group_name).await?;

            let direct = members
                .iter()
                .any(|m| m.identity.is_pseudo() || m.identity.matches(&candidate));
            if direct {
                names.push(group_name);
                continue;
            }

            if !members.iter().any(|m| m.is_directory_group) {
                continue;
            }

            if transitive.is_none() {
                transitive = Some(
                    self.directory_groups
                        .user_groups(candidate.login_name())
                        .await?,
                );
            }
            let groups = transitive.as_deref().unwrap_or(&[]);
            if admits_through_directory_group(&members, groups) {
                names.push(group_name);
            }
        }

        debug!(candidate = %candidate, groups = names.len(), "Collected local groups of user");
        Ok(names)
    }

    async fn ensure_candidate(&self, login: &str) -> MembershipResult<Identity> {
        let principal = self.store.ensure_user(login).await?;
        Ok(self.identities.from_principal(&principal).await)
    }

    async fn local_members(&self, group_name: &str) -> MembershipResult<Vec<LocalMember>> {
        let principals: Vec<LocalPrincipal> = self.store.group_members(group_name).await?;
        let mut members = Vec::with_capacity(principals.len());
        for principal in &principals {
            members.push(LocalMember {
                identity: self.identities.from_principal(principal).await,
                is_directory_group: principal.is_directory_group,
            });
        }
        Ok(members)
    }
}

fn admits_through_directory_group(members: &[LocalMember], groups: &[Identity]) -> bool {
    members
        .iter()
        .filter(|m| m.is_directory_group)
        .any(|m| groups.iter().any(|g| g.matches(&m.identity)))
}
