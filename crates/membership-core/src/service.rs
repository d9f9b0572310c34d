//! Caller-facing membership service.
//!
//! Every operation validates its parameters, runs the corresponding decision
//! or lookup, and folds the outcome into a [`ResultEnvelope`]. Nothing here
//! returns `Err`.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::decision::MembershipEngine;
use crate::envelope::ResultEnvelope;
use crate::error::{MembershipError, MembershipResult};
use crate::group::{DirectoryGroupMembership, GroupResolver};
use crate::identity::IdentityResolver;
use crate::sid_cache::SidCache;
use crate::traits::{DirectoryClient, LocalStore};

/// Facade over the identity layer, the decision engine and the group resolver.
#[derive(Clone)]
pub struct MembershipService {
    identities: IdentityResolver,
    engine: MembershipEngine,
    groups: GroupResolver,
    store: Arc<dyn LocalStore>,
}

impl MembershipService {
    /// Wire the service from its collaborators and a shared SID cache.
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        store: Arc<dyn LocalStore>,
        sid_cache: Arc<SidCache>,
    ) -> Self {
        let identities = IdentityResolver::new(directory.clone(), sid_cache);
        Self {
            engine: MembershipEngine::new(identities.clone(), store.clone()),
            groups: GroupResolver::new(directory),
            identities,
            store,
        }
    }

    /// Names of all local groups.
    #[instrument(skip(self))]
    pub async fn all_local_groups(&self) -> ResultEnvelope<Vec<String>> {
        envelope("all_local_groups", self.store.list_group_names().await)
    }

    /// Whether `login` belongs to the local group `group`.
    #[instrument(skip(self))]
    pub async fn is_user_in_local_group(&self, login: &str, group: &str) -> ResultEnvelope<bool> {
        let result = async {
            ensure_parameter("login", login)?;
            ensure_parameter("group", group)?;
            self.engine.is_member_of_local_group(login, group).await
        }
        .await;
        envelope("is_user_in_local_group", result)
    }

    /// Login names of the direct members of a local group.
    #[instrument(skip(self))]
    pub async fn local_group_members(&self, group: &str) -> ResultEnvelope<Vec<String>> {
        let result = async {
            ensure_parameter("group", group)?;
            let principals = self.store.group_members(group).await?;
            let mut logins = Vec::with_capacity(principals.len());
            for principal in &principals {
                logins.push(self.identities.from_principal(principal).await.to_string());
            }
            Ok::<_, MembershipError>(logins)
        }
        .await;
        envelope("local_group_members", result)
    }

    /// Logins of the user members of a directory group.
    #[instrument(skip(self))]
    pub async fn directory_group_members(&self, group: &str) -> ResultEnvelope<Vec<String>> {
        let resolved = self.resolve_directory_group(group).await;
        match resolved {
            ResultEnvelope {
                success: true,
                result: Some(membership),
                ..
            } => ResultEnvelope::ok(membership.member_logins()),
            ResultEnvelope { error, .. } => ResultEnvelope::failure(
                error.unwrap_or_else(|| format!("'{group}' could not be resolved")),
            ),
        }
    }

    /// Whether `login` is a transitive member of the directory group `group`.
    #[instrument(skip(self))]
    pub async fn is_user_in_directory_group(
        &self,
        login: &str,
        group: &str,
    ) -> ResultEnvelope<bool> {
        let result = async {
            ensure_parameter("login", login)?;
            ensure_parameter("group", group)?;
            self.engine.is_member_of_directory_group(login, group).await
        }
        .await;
        envelope("is_user_in_directory_group", result)
    }

    /// Logins of every directory group `login` belongs to.
    #[instrument(skip(self))]
    pub async fn directory_groups_of_user(&self, login: &str) -> ResultEnvelope<Vec<String>> {
        let result = async {
            ensure_parameter("login", login)?;
            let groups = self.engine.directory_groups().user_groups(login).await?;
            let logins: Vec<String> = groups.iter().map(|g| g.login_name().to_string()).collect();
            Ok::<_, MembershipError>(logins)
        }
        .await;
        envelope("directory_groups_of_user", result)
    }

    /// Names of every local group `login` belongs to.
    #[instrument(skip(self))]
    pub async fn local_groups_of_user(&self, login: &str) -> ResultEnvelope<Vec<String>> {
        let result = async {
            ensure_parameter("login", login)?;
            self.engine.local_groups_of_user(login).await
        }
        .await;
        envelope("local_groups_of_user", result)
    }

    /// Resolve a directory group known to the local store to its members.
    ///
    /// A resolution that recorded error text is reported as a failure with
    /// the partial membership attached.
    #[instrument(skip(self))]
    pub async fn resolve_directory_group(
        &self,
        group: &str,
    ) -> ResultEnvelope<Option<DirectoryGroupMembership>> {
        let result = async {
            ensure_parameter("group", group)?;
            let principal = self.store.ensure_user(group).await?;
            if !principal.is_directory_group {
                return Err(MembershipError::invalid_argument(
                    "group",
                    format!("'{group}' is not the name of a directory group"),
                ));
            }
            let account = self.identities.from_principal(&principal).await;
            Ok::<_, MembershipError>(self.groups.resolve_group(&account).await)
        }
        .await;

        match result {
            Ok(membership) => match membership.error().map(str::to_string) {
                Some(error) => {
                    warn!(group = %group, error = %error, "Directory group resolved with errors");
                    ResultEnvelope::failure_with_result(Some(membership), error)
                }
                None => {
                    info!(
                        group = %group,
                        members = membership.member_count(),
                        "Resolved directory group"
                    );
                    ResultEnvelope::ok(Some(membership))
                }
            },
            Err(e) => envelope("resolve_directory_group", Err(e)),
        }
    }
}

/// Reject blank parameters with a "parameter '<name>' missing" error.
pub fn ensure_parameter(name: &str, value: &str) -> MembershipResult<()> {
    if value.trim().is_empty() {
        return Err(MembershipError::missing_parameter(name));
    }
    Ok(())
}

fn envelope<T: Default>(operation: &str, result: MembershipResult<T>) -> ResultEnvelope<T> {
    if let Err(e) = &result {
        warn!(
            operation = operation,
            error = %e,
            error_code = e.error_code(),
            transient = e.is_transient(),
            "Membership operation failed"
        );
    }
    ResultEnvelope::from_result(result)
}
