//! Transitive directory group membership of a user.

use std::collections::HashSet;

use tracing::{debug, instrument};

use crate::error::{MembershipError, MembershipResult};
use crate::identity::{strip_claims_prefix, Identity, IdentityResolver};
use crate::sid::Sid;

/// Attribute carrying the flattened group SIDs of a user.
pub const TOKEN_GROUPS_ATTRIBUTE: &str = "tokenGroups";

/// Reads a user's flattened group membership in one directory round trip.
#[derive(Clone)]
pub struct DirectoryMembershipResolver {
    identities: IdentityResolver,
}

impl DirectoryMembershipResolver {
    pub fn new(identities: IdentityResolver) -> Self {
        Self { identities }
    }

    /// All directory groups `login` belongs to, directly or through nesting.
    ///
    /// Groups come back in first-seen order with duplicate SIDs removed. Any
    /// failure aborts the whole call.
    #[instrument(skip(self))]
    pub async fn user_groups(&self, login: &str) -> MembershipResult<Vec<Identity>> {
        let login = strip_claims_prefix(login.trim()).trim();
        if login.is_empty() {
            return Err(MembershipError::invalid_argument(
                "login",
                "login must not be blank",
            ));
        }

        let directory = self.identities.directory();

        let principal = directory
            .bind_user(login)
            .await?
            .ok_or_else(|| MembershipError::not_found(login))?;

        if !principal.structural_class.is_user() {
            return Err(MembershipError::invalid_argument(
                "login",
                format!(
                    "'{login}' is not a user account (structural class '{}')",
                    principal.structural_class
                ),
            ));
        }

        let raw_sids = directory
            .flattened_group_sids(&principal)
            .await?
            .ok_or_else(|| MembershipError::AccessDenied {
                principal: principal.login_name(),
                attribute: TOKEN_GROUPS_ATTRIBUTE.to_string(),
            })?;

        let mut seen = HashSet::new();
        let mut sids = Vec::with_capacity(raw_sids.len());
        for bytes in &raw_sids {
            let sid = Sid::from_bytes(bytes)?.to_string();
            if seen.insert(sid.clone()) {
                sids.push(sid);
            }
        }

        debug!(
            login = %login,
            raw = raw_sids.len(),
            distinct = sids.len(),
            "Read flattened group membership"
        );

        let mut groups = Vec::with_capacity(sids.len());
        for sid in &sids {
            groups.push(self.identities.parse_login(sid).await?);
        }
        Ok(groups)
    }
}
