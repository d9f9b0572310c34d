//! In-memory local group store.
//!
//! Loaded from a JSON definition listing principals and named groups. Logins
//! that are not known yet are registered on first use, so `ensure_user`
//! behaves like a store that creates lightweight records on demand. With a
//! directory attached, a login naming a directory group is registered as
//! that group.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::error::{MembershipError, MembershipResult};
use crate::identity::{is_pseudo_claim, split_domain, strip_claims_prefix};
use crate::sid::is_sid;
use crate::traits::{DirectoryClient, DirectoryPrincipal, GroupLookup, LocalPrincipal, LocalStore};

/// A named local group and the logins of its direct members.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalGroupDefinition {
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Serialized contents of an [`InMemoryLocalStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStoreDefinition {
    #[serde(default)]
    pub principals: Vec<LocalPrincipal>,
    #[serde(default)]
    pub groups: Vec<LocalGroupDefinition>,
}

#[derive(Debug, Default)]
struct StoreState {
    principals: Vec<LocalPrincipal>,
    by_login: HashMap<String, usize>,
    groups: Vec<(String, Vec<usize>)>,
}

impl StoreState {
    fn insert_principal(&mut self, principal: LocalPrincipal) -> MembershipResult<usize> {
        let key = login_key(&principal.login_name);
        if key.is_empty() {
            return Err(MembershipError::InvalidConfiguration {
                message: format!("principal {} has a blank login", principal.id),
            });
        }
        if self.by_login.contains_key(&key) {
            return Err(MembershipError::InvalidConfiguration {
                message: format!("login '{}' is defined more than once", principal.login_name),
            });
        }
        let index = self.principals.len();
        self.principals.push(principal);
        self.by_login.insert(key, index);
        Ok(index)
    }

    /// Index of the principal behind `login`: by login first, then by
    /// display name.
    fn find(&self, login: &str) -> Option<usize> {
        let key = login_key(login);
        self.by_login.get(&key).copied().or_else(|| {
            let name = login.trim().to_lowercase();
            self.principals
                .iter()
                .position(|p| !p.display_name.is_empty() && p.display_name.to_lowercase() == name)
        })
    }

    fn group(&self, name: &str) -> Option<&[usize]> {
        self.groups
            .iter()
            .find(|(group_name, _)| group_name.eq_ignore_ascii_case(name.trim()))
            .map(|(_, members)| members.as_slice())
    }
}

/// Local store kept entirely in memory.
pub struct InMemoryLocalStore {
    state: RwLock<StoreState>,
    next_id: AtomicI64,
    /// Consulted when registering an unknown login.
    directory: Option<Arc<dyn DirectoryClient>>,
}

impl std::fmt::Debug for InMemoryLocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLocalStore")
            .field("next_id", &self.next_id)
            .field("directory", &self.directory.is_some())
            .finish_non_exhaustive()
    }
}

impl InMemoryLocalStore {
    /// Build a store from a definition.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` for duplicate or blank logins, duplicate group
    /// names, group members that are not defined principals, or an id that
    /// leaves no room for new records.
    pub fn from_definition(definition: LocalStoreDefinition) -> MembershipResult<Self> {
        let mut state = StoreState::default();
        let mut max_id: i64 = 0;

        for principal in definition.principals {
            max_id = max_id.max(principal.id);
            state.insert_principal(principal)?;
        }

        for group in definition.groups {
            if state.group(&group.name).is_some() {
                return Err(MembershipError::InvalidConfiguration {
                    message: format!("group '{}' is defined more than once", group.name),
                });
            }
            let members = group
                .members
                .iter()
                .map(|login| {
                    state.by_login.get(&login_key(login)).copied().ok_or_else(|| {
                        MembershipError::InvalidConfiguration {
                            message: format!(
                                "group '{}' references unknown principal '{login}'",
                                group.name
                            ),
                        }
                    })
                })
                .collect::<MembershipResult<Vec<_>>>()?;
            state.groups.push((group.name, members));
        }

        let next_id = max_id
            .checked_add(1)
            .ok_or_else(|| MembershipError::InvalidConfiguration {
                message: format!("principal id {max_id} leaves no room for new principals"),
            })?;

        info!(
            principals = state.principals.len(),
            groups = state.groups.len(),
            "Loaded local store"
        );

        Ok(Self {
            state: RwLock::new(state),
            next_id: AtomicI64::new(next_id),
            directory: None,
        })
    }

    /// Look unknown logins up as directory groups before registering them.
    #[must_use]
    pub fn with_directory(mut self, directory: Arc<dyn DirectoryClient>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Build a store from JSON text.
    pub fn from_json(json: &str) -> MembershipResult<Self> {
        let definition: LocalStoreDefinition = serde_json::from_str(json).map_err(|e| {
            MembershipError::InvalidConfiguration {
                message: format!("invalid local store definition: {e}"),
            }
        })?;
        Self::from_definition(definition)
    }

    /// Build a store from a JSON definition file.
    pub fn from_path(path: impl AsRef<Path>) -> MembershipResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            MembershipError::InvalidConfiguration {
                message: format!("cannot read local store definition {}: {e}", path.display()),
            }
        })?;
        Self::from_json(&json)
    }

    async fn lookup(&self, login: &str) -> Option<LocalPrincipal> {
        let state = self.state.read().await;
        state
            .find(login)
            .and_then(|index| state.principals.get(index))
            .cloned()
    }

    /// The directory group `login` names, if a directory is attached.
    async fn find_directory_group(
        &self,
        login: &str,
    ) -> MembershipResult<Option<DirectoryPrincipal>> {
        let Some(directory) = &self.directory else {
            return Ok(None);
        };
        if is_pseudo_claim(login) {
            return Ok(None);
        }

        let name = strip_claims_prefix(login.trim()).trim();
        let (domain, lookup) = if is_sid(name) {
            ("", GroupLookup::Sid(name))
        } else {
            match split_domain(name) {
                Some((domain, account)) => (domain, GroupLookup::SamAccountName(account)),
                None => ("", GroupLookup::SamAccountName(name)),
            }
        };
        directory.find_group(domain, lookup).await
    }

    /// Number of principals, including ones registered on demand.
    pub async fn principal_count(&self) -> usize {
        self.state.read().await.principals.len()
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn list_group_names(&self) -> MembershipResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state.groups.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn group_members(&self, group_name: &str) -> MembershipResult<Vec<LocalPrincipal>> {
        let state = self.state.read().await;
        let members = state
            .group(group_name)
            .ok_or_else(|| MembershipError::not_found(group_name))?;
        Ok(members
            .iter()
            .filter_map(|index| state.principals.get(*index).cloned())
            .collect())
    }

    #[instrument(skip(self))]
    async fn ensure_user(&self, login: &str) -> MembershipResult<LocalPrincipal> {
        let key = login_key(login);
        if key.is_empty() {
            return Err(MembershipError::invalid_argument(
                "login",
                "login must not be blank",
            ));
        }

        if let Some(existing) = self.lookup(login).await {
            return Ok(existing);
        }

        let directory_group = self.find_directory_group(login).await?;

        let mut state = self.state.write().await;
        // Another caller may have registered the login in the meantime.
        if let Some(existing) = state.find(login).and_then(|i| state.principals.get(i)) {
            return Ok(existing.clone());
        }

        let login = login.trim();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let principal = match directory_group {
            Some(group) => LocalPrincipal {
                id,
                login_name: login.to_string(),
                display_name: group.login_name(),
                email: group.email.unwrap_or_default(),
                sid: Some(group.sid),
                is_directory_group: true,
            },
            None => LocalPrincipal {
                id,
                login_name: login.to_string(),
                display_name: strip_claims_prefix(login).trim().to_string(),
                email: String::new(),
                sid: None,
                is_directory_group: false,
            },
        };
        state.insert_principal(principal.clone())?;
        debug!(
            id = principal.id,
            login = %principal.login_name,
            directory_group = principal.is_directory_group,
            "Registered principal"
        );
        Ok(principal)
    }
}

/// Case-insensitive lookup key: pseudo claim tokens as they are, everything
/// else without its claims prefix.
fn login_key(login: &str) -> String {
    let login = login.trim();
    if is_pseudo_claim(login) {
        login.to_lowercase()
    } else {
        strip_claims_prefix(login).trim().to_lowercase()
    }
}
