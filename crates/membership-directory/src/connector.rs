//! Active Directory client implementation
//!
//! Implements the `DirectoryClient` capability over LDAP. Transitive group
//! membership is read from the constructed `tokenGroups` attribute, and
//! recursive group members through the in-chain matching rule, so the
//! directory does the graph walking.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry, SearchResult};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use membership_core::{
    split_domain, DirectoryClient, DirectoryPrincipal, GroupLookup, MembershipError,
    MembershipResult, Sid, StructuralClass, TOKEN_GROUPS_ATTRIBUTE,
};

use crate::config::DirectoryConfig;

/// Attributes read for every principal.
const PRINCIPAL_ATTRIBUTES: [&str; 5] = [
    "objectSid",
    "sAMAccountName",
    "displayName",
    "mail",
    "objectClass",
];

/// LDAP_MATCHING_RULE_IN_CHAIN
const MATCHING_RULE_IN_CHAIN: &str = "1.2.840.113556.1.4.1941";

const RC_SUCCESS: u32 = 0;
const RC_INVALID_CREDENTIALS: u32 = 49;
const RC_INSUFFICIENT_ACCESS: u32 = 50;
const RC_NO_SUCH_OBJECT: u32 = 32;

/// Directory client for a single Active Directory domain.
pub struct LdapDirectory {
    /// Configuration.
    config: DirectoryConfig,

    /// Cached LDAP connection (lazily initialized).
    connection: Arc<RwLock<Option<Ldap>>>,
}

impl LdapDirectory {
    /// Create a new client with the given configuration.
    ///
    /// No connection is opened until the first lookup.
    pub fn new(config: DirectoryConfig) -> MembershipResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            connection: Arc::new(RwLock::new(None)),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Get an LDAP connection, creating one if necessary.
    async fn get_connection(&self) -> MembershipResult<Ldap> {
        {
            let conn_guard = self.connection.read().await;
            if let Some(ref conn) = *conn_guard {
                return Ok(conn.clone());
            }
        }

        let conn = self.create_connection().await?;

        {
            let mut conn_guard = self.connection.write().await;
            *conn_guard = Some(conn.clone());
        }

        Ok(conn)
    }

    /// Open and bind a new LDAP connection.
    async fn create_connection(&self) -> MembershipResult<Ldap> {
        let url = self.config.url();

        debug!(url = %url, "Connecting to domain controller");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(self.config.connection_timeout_secs))
            .set_starttls(self.config.use_starttls);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| {
                MembershipError::directory_unavailable_with_source(
                    format!("failed to connect to {url}"),
                    e,
                )
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        let bind_dn = &self.config.bind_dn;
        let bind_password = self.config.bind_password.as_deref().unwrap_or("");

        debug!(bind_dn = %bind_dn, "Performing LDAP bind");

        let result = ldap.simple_bind(bind_dn, bind_password).await.map_err(|e| {
            MembershipError::directory_unavailable_with_source(
                format!("bind failed for {bind_dn}"),
                e,
            )
        })?;

        match result.rc {
            RC_SUCCESS => {}
            RC_INVALID_CREDENTIALS => {
                return Err(MembershipError::directory_unavailable(format!(
                    "authentication failed for {bind_dn}"
                )));
            }
            rc => {
                return Err(MembershipError::directory_unavailable(format!(
                    "bind failed with code {rc}: {}",
                    result.text
                )));
            }
        }

        info!(host = %self.config.host, domain = %self.config.domain, "Directory connection established");

        Ok(ldap)
    }

    /// Drop the cached connection so the next call reconnects.
    async fn reset_connection(&self) {
        self.connection.write().await.take();
    }

    /// Run a search and return its entries.
    ///
    /// `noSuchObject` yields no entries; `insufficientAccessRights` yields
    /// `AccessDenied` so callers can tell it apart from an empty answer.
    async fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> MembershipResult<Vec<SearchEntry>> {
        let mut ldap = self.get_connection().await?;
        if self.config.search_timeout_secs > 0 {
            ldap.with_timeout(Duration::from_secs(self.config.search_timeout_secs));
        }

        let started = Instant::now();
        let outcome = ldap.search(base, scope, filter, attrs.to_vec()).await;
        let elapsed_ms = started.elapsed().as_millis();

        let SearchResult(entries, result) = match outcome {
            Ok(result) => result,
            Err(e) => {
                if matches!(e, LdapError::Timeout { .. }) {
                    warn!(filter = %filter, elapsed_ms, "Directory search timed out");
                } else {
                    self.reset_connection().await;
                }
                return Err(MembershipError::directory_unavailable_with_source(
                    format!("search failed for {filter}"),
                    e,
                ));
            }
        };

        debug!(
            base = %base,
            filter = %filter,
            rc = result.rc,
            entries = entries.len(),
            elapsed_ms,
            "Directory search completed"
        );

        match result.rc {
            RC_SUCCESS => Ok(entries.into_iter().map(SearchEntry::construct).collect()),
            RC_NO_SUCH_OBJECT => Ok(Vec::new()),
            RC_INSUFFICIENT_ACCESS => Err(MembershipError::AccessDenied {
                principal: base.to_string(),
                attribute: attrs.join(","),
            }),
            rc => Err(MembershipError::directory_unavailable(format!(
                "search for {filter} failed with code {rc}: {}",
                result.text
            ))),
        }
    }

    /// Subtree search below the base DN returning the first principal.
    async fn find_principal(&self, filter: &str) -> MembershipResult<Option<DirectoryPrincipal>> {
        let entries = self
            .search(&self.config.base_dn, Scope::Subtree, filter, &PRINCIPAL_ATTRIBUTES)
            .await?;

        if entries.len() > 1 {
            warn!(filter = %filter, matches = entries.len(), "Ambiguous directory lookup, using first match");
        }

        entries
            .first()
            .map(|entry| principal_from_entry(entry, &self.config.domain))
            .transpose()
    }

    /// Verify the domain controller answers a base search on the base DN.
    #[instrument(skip(self))]
    pub async fn test_connection(&self) -> MembershipResult<()> {
        let entries = self
            .search(&self.config.base_dn, Scope::Base, "(objectClass=*)", &["1.1"])
            .await?;

        if entries.is_empty() {
            return Err(MembershipError::directory_unavailable(format!(
                "base DN '{}' not found or not accessible",
                self.config.base_dn
            )));
        }

        info!("Directory connection test successful");
        Ok(())
    }

    /// Unbind and drop the cached connection.
    pub async fn dispose(&self) {
        let mut conn_guard = self.connection.write().await;
        if let Some(mut ldap) = conn_guard.take() {
            if let Err(e) = ldap.unbind().await {
                warn!(error = %e, "Error during LDAP unbind");
            }
        }
    }
}

#[async_trait]
impl DirectoryClient for LdapDirectory {
    #[instrument(skip(self))]
    async fn bind_user(&self, login: &str) -> MembershipResult<Option<DirectoryPrincipal>> {
        if let Some((domain, _)) = split_domain(login) {
            if !domain.eq_ignore_ascii_case(&self.config.domain) {
                debug!(domain = %domain, configured = %self.config.domain, "Login names a different domain");
            }
        }
        self.find_principal(&account_filter(login)).await
    }

    #[instrument(skip(self, principal), fields(dn = %principal.distinguished_name))]
    async fn flattened_group_sids(
        &self,
        principal: &DirectoryPrincipal,
    ) -> MembershipResult<Option<Vec<Vec<u8>>>> {
        // tokenGroups is constructed and only returned by base-scope searches.
        let entries = match self
            .search(
                &principal.distinguished_name,
                Scope::Base,
                "(objectClass=*)",
                &[TOKEN_GROUPS_ATTRIBUTE],
            )
            .await
        {
            Ok(entries) => entries,
            Err(MembershipError::AccessDenied { .. }) => {
                warn!("Reading tokenGroups was denied");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some(entry) = entries.first() else {
            return Ok(None);
        };

        if !has_attribute(entry, TOKEN_GROUPS_ATTRIBUTE) {
            warn!("tokenGroups attribute not returned");
            return Ok(None);
        }

        Ok(Some(binary_values(entry, TOKEN_GROUPS_ATTRIBUTE)))
    }

    #[instrument(skip(self))]
    async fn find_group(
        &self,
        domain: &str,
        lookup: GroupLookup<'_>,
    ) -> MembershipResult<Option<DirectoryPrincipal>> {
        if !domain.is_empty() && !domain.eq_ignore_ascii_case(&self.config.domain) {
            debug!(domain = %domain, configured = %self.config.domain, "Group lookup names a different domain");
        }
        self.find_principal(&group_filter(lookup)).await
    }

    #[instrument(skip(self, group), fields(dn = %group.distinguished_name))]
    async fn group_members(
        &self,
        group: &DirectoryPrincipal,
        recursive: bool,
    ) -> MembershipResult<Vec<DirectoryPrincipal>> {
        let filter = members_filter(&group.distinguished_name, recursive);
        let entries = self
            .search(&self.config.base_dn, Scope::Subtree, &filter, &PRINCIPAL_ATTRIBUTES)
            .await?;

        entries
            .iter()
            .map(|entry| principal_from_entry(entry, &self.config.domain))
            .collect()
    }

    #[instrument(skip(self))]
    async fn reverse_resolve_sid(&self, sid: &str) -> MembershipResult<Option<String>> {
        let principal = self.find_principal(&sid_filter(sid)).await?;
        Ok(principal.map(|p| p.login_name()))
    }
}

impl std::fmt::Debug for LdapDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapDirectory")
            .field("config", &self.config.redacted())
            .finish()
    }
}

/// Escape special characters in LDAP filter values (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\5c"),
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Filter locating the account behind a login.
///
/// `DOMAIN\account` and bare names search `sAMAccountName`, `user@realm`
/// searches `userPrincipalName`.
fn account_filter(login: &str) -> String {
    let login = login.trim();
    match split_domain(login) {
        Some((_, account)) => format!("(sAMAccountName={})", escape_filter_value(account)),
        None if login.contains('@') => {
            format!("(userPrincipalName={})", escape_filter_value(login))
        }
        None => format!("(sAMAccountName={})", escape_filter_value(login)),
    }
}

fn group_filter(lookup: GroupLookup<'_>) -> String {
    let value = escape_filter_value(lookup.value());
    let condition = match lookup {
        GroupLookup::SamAccountName(_) => format!("(sAMAccountName={value})"),
        GroupLookup::Sid(_) => format!("(objectSid={value})"),
        GroupLookup::DisplayName(_) => format!("(|(cn={value})(displayName={value}))"),
        GroupLookup::LoginName(login) => match split_domain(login) {
            Some((_, account)) => {
                format!("(sAMAccountName={})", escape_filter_value(account))
            }
            None => format!("(|(sAMAccountName={value})(cn={value}))"),
        },
    };
    format!("(&(objectClass=group){condition})")
}

fn members_filter(group_dn: &str, recursive: bool) -> String {
    let dn = escape_filter_value(group_dn);
    if recursive {
        format!("(&(memberOf:{MATCHING_RULE_IN_CHAIN}:={dn})(!(objectClass=group)))")
    } else {
        format!("(memberOf={dn})")
    }
}

fn sid_filter(sid: &str) -> String {
    format!("(objectSid={})", escape_filter_value(sid.trim()))
}

fn has_attribute(entry: &SearchEntry, name: &str) -> bool {
    entry.attrs.keys().any(|k| k.eq_ignore_ascii_case(name))
        || entry.bin_attrs.keys().any(|k| k.eq_ignore_ascii_case(name))
}

fn string_values<'a>(entry: &'a SearchEntry, name: &str) -> &'a [String] {
    entry
        .attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_slice())
        .unwrap_or_default()
}

fn first_value(entry: &SearchEntry, name: &str) -> Option<String> {
    string_values(entry, name).first().cloned()
}

/// Values of a binary attribute.
///
/// Values that happen to be valid UTF-8 land in the string map, so both maps
/// are read.
fn binary_values(entry: &SearchEntry, name: &str) -> Vec<Vec<u8>> {
    let binary = entry
        .bin_attrs
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(name))
        .flat_map(|(_, v)| v.iter().cloned());
    let text = string_values(entry, name)
        .iter()
        .map(|s| s.as_bytes().to_vec());
    binary.chain(text).collect()
}

/// NetBIOS label for an entry: `BUILTIN` for the well-known local groups
/// kept under `CN=Builtin`, the configured domain otherwise.
fn domain_label<'a>(dn: &str, domain: &'a str) -> &'a str {
    let builtin = dn
        .split(',')
        .any(|rdn| rdn.trim().eq_ignore_ascii_case("CN=Builtin"));
    if builtin {
        "BUILTIN"
    } else {
        domain
    }
}

fn principal_from_entry(entry: &SearchEntry, domain: &str) -> MembershipResult<DirectoryPrincipal> {
    let sid_bytes = binary_values(entry, "objectSid")
        .into_iter()
        .next()
        .ok_or_else(|| {
            MembershipError::conversion(format!("entry '{}' carries no objectSid", entry.dn))
        })?;
    let sid = Sid::from_bytes(&sid_bytes)?;

    // AD lists objectClass from most general to most specific.
    let structural_class = string_values(entry, "objectClass")
        .last()
        .map(|class| StructuralClass::from_object_class(class))
        .unwrap_or_else(|| StructuralClass::Other(String::new()));

    Ok(DirectoryPrincipal {
        distinguished_name: entry.dn.clone(),
        sid: sid.to_string(),
        sam_account_name: first_value(entry, "sAMAccountName").unwrap_or_default(),
        display_name: first_value(entry, "displayName"),
        email: first_value(entry, "mail"),
        domain: domain_label(&entry.dn, domain).to_string(),
        structural_class,
    })
}
