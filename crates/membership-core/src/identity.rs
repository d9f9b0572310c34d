//! Canonical account model.
//!
//! A principal can reach the service as a claims-encoded login, as
//! `DOMAIN\account`, as a SID or as a display name. [`Identity`] normalizes all
//! of these, and [`Identity::matches`] compares two identities that may have
//! been populated from different sources.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MembershipError, MembershipResult};
use crate::sid::is_sid;
use crate::sid_cache::SidCache;
use crate::traits::{DirectoryClient, LocalPrincipal};

/// Claim token standing for every principal, authenticated or not.
pub const CLAIM_EVERYONE: &str = "c:0(.s|true";

/// Claim token standing for every authenticated Windows principal.
pub const CLAIM_ALL_AUTHENTICATED_USERS: &str = "c:0!.s|windows";

/// Which kind of principal an identity denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    Everyone,
    AllAuthenticatedUsers,
    Regular,
}

impl PrincipalKind {
    fn from_claim(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case(CLAIM_EVERYONE) {
            Some(Self::Everyone)
        } else if raw.eq_ignore_ascii_case(CLAIM_ALL_AUTHENTICATED_USERS) {
            Some(Self::AllAuthenticatedUsers)
        } else {
            None
        }
    }
}

/// Canonical, immutable representation of a principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    kind: PrincipalKind,
    user_id: Option<i64>,
    domain: String,
    account_name: String,
    display_name: String,
    email: String,
    sid: Option<String>,
    login_name: String,
}

impl Identity {
    fn pseudo(kind: PrincipalKind, user_id: Option<i64>) -> Self {
        Self {
            kind,
            user_id,
            domain: String::new(),
            account_name: String::new(),
            display_name: String::new(),
            email: String::new(),
            sid: None,
            login_name: String::new(),
        }
    }

    /// Build an identity from an already-normalized login without any
    /// directory lookups. The login is split into domain and account name.
    fn from_normalized_login(login: String, sid: Option<String>) -> Self {
        let (domain, account_name) = match split_domain(&login) {
            Some((domain, account)) => (domain.to_string(), account.to_string()),
            None => (String::new(), login.clone()),
        };
        Self {
            kind: PrincipalKind::Regular,
            user_id: None,
            domain,
            account_name,
            display_name: login.clone(),
            email: String::new(),
            sid,
            login_name: login,
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        self.kind
    }

    pub fn is_everyone(&self) -> bool {
        self.kind == PrincipalKind::Everyone
    }

    pub fn is_all_authenticated_users(&self) -> bool {
        self.kind == PrincipalKind::AllAuthenticatedUsers
    }

    /// Either of the two pseudo-principals.
    pub fn is_pseudo(&self) -> bool {
        self.kind != PrincipalKind::Regular
    }

    /// Local store id, when the identity came from the local store.
    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    /// Login without any claims prefix.
    pub fn login_name(&self) -> &str {
        &self.login_name
    }

    /// Loose equivalence across representations.
    ///
    /// Two regular identities match when any non-empty pair of login name,
    /// account name, SID or display name is equal ignoring case. Two
    /// pseudo-principals match when they are of the same kind. The relation
    /// is not transitive.
    #[must_use]
    pub fn matches(&self, other: &Identity) -> bool {
        if self.is_pseudo() || other.is_pseudo() {
            return self.kind == other.kind;
        }
        field_matches(&self.login_name, &other.login_name)
            || field_matches(&self.account_name, &other.account_name)
            || field_matches(self.sid().unwrap_or(""), other.sid().unwrap_or(""))
            || field_matches(&self.display_name, &other.display_name)
    }

    /// Sum of the hashes of the lower-cased identifying fields.
    ///
    /// Empty fields contribute nothing. Not suitable as a hash-map key for
    /// [`Identity::matches`], which relates identities sharing a single field.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        [
            self.login_name.as_str(),
            self.account_name.as_str(),
            self.sid().unwrap_or(""),
            self.display_name.as_str(),
        ]
        .iter()
        .filter(|field| !field.is_empty())
        .map(|field| {
            let mut hasher = DefaultHasher::new();
            field.to_lowercase().hash(&mut hasher);
            hasher.finish()
        })
        .fold(0u64, u64::wrapping_add)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PrincipalKind::Everyone => f.write_str(CLAIM_EVERYONE),
            PrincipalKind::AllAuthenticatedUsers => f.write_str(CLAIM_ALL_AUTHENTICATED_USERS),
            PrincipalKind::Regular => f.write_str(&self.login_name),
        }
    }
}

/// Builds identities, resolving SIDs through the shared cache.
#[derive(Clone)]
pub struct IdentityResolver {
    directory: Arc<dyn DirectoryClient>,
    sid_cache: Arc<SidCache>,
}

impl IdentityResolver {
    pub fn new(directory: Arc<dyn DirectoryClient>, sid_cache: Arc<SidCache>) -> Self {
        Self {
            directory,
            sid_cache,
        }
    }

    /// The directory used for SID lookups.
    pub fn directory(&self) -> &Arc<dyn DirectoryClient> {
        &self.directory
    }

    /// The shared SID cache.
    pub fn sid_cache(&self) -> &Arc<SidCache> {
        &self.sid_cache
    }

    /// Parse a raw login: claims-encoded, `DOMAIN\account`, SID or bare name.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the login is blank, before or after claims
    /// stripping. SID lookup failures are not errors: the SID is kept as login.
    pub async fn parse_login(&self, raw: &str) -> MembershipResult<Identity> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MembershipError::invalid_argument(
                "login",
                "login must not be blank",
            ));
        }

        if let Some(kind) = PrincipalKind::from_claim(raw) {
            return Ok(Identity::pseudo(kind, None));
        }

        let login = strip_claims_prefix(raw).trim();
        if login.is_empty() {
            return Err(MembershipError::invalid_argument(
                "login",
                format!("'{raw}' carries no account after the claims prefix"),
            ));
        }

        if is_sid(login) {
            let resolved = self.resolve_sid_lenient(login).await;
            return Ok(Identity::from_normalized_login(
                resolved,
                Some(login.to_string()),
            ));
        }

        Ok(Identity::from_normalized_login(login.to_string(), None))
    }

    /// Build an identity from a principal the local store already knows.
    ///
    /// Id, SID, e-mail and display name are taken over as they are. When the
    /// login does not yield a domain, the display name is split instead.
    pub async fn from_principal(&self, principal: &LocalPrincipal) -> Identity {
        let raw = principal.login_name.trim();
        if let Some(kind) = PrincipalKind::from_claim(raw) {
            return Identity::pseudo(kind, Some(principal.id));
        }

        let mut sid = principal.sid.clone().filter(|s| !s.trim().is_empty());
        let mut login_name = strip_claims_prefix(raw).trim().to_string();
        let mut domain = String::new();
        let mut account_name = String::new();

        if !is_sid(&login_name) {
            if let Some((d, a)) = split_domain(&login_name) {
                domain = d.to_string();
                account_name = a.to_string();
            }
        } else if sid.is_none() {
            let resolved = self.resolve_sid_lenient(&login_name).await;
            sid = Some(std::mem::replace(&mut login_name, resolved));
        }

        if domain.is_empty() {
            if let Some((d, a)) = split_domain(&principal.display_name) {
                domain = d.to_string();
                account_name = a.to_string();
            }
        }

        Identity {
            kind: PrincipalKind::Regular,
            user_id: Some(principal.id),
            domain,
            account_name,
            display_name: principal.display_name.clone(),
            email: principal.email.clone(),
            sid,
            login_name,
        }
    }

    async fn resolve_sid_lenient(&self, sid: &str) -> String {
        match self.sid_cache.resolve(sid, self.directory.as_ref()).await {
            Ok(name) => name,
            Err(e) => {
                warn!(sid = %sid, error = %e, "SID lookup failed, keeping SID as login");
                sid.to_string()
            }
        }
    }
}

/// Remove a claims-encoding prefix: everything up to and including the last `|`.
#[must_use]
pub fn strip_claims_prefix(login: &str) -> &str {
    match login.rsplit_once('|') {
        Some((_, rest)) => rest,
        None => login,
    }
}

/// Whether a raw login is one of the two pseudo-principal claim tokens.
#[must_use]
pub fn is_pseudo_claim(raw: &str) -> bool {
    PrincipalKind::from_claim(raw.trim()).is_some()
}

/// Whether a login carries a claims-encoding prefix.
#[must_use]
pub fn is_claims_login(login: &str) -> bool {
    login.contains('|')
}

/// Split `DOMAIN\account`. Anything other than exactly one separator yields `None`.
#[must_use]
pub fn split_domain(login: &str) -> Option<(&str, &str)> {
    let (domain, account) = login.split_once('\\')?;
    if account.contains('\\') {
        return None;
    }
    Some((domain, account))
}

fn field_matches(a: &str, b: &str) -> bool {
    !a.is_empty()
        && a.chars()
            .flat_map(char::to_lowercase)
            .eq(b.chars().flat_map(char::to_lowercase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{DirectoryPrincipal, GroupLookup};
    use async_trait::async_trait;

    /// Directory that knows a single SID.
    struct OneSidDirectory;

    #[async_trait]
    impl DirectoryClient for OneSidDirectory {
        async fn bind_user(&self, _login: &str) -> MembershipResult<Option<DirectoryPrincipal>> {
            Ok(None)
        }

        async fn flattened_group_sids(
            &self,
            _principal: &DirectoryPrincipal,
        ) -> MembershipResult<Option<Vec<Vec<u8>>>> {
            Ok(None)
        }

        async fn find_group(
            &self,
            _domain: &str,
            _lookup: GroupLookup<'_>,
        ) -> MembershipResult<Option<DirectoryPrincipal>> {
            Ok(None)
        }

        async fn group_members(
            &self,
            _group: &DirectoryPrincipal,
            _recursive: bool,
        ) -> MembershipResult<Vec<DirectoryPrincipal>> {
            Ok(Vec::new())
        }

        async fn reverse_resolve_sid(&self, sid: &str) -> MembershipResult<Option<String>> {
            match sid {
                "S-1-5-21-1-2-3-1104" => Ok(Some("CORP\\alice".to_string())),
                "S-1-5-21-1-2-3-9999" => Err(MembershipError::directory_unavailable("offline")),
                _ => Ok(None),
            }
        }
    }

    fn resolver() -> IdentityResolver {
        IdentityResolver::new(Arc::new(OneSidDirectory), Arc::new(SidCache::new()))
    }

    fn principal(login: &str, display: &str) -> LocalPrincipal {
        LocalPrincipal {
            id: 12,
            login_name: login.to_string(),
            display_name: display.to_string(),
            email: "someone@corp.example.com".to_string(),
            sid: None,
            is_directory_group: false,
        }
    }

    #[test]
    fn test_strip_claims_prefix() {
        assert_eq!(strip_claims_prefix("i:0#.w|CORP\\alice"), "CORP\\alice");
        assert_eq!(strip_claims_prefix("c:0+.w|s-1-5-21-1-2-3-513"), "s-1-5-21-1-2-3-513");
        assert_eq!(strip_claims_prefix("i:0#.f|membership|bob"), "bob");
        assert_eq!(strip_claims_prefix("CORP\\alice"), "CORP\\alice");
        assert!(is_claims_login("i:0#.w|CORP\\alice"));
        assert!(!is_claims_login("CORP\\alice"));
        assert!(is_pseudo_claim(" C:0(.S|TRUE "));
        assert!(!is_pseudo_claim("i:0#.w|true"));
    }

    #[test]
    fn test_split_domain() {
        assert_eq!(split_domain("CORP\\alice"), Some(("CORP", "alice")));
        assert_eq!(split_domain("alice"), None);
        assert_eq!(split_domain("A\\B\\C"), None);
    }

    #[tokio::test]
    async fn test_parse_domain_login() {
        let identity = resolver().parse_login("CORP\\alice").await.unwrap();
        assert_eq!(identity.kind(), PrincipalKind::Regular);
        assert_eq!(identity.domain(), "CORP");
        assert_eq!(identity.account_name(), "alice");
        assert_eq!(identity.display_name(), "CORP\\alice");
        assert_eq!(identity.login_name(), "CORP\\alice");
        assert!(identity.sid().is_none());
        assert!(identity.email().is_empty());
    }

    #[tokio::test]
    async fn test_parse_bare_login() {
        let identity = resolver().parse_login("alice").await.unwrap();
        assert_eq!(identity.domain(), "");
        assert_eq!(identity.account_name(), "alice");
    }

    #[tokio::test]
    async fn test_parse_claims_prefix_is_transparent() {
        let resolver = resolver();
        for login in ["CORP\\alice", "alice", "S-1-5-21-1-2-3-1104"] {
            let plain = resolver.parse_login(login).await.unwrap();
            let claims = resolver
                .parse_login(&format!("i:0#.w|{login}"))
                .await
                .unwrap();
            assert_eq!(plain.login_name(), claims.login_name());
            assert_eq!(plain.account_name(), claims.account_name());
            assert_eq!(plain.sid(), claims.sid());
            assert!(plain.matches(&claims));
        }
    }

    #[tokio::test]
    async fn test_parse_pseudo_principals() {
        let resolver = resolver();
        let everyone = resolver.parse_login(CLAIM_EVERYONE).await.unwrap();
        assert!(everyone.is_everyone());
        assert!(!everyone.is_all_authenticated_users());
        assert!(everyone.login_name().is_empty());
        assert_eq!(everyone.to_string(), CLAIM_EVERYONE);

        let authenticated = resolver
            .parse_login(CLAIM_ALL_AUTHENTICATED_USERS)
            .await
            .unwrap();
        assert!(authenticated.is_all_authenticated_users());
        assert!(!authenticated.matches(&everyone));
        assert!(everyone.matches(&everyone));
    }

    #[tokio::test]
    async fn test_parse_sid_resolves_login() {
        let identity = resolver().parse_login("S-1-5-21-1-2-3-1104").await.unwrap();
        assert_eq!(identity.sid(), Some("S-1-5-21-1-2-3-1104"));
        assert_eq!(identity.login_name(), "CORP\\alice");
        assert_eq!(identity.account_name(), "alice");
    }

    #[tokio::test]
    async fn test_parse_unknown_sid_keeps_sid() {
        let identity = resolver().parse_login("S-1-5-21-1-2-3-500").await.unwrap();
        assert_eq!(identity.login_name(), "S-1-5-21-1-2-3-500");
        assert_eq!(identity.sid(), Some("S-1-5-21-1-2-3-500"));
    }

    #[tokio::test]
    async fn test_parse_sid_lookup_failure_degrades() {
        let identity = resolver().parse_login("S-1-5-21-1-2-3-9999").await.unwrap();
        assert_eq!(identity.login_name(), "S-1-5-21-1-2-3-9999");
    }

    #[tokio::test]
    async fn test_parse_blank_is_invalid() {
        let resolver = resolver();
        for raw in ["", "   ", "i:0#.w|"] {
            let err = resolver.parse_login(raw).await.unwrap_err();
            assert_eq!(err.error_code(), "INVALID_ARGUMENT", "input '{raw}'");
        }
    }

    #[tokio::test]
    async fn test_parse_is_idempotent() {
        let resolver = resolver();
        for raw in ["i:0#.w|CORP\\alice", "S-1-5-21-1-2-3-1104", "bob"] {
            let once = resolver.parse_login(raw).await.unwrap();
            let twice = resolver.parse_login(once.login_name()).await.unwrap();
            assert!(twice.matches(&once));
            assert_eq!(twice.login_name(), once.login_name());
        }
    }

    #[tokio::test]
    async fn test_from_principal_claims_login() {
        let identity = resolver()
            .from_principal(&principal("i:0#.w|corp\\bob", "Bob Builder"))
            .await;
        assert_eq!(identity.user_id(), Some(12));
        assert_eq!(identity.login_name(), "corp\\bob");
        assert_eq!(identity.domain(), "corp");
        assert_eq!(identity.account_name(), "bob");
        assert_eq!(identity.display_name(), "Bob Builder");
        assert_eq!(identity.email(), "someone@corp.example.com");
    }

    #[tokio::test]
    async fn test_from_principal_domain_from_display_name() {
        let identity = resolver()
            .from_principal(&principal("c:0+.w|s-1-5-21-1-2-3-513", "CORP\\domain users"))
            .await;
        assert_eq!(identity.sid(), Some("s-1-5-21-1-2-3-513"));
        assert_eq!(identity.domain(), "CORP");
        assert_eq!(identity.account_name(), "domain users");
    }

    #[tokio::test]
    async fn test_from_principal_keeps_existing_sid() {
        let mut p = principal("S-1-5-21-1-2-3-1104", "Alice");
        p.sid = Some("S-1-5-21-1-2-3-1104".to_string());
        let identity = resolver().from_principal(&p).await;
        // Login stays the SID when the store already supplied one.
        assert_eq!(identity.login_name(), "S-1-5-21-1-2-3-1104");
    }

    #[tokio::test]
    async fn test_from_principal_matches_parsed_login() {
        let resolver = resolver();
        let from_store = resolver
            .from_principal(&principal("i:0#.w|CORP\\alice", "Alice Example"))
            .await;
        let parsed = resolver.parse_login("corp\\ALICE").await.unwrap();
        assert!(from_store.matches(&parsed));
        assert!(parsed.matches(&from_store));
    }

    #[tokio::test]
    async fn test_from_principal_pseudo() {
        let identity = resolver()
            .from_principal(&principal(CLAIM_ALL_AUTHENTICATED_USERS, "All Users"))
            .await;
        assert!(identity.is_all_authenticated_users());
        assert_eq!(identity.user_id(), Some(12));
    }

    #[tokio::test]
    async fn test_matches_single_field() {
        let resolver = resolver();
        let by_sid = resolver.parse_login("S-1-5-21-1-2-3-1104").await.unwrap();
        let mut p = principal("i:0#.w|other\\name", "Someone Else");
        p.sid = Some("s-1-5-21-1-2-3-1104".to_string());
        let from_store = resolver.from_principal(&p).await;

        assert!(by_sid.matches(&from_store));
        assert!(from_store.matches(&by_sid));
    }

    #[tokio::test]
    async fn test_matches_is_not_transitive() {
        let resolver = resolver();
        let mut a = principal("CORP\\a", "Shared Name");
        a.sid = Some("S-1-5-21-1-2-3-1".to_string());
        let mut b = principal("CORP\\b", "Other Name");
        b.sid = Some("S-1-5-21-1-2-3-1".to_string());
        let c = principal("CORP\\c", "Other Name");

        let a = resolver.from_principal(&a).await;
        let b = resolver.from_principal(&b).await;
        let c = resolver.from_principal(&c).await;

        assert!(a.matches(&b));
        assert!(b.matches(&c));
        assert!(!a.matches(&c));
    }

    #[tokio::test]
    async fn test_matches_unicode_case() {
        let resolver = resolver();
        let lower = resolver.parse_login("CORP\\müller").await.unwrap();
        let upper = resolver.parse_login("corp\\MÜLLER").await.unwrap();
        assert!(lower.matches(&upper));
    }

    #[tokio::test]
    async fn test_fingerprint_ignores_case() {
        let resolver = resolver();
        let a = resolver.parse_login("CORP\\Alice").await.unwrap();
        let b = resolver.parse_login("corp\\alice").await.unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let everyone = resolver.parse_login(CLAIM_EVERYONE).await.unwrap();
        assert_eq!(everyone.fingerprint(), 0);
    }
}
