//! Common test utilities for membership-core integration tests.
//!
//! Provides a scripted in-memory directory with call counters, a local store
//! definition modelled on a small corporate domain, and logging setup.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use membership_core::{
    DirectoryClient, DirectoryPrincipal, GroupLookup, InMemoryLocalStore, LocalPrincipal,
    LocalStore, MembershipError, MembershipResult, Sid, StructuralClass,
};

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

pub const DOMAIN_SID: &str = "S-1-5-21-1-2-3";
pub const ALICE_SID: &str = "S-1-5-21-1-2-3-1104";
pub const BOB_SID: &str = "S-1-5-21-1-2-3-1105";
pub const CAROL_SID: &str = "S-1-5-21-1-2-3-1106";
pub const DOMAIN_USERS_SID: &str = "S-1-5-21-1-2-3-513";
pub const EDITORS_SID: &str = "S-1-5-21-1-2-3-2001";
pub const READERS_SID: &str = "S-1-5-21-1-2-3-2002";
pub const MIXED_SID: &str = "S-1-5-21-1-2-3-2003";
pub const UNKNOWN_SID: &str = "S-1-5-21-1-2-3-500";
pub const SALES_SID: &str = "S-1-5-21-1-2-3-2004";

/// Binary form of a textual SID.
pub fn sid_bytes(sid: &str) -> Vec<u8> {
    sid.parse::<Sid>().unwrap().to_bytes()
}

pub fn principal(
    sam: &str,
    sid: &str,
    display_name: Option<&str>,
    structural_class: StructuralClass,
) -> DirectoryPrincipal {
    DirectoryPrincipal {
        distinguished_name: format!("CN={sam},OU=Accounts,DC=corp,DC=example,DC=com"),
        sid: sid.to_string(),
        sam_account_name: sam.to_string(),
        display_name: display_name.map(str::to_string),
        email: None,
        domain: "CORP".to_string(),
        structural_class,
    }
}

pub fn user(sam: &str, sid: &str, display_name: &str) -> DirectoryPrincipal {
    principal(sam, sid, Some(display_name), StructuralClass::User)
}

pub fn group(sam: &str, sid: &str) -> DirectoryPrincipal {
    principal(sam, sid, Some(sam), StructuralClass::Group)
}

/// Scripted directory with call counters.
#[derive(Default)]
pub struct MockDirectory {
    users: HashMap<String, DirectoryPrincipal>,
    token_groups: HashMap<String, Option<Vec<Vec<u8>>>>,
    groups: Vec<DirectoryPrincipal>,
    members: HashMap<String, Vec<DirectoryPrincipal>>,
    sid_names: HashMap<String, String>,
    unavailable: AtomicBool,
    lookups: Mutex<Vec<String>>,
    pub bind_calls: AtomicUsize,
    pub token_group_calls: AtomicUsize,
    pub find_group_calls: AtomicUsize,
    pub member_calls: AtomicUsize,
    pub reverse_calls: AtomicUsize,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The CORP domain: alice is in GG-Editors (listed twice) and Domain
    /// Users, bob only in Domain Users, carol's groups are not readable.
    pub fn corp() -> Self {
        Self::new()
            .with_user(
                user("alice", ALICE_SID, "Alice\u{1}Example"),
                Some(vec![
                    sid_bytes(DOMAIN_USERS_SID),
                    sid_bytes(EDITORS_SID),
                    sid_bytes(EDITORS_SID),
                ]),
            )
            .with_user(
                user("bob", BOB_SID, "Bob Builder"),
                Some(vec![sid_bytes(DOMAIN_USERS_SID)]),
            )
            .with_user(user("carol", CAROL_SID, "Carol"), None)
            .with_user(
                principal("WS01$", "S-1-5-21-1-2-3-3001", None, StructuralClass::Computer),
                Some(Vec::new()),
            )
            .with_group(
                group("GG-Editors", EDITORS_SID),
                vec![
                    user("bob", BOB_SID, "Bob Builder"),
                    user("alice", ALICE_SID, "Alice\u{1}Example"),
                    user("alice", ALICE_SID, "Alice\u{1}Example"),
                ],
            )
            .with_group(group("GG-Readers", READERS_SID), Vec::new())
            .with_group(
                group("GG-Mixed", MIXED_SID),
                vec![
                    user("alice", ALICE_SID, "Alice Example"),
                    principal("WS01$", "S-1-5-21-1-2-3-3001", None, StructuralClass::Computer),
                ],
            )
            .with_sid_name(ALICE_SID, "CORP\\alice")
            .with_sid_name(BOB_SID, "CORP\\bob")
            .with_sid_name(DOMAIN_USERS_SID, "CORP\\Domain Users")
            .with_sid_name(EDITORS_SID, "CORP\\GG-Editors")
            .with_sid_name(READERS_SID, "CORP\\GG-Readers")
    }

    pub fn with_user(mut self, user: DirectoryPrincipal, groups: Option<Vec<Vec<u8>>>) -> Self {
        self.token_groups.insert(user.sid.clone(), groups);
        self.users.insert(user.login_name().to_lowercase(), user);
        self
    }

    pub fn with_group(mut self, group: DirectoryPrincipal, members: Vec<DirectoryPrincipal>) -> Self {
        self.members.insert(group.sid.clone(), members);
        self.groups.push(group);
        self
    }

    pub fn with_sid_name(mut self, sid: &str, name: &str) -> Self {
        self.sid_names.insert(sid.to_ascii_uppercase(), name.to_string());
        self
    }

    /// Make every subsequent call fail as if the directory were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Identifying fields used by `find_group`, in call order.
    pub fn group_lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> MembershipResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MembershipError::directory_unavailable_with_source(
                "search failed",
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryClient for MockDirectory {
    async fn bind_user(&self, login: &str) -> MembershipResult<Option<DirectoryPrincipal>> {
        self.bind_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let key = login.to_lowercase();
        let key = if key.contains('\\') {
            key
        } else {
            format!("corp\\{key}")
        };
        Ok(self.users.get(&key).cloned())
    }

    async fn flattened_group_sids(
        &self,
        principal: &DirectoryPrincipal,
    ) -> MembershipResult<Option<Vec<Vec<u8>>>> {
        self.token_group_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.token_groups.get(&principal.sid).cloned().flatten())
    }

    async fn find_group(
        &self,
        _domain: &str,
        lookup: GroupLookup<'_>,
    ) -> MembershipResult<Option<DirectoryPrincipal>> {
        self.find_group_calls.fetch_add(1, Ordering::SeqCst);
        self.lookups
            .lock()
            .unwrap()
            .push(lookup.field_name().to_string());
        self.check_available()?;
        let value = lookup.value();
        Ok(self
            .groups
            .iter()
            .find(|g| match lookup {
                GroupLookup::SamAccountName(_) => g.sam_account_name.eq_ignore_ascii_case(value),
                GroupLookup::Sid(_) => g.sid.eq_ignore_ascii_case(value),
                GroupLookup::DisplayName(_) => g
                    .display_name
                    .as_deref()
                    .is_some_and(|d| d.eq_ignore_ascii_case(value)),
                GroupLookup::LoginName(_) => g.login_name().eq_ignore_ascii_case(value),
            })
            .cloned())
    }

    async fn group_members(
        &self,
        group: &DirectoryPrincipal,
        recursive: bool,
    ) -> MembershipResult<Vec<DirectoryPrincipal>> {
        assert!(recursive, "group members are always read recursively");
        self.member_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.members.get(&group.sid).cloned().unwrap_or_default())
    }

    async fn reverse_resolve_sid(&self, sid: &str) -> MembershipResult<Option<String>> {
        self.reverse_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.sid_names.get(&sid.to_ascii_uppercase()).cloned())
    }
}

/// Local store definition: Editors holds bob and the GG-Editors directory
/// group, Visitors holds everyone, Owners only bob, Readers only GG-Readers.
pub const LOCAL_STORE_JSON: &str = r#"{
    "principals": [
        {"id": 1, "login_name": "i:0#.w|corp\\bob", "display_name": "Bob Builder",
         "email": "bob@corp.example.com", "sid": "S-1-5-21-1-2-3-1105"},
        {"id": 2, "login_name": "c:0+.w|s-1-5-21-1-2-3-2001", "display_name": "CORP\\GG-Editors",
         "sid": "S-1-5-21-1-2-3-2001", "is_directory_group": true},
        {"id": 3, "login_name": "c:0(.s|true", "display_name": "Everyone"},
        {"id": 4, "login_name": "c:0+.w|s-1-5-21-1-2-3-2002", "display_name": "CORP\\GG-Readers",
         "sid": "S-1-5-21-1-2-3-2002", "is_directory_group": true},
        {"id": 5, "login_name": "c:0+.w|s-1-5-21-1-2-3-2003", "display_name": "CORP\\GG-Mixed",
         "sid": "S-1-5-21-1-2-3-2003", "is_directory_group": true}
    ],
    "groups": [
        {"name": "Editors", "members": ["i:0#.w|corp\\bob", "c:0+.w|s-1-5-21-1-2-3-2001"]},
        {"name": "Visitors", "members": ["c:0(.s|true"]},
        {"name": "Owners", "members": ["i:0#.w|corp\\bob"]},
        {"name": "Readers", "members": ["c:0+.w|s-1-5-21-1-2-3-2002"]}
    ]
}"#;

/// Local store wrapper counting calls and able to fail on demand.
pub struct CountingLocalStore {
    inner: InMemoryLocalStore,
    unavailable: AtomicBool,
    pub list_calls: AtomicUsize,
    pub member_calls: AtomicUsize,
    pub ensure_calls: AtomicUsize,
}

impl CountingLocalStore {
    pub fn corp() -> Self {
        Self::wrap(InMemoryLocalStore::from_json(LOCAL_STORE_JSON).unwrap())
    }

    /// The CORP store, registering unknown directory groups found in `directory`.
    pub fn corp_with_directory(directory: Arc<MockDirectory>) -> Self {
        Self::wrap(
            InMemoryLocalStore::from_json(LOCAL_STORE_JSON)
                .unwrap()
                .with_directory(directory),
        )
    }

    fn wrap(inner: InMemoryLocalStore) -> Self {
        Self {
            inner,
            unavailable: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            member_calls: AtomicUsize::new(0),
            ensure_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> MembershipResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MembershipError::directory_unavailable("local store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStore for CountingLocalStore {
    async fn list_group_names(&self) -> MembershipResult<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.inner.list_group_names().await
    }

    async fn group_members(&self, group_name: &str) -> MembershipResult<Vec<LocalPrincipal>> {
        self.member_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.inner.group_members(group_name).await
    }

    async fn ensure_user(&self, login: &str) -> MembershipResult<LocalPrincipal> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.inner.ensure_user(login).await
    }
}

/// Directory and store for the CORP fixture, shared as trait objects.
pub fn corp_fixture() -> (Arc<MockDirectory>, Arc<CountingLocalStore>) {
    init_test_logging();
    (
        Arc::new(MockDirectory::corp()),
        Arc::new(CountingLocalStore::corp()),
    )
}
