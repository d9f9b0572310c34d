//! Membership resolution across a directory service and a local group store.
//!
//! Answers "is identity X a member of group Y?" when X may arrive as a
//! claims-encoded login, a `DOMAIN\account` pair, a SID or a display name,
//! and Y may be a directory group or a local group that itself contains
//! directory groups.
//!
//! # Layers
//!
//! - [`identity`]: normalization and loose equivalence of principals
//! - [`sid`] / [`sid_cache`]: SID codec and the process-wide SID cache
//! - [`directory`]: transitive directory membership of a user
//! - [`group`]: expansion of a directory group to its users
//! - [`decision`]: membership decisions over both universes
//! - [`service`]: caller-facing operations returning [`ResultEnvelope`]s
//!
//! Collaborators are injected through the [`DirectoryClient`] and
//! [`LocalStore`] traits.

pub mod decision;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod group;
pub mod identity;
pub mod service;
pub mod sid;
pub mod sid_cache;
pub mod store;
pub mod traits;

pub use decision::MembershipEngine;
pub use directory::{DirectoryMembershipResolver, TOKEN_GROUPS_ATTRIBUTE};
pub use envelope::{ResultEnvelope, ERROR_DELIMITER};
pub use error::{error_chain, MembershipError, MembershipResult};
pub use group::{DirectoryGroupMembership, DirectoryUser, GroupResolver};
pub use identity::{
    is_claims_login, is_pseudo_claim, split_domain, strip_claims_prefix, Identity,
    IdentityResolver, PrincipalKind, CLAIM_ALL_AUTHENTICATED_USERS, CLAIM_EVERYONE,
};
pub use service::{ensure_parameter, MembershipService};
pub use sid::{is_sid, Sid};
pub use sid_cache::SidCache;
pub use store::{InMemoryLocalStore, LocalGroupDefinition, LocalStoreDefinition};
pub use traits::{
    DirectoryClient, DirectoryPrincipal, GroupLookup, LocalPrincipal, LocalStore, StructuralClass,
};
