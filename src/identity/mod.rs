//! Client-side identity for the admin dashboard: session bootstrap, permission
//! resolution and idle logout. Keep the public surface thin and split
//! implementation across sub-modules.

mod profile;
mod token;
mod permissions;
mod session;
mod inactivity;

pub use profile::UserProfile;
pub use token::{decode_claims, AccessClaims, TokenPair, TokenStore};
pub use permissions::{
    default_known_permissions, MasterAccounts, Permission, PermissionPolicy, PermissionResolver, PermissionSet,
    PermissionSource, PermissionStore,
};
pub use session::{BootstrapOutcome, LogoutReason, ProfileSource, SessionContext, SessionEvent, SessionStatus};
pub use inactivity::{ActivityEvent, ActivityState, InactivityMonitor, InactivitySettings};
