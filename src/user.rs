//! Effective-user helpers used to namespace persisted state per account.
//!
//! The record id string embeds the *effective* user name, and `reset_all`
//! scans a per-user subdirectory unless running as root.

use nix::unistd::{Uid, User};

/// Name of the effective user, falling back to the numeric uid if the
/// passwd database has no entry (e.g. a uid with no `/etc/passwd` row in a
/// container).
pub fn effective_user_name() -> String {
    let uid = Uid::effective();
    match User::from_uid(uid) {
        Ok(Some(user)) => user.name,
        Ok(None) | Err(_) => uid.to_string(),
    }
}

/// True iff the effective user is root (uid 0).
pub fn is_root() -> bool {
    Uid::effective().is_root()
}
