//! Push-side conflict classification
//!
//! Pure decision logic: given an item's per-target sync time and what exists
//! remotely, pick the action. Timestamps compared here are the client-set
//! `updated_time` read from the remote payload, never the backend's file
//! timestamp, which is not accurate enough and would manufacture conflicts.

use crate::types::{ConflictHandling, ItemKind, SyncItem};

/// Action selected for one item during a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    CreateRemote,
    UpdateRemote,
    DeleteRemote,
    CreateLocal,
    UpdateLocal,
    DeleteLocal,
    /// Structural conflict (folder, tag, attachment): remote wins
    ItemConflict,
    /// Note conflict: the local edit is preserved as a conflict copy
    NoteConflict,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::CreateRemote => "createRemote",
            SyncAction::UpdateRemote => "updateRemote",
            SyncAction::DeleteRemote => "deleteRemote",
            SyncAction::CreateLocal => "createLocal",
            SyncAction::UpdateLocal => "updateLocal",
            SyncAction::DeleteLocal => "deleteLocal",
            SyncAction::ItemConflict => "itemConflict",
            SyncAction::NoteConflict => "noteConflict",
        }
    }
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of classifying one locally-changed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushDecision {
    pub action: SyncAction,
    pub reason: &'static str,
}

fn conflict_action(kind: ItemKind) -> SyncAction {
    match kind.conflict_handling() {
        ConflictHandling::PreserveLocal => SyncAction::NoteConflict,
        ConflictHandling::AcceptRemote => SyncAction::ItemConflict,
    }
}

/// Classify a locally-changed item against the remote state.
///
/// `remote_updated_time` is the `updated_time` carried in the remote
/// payload, or `None` when no remote object exists.
pub fn classify_push(
    kind: ItemKind,
    local_sync_time: i64,
    remote_updated_time: Option<i64>,
) -> PushDecision {
    match remote_updated_time {
        None => {
            if local_sync_time == 0 {
                PushDecision {
                    action: SyncAction::CreateRemote,
                    reason: "remote does not exist, and local is new and has never been synced",
                }
            } else {
                PushDecision {
                    action: conflict_action(kind),
                    reason: "remote has been deleted, but local has changes",
                }
            }
        }
        Some(remote_time) if remote_time > local_sync_time => PushDecision {
            action: conflict_action(kind),
            reason: "both remote and local have changes",
        },
        Some(_) => PushDecision {
            action: SyncAction::UpdateRemote,
            reason: "local has changes",
        },
    }
}

/// Whether a note conflict is worth preserving as a separate copy. A
/// divergence only in bookkeeping fields is not; the user's text is.
pub fn note_conflict_matters(local: &SyncItem, remote: &SyncItem) -> bool {
    local.title != remote.title || local.body != remote.body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_synced_and_no_remote_creates() {
        let decision = classify_push(ItemKind::Note, 0, None);
        assert_eq!(decision.action, SyncAction::CreateRemote);
    }

    #[test]
    fn synced_but_remote_gone_is_conflict() {
        let decision = classify_push(ItemKind::Note, 1000, None);
        assert_eq!(decision.action, SyncAction::NoteConflict);

        let decision = classify_push(ItemKind::Folder, 1000, None);
        assert_eq!(decision.action, SyncAction::ItemConflict);
    }

    #[test]
    fn remote_newer_than_sync_point_is_conflict() {
        let decision = classify_push(ItemKind::Note, 1000, Some(2000));
        assert_eq!(decision.action, SyncAction::NoteConflict);
        assert_eq!(decision.reason, "both remote and local have changes");

        let decision = classify_push(ItemKind::Tag, 1000, Some(2000));
        assert_eq!(decision.action, SyncAction::ItemConflict);
    }

    #[test]
    fn remote_at_or_before_sync_point_updates() {
        assert_eq!(
            classify_push(ItemKind::Note, 1000, Some(1000)).action,
            SyncAction::UpdateRemote
        );
        assert_eq!(
            classify_push(ItemKind::Note, 1000, Some(500)).action,
            SyncAction::UpdateRemote
        );
    }

    #[test]
    fn never_synced_but_remote_exists_is_conflict() {
        // Two clients created the same id, or the local sync record was
        // lost: the remote has changes we never saw
        let decision = classify_push(ItemKind::Note, 0, Some(100));
        assert_eq!(decision.action, SyncAction::NoteConflict);
    }

    #[test]
    fn bookkeeping_only_divergence_does_not_matter() {
        let mut local = SyncItem::new(ItemKind::Note, "t");
        local.body = "same".into();
        let mut remote = local.clone();
        remote.updated_time += 10;
        assert!(!note_conflict_matters(&local, &remote));

        remote.body = "different".into();
        assert!(note_conflict_matters(&local, &remote));
    }
}
