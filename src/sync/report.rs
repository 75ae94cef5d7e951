//! Session counters and progress reporting

use std::sync::Arc;

use super::conflict::SyncAction;

/// Cumulative per-session counters, pushed through the progress callback
/// after every state-changing action. Ephemeral; never persisted.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub create_local: u32,
    pub update_local: u32,
    pub delete_local: u32,
    pub create_remote: u32,
    pub update_remote: u32,
    pub delete_remote: u32,
    pub item_conflict: u32,
    pub note_conflict: u32,
    /// Non-fatal per-item failures, logged and skipped
    pub errors: Vec<String>,
    pub cancelled: bool,
    pub completed_time: Option<i64>,
}

impl SyncReport {
    pub fn record(&mut self, action: SyncAction) {
        match action {
            SyncAction::CreateLocal => self.create_local += 1,
            SyncAction::UpdateLocal => self.update_local += 1,
            SyncAction::DeleteLocal => self.delete_local += 1,
            SyncAction::CreateRemote => self.create_remote += 1,
            SyncAction::UpdateRemote => self.update_remote += 1,
            SyncAction::DeleteRemote => self.delete_remote += 1,
            SyncAction::ItemConflict => self.item_conflict += 1,
            SyncAction::NoteConflict => self.note_conflict += 1,
        }
    }

    pub fn count(&self, action: SyncAction) -> u32 {
        match action {
            SyncAction::CreateLocal => self.create_local,
            SyncAction::UpdateLocal => self.update_local,
            SyncAction::DeleteLocal => self.delete_local,
            SyncAction::CreateRemote => self.create_remote,
            SyncAction::UpdateRemote => self.update_remote,
            SyncAction::DeleteRemote => self.delete_remote,
            SyncAction::ItemConflict => self.item_conflict,
            SyncAction::NoteConflict => self.note_conflict,
        }
    }

    /// Total state-changing actions this session
    pub fn total_changes(&self) -> u32 {
        self.create_local
            + self.update_local
            + self.delete_local
            + self.create_remote
            + self.update_remote
            + self.delete_remote
            + self.item_conflict
            + self.note_conflict
    }

    /// Human-readable summary, one line per non-zero counter
    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let counters = [
            ("Created local items", self.create_local),
            ("Updated local items", self.update_local),
            ("Deleted local items", self.delete_local),
            ("Created remote items", self.create_remote),
            ("Updated remote items", self.update_remote),
            ("Deleted remote items", self.delete_remote),
            ("Item conflicts", self.item_conflict),
            ("Note conflicts", self.note_conflict),
        ];
        for (label, count) in counters {
            if count > 0 {
                lines.push(format!("{label}: {count}."));
            }
        }
        if self.cancelled {
            lines.push("Cancelled.".to_string());
        }
        for error in &self.errors {
            lines.push(format!("Error: {error}"));
        }
        lines
    }
}

/// Callback invoked with the cumulative report after every action. The only
/// coupling to any presentation layer.
pub type ProgressFn = Arc<dyn Fn(&SyncReport) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_count() {
        let mut report = SyncReport::default();
        report.record(SyncAction::CreateRemote);
        report.record(SyncAction::CreateRemote);
        report.record(SyncAction::NoteConflict);

        assert_eq!(report.count(SyncAction::CreateRemote), 2);
        assert_eq!(report.count(SyncAction::NoteConflict), 1);
        assert_eq!(report.count(SyncAction::DeleteLocal), 0);
        assert_eq!(report.total_changes(), 3);
    }

    #[test]
    fn summary_lists_only_nonzero() {
        let mut report = SyncReport::default();
        report.record(SyncAction::UpdateLocal);
        let lines = report.to_lines();
        assert_eq!(lines, vec!["Updated local items: 1.".to_string()]);
    }
}
