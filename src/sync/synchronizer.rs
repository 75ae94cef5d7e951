//! Session orchestration
//!
//! A session runs four phases, strictly in order: push local changes,
//! propagate local deletions, pull remote changes, reconcile local
//! deletions. Push must fully complete before pull begins: pull skips every
//! path push already handled this session, and running them the other way
//! around would re-download items push was about to overwrite.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CarnetError, Result};
use crate::fileapi::{DeltaContext, DeltaOptions, FileApi, RemoteObject, TimeDrift, SYNC_DIR};
use crate::store::{DeleteOptions, ItemStore, SaveOptions, SyncDisabledItem};
use crate::sync::conflict::{classify_push, note_conflict_matters, SyncAction};
use crate::sync::report::{ProgressFn, SyncReport};
use crate::types::{item_path, is_item_path, new_item_id, now_ms, ItemKind, SyncItem, TargetId};

/// Settings key for the bulk-deletion guard; "0" disables it
pub const FAIL_SAFE_SETTING: &str = "sync.fail_safe";

/// Synchronizer tuning
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Items per local paging query during push
    pub page_size: usize,
    /// Entries per delta page during pull
    pub delta_page_size: usize,
    /// Fraction of known items that may vanish before the fail-safe trips
    pub fail_safe_threshold: f64,
    /// Probe the remote clock at session start and warn on large drift
    pub check_time_drift: bool,
    pub max_time_drift_ms: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            delta_page_size: 1000,
            fail_safe_threshold: 0.90,
            check_time_drift: false,
            max_time_drift_ms: 60_000,
        }
    }
}

/// Per-call options for one session
#[derive(Default, Clone)]
pub struct SyncOptions {
    /// Invoked with cumulative counters after every state-changing action
    pub progress: Option<ProgressFn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    InProgress,
}

/// Per-session state. Everything a session touches lives here, keyed by the
/// synchronizer's target, so sessions against distinct targets can run
/// concurrently in one process.
struct SyncContext {
    report: SyncReport,
    progress: Option<ProgressFn>,
    /// Paths fully handled by the push phase; pull skips them
    done_paths: HashSet<String>,
    /// Items skipped after a benign per-item failure this session
    skipped_ids: HashSet<String>,
    /// Folder deletions are applied last, and only if the folder is empty
    folders_to_delete: Vec<SyncItem>,
}

impl SyncContext {
    fn new(progress: Option<ProgressFn>) -> Self {
        Self {
            report: SyncReport::default(),
            progress,
            done_paths: HashSet::new(),
            skipped_ids: HashSet::new(),
            folders_to_delete: Vec::new(),
        }
    }
}

/// Drives sessions for one target. Exactly one session may run at a time; a
/// second start while busy is a logged no-op.
pub struct Synchronizer {
    store: Arc<ItemStore>,
    api: Arc<FileApi>,
    target_id: TargetId,
    config: SyncConfig,
    state: Mutex<SyncState>,
    cancelling: Arc<AtomicBool>,
    time_drift: TimeDrift,
}

struct StateGuard<'a>(&'a Mutex<SyncState>);

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = SyncState::Idle;
    }
}

impl Synchronizer {
    pub fn new(
        store: Arc<ItemStore>,
        api: Arc<FileApi>,
        target_id: TargetId,
        config: SyncConfig,
    ) -> Result<Self> {
        store.register_target(target_id)?;
        let time_drift = TimeDrift::new(api.clone());
        Ok(Self {
            store,
            api,
            target_id,
            config,
            state: Mutex::new(SyncState::Idle),
            cancelling: Arc::new(AtomicBool::new(false)),
            time_drift,
        })
    }

    pub fn target_id(&self) -> TargetId {
        self.target_id
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    /// Request cancellation; checked between item operations
    pub fn cancel(&self) {
        if self.state() == SyncState::InProgress {
            self.cancelling.store(true, Ordering::SeqCst);
        }
    }

    /// Shared cancellation flag, for callers that cancel from a progress
    /// callback or another task
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelling.clone()
    }

    fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::SeqCst)
    }

    /// Items excluded from sync to this target, with their reasons
    pub fn sync_disabled_items(&self) -> Result<Vec<SyncDisabledItem>> {
        self.store.sync_disabled_items(self.target_id)
    }

    /// Run one session. Returns `None` when a session is already in
    /// progress. Any error aborts the remainder of the session; already
    /// committed items stay committed and state resets to idle.
    pub async fn start(&self, options: SyncOptions) -> Result<Option<SyncReport>> {
        {
            let mut state = self.state.lock();
            if *state != SyncState::Idle {
                tracing::warn!(
                    target_id = self.target_id,
                    "synchronization already in progress, ignoring start request"
                );
                return Ok(None);
            }
            *state = SyncState::InProgress;
        }
        let _guard = StateGuard(&self.state);
        self.cancelling.store(false, Ordering::SeqCst);

        let session_id = now_ms();
        tracing::info!(
            target_id = self.target_id,
            session_id,
            "starting synchronization"
        );

        let mut ctx = SyncContext::new(options.progress);
        let result = self.run_session(&mut ctx).await;

        if self.is_cancelling() {
            tracing::info!(target_id = self.target_id, "synchronization was cancelled");
            ctx.report.cancelled = true;
            self.cancelling.store(false, Ordering::SeqCst);
        }
        ctx.report.completed_time = Some(now_ms());

        for line in ctx.report.to_lines() {
            tracing::info!(target_id = self.target_id, session_id, "{line}");
        }

        match result {
            Ok(()) => Ok(Some(ctx.report)),
            Err(err) => {
                tracing::error!(
                    target_id = self.target_id,
                    session_id,
                    error = %err,
                    "synchronization failed"
                );
                Err(err)
            }
        }
    }

    async fn run_session(&self, ctx: &mut SyncContext) -> Result<()> {
        self.api.mkdir(SYNC_DIR).await?;

        if self.config.check_time_drift {
            match self.time_drift.offset_ms().await {
                Ok(offset) if offset.abs() > self.config.max_time_drift_ms => {
                    tracing::warn!(
                        target_id = self.target_id,
                        offset_ms = offset,
                        "remote clock drifts significantly; conflicts may be misclassified"
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(target_id = self.target_id, error = %err, "clock probe failed")
                }
            }
        }

        self.push_phase(ctx).await?;
        if self.is_cancelling() {
            return Ok(());
        }

        self.propagate_deletions_phase(ctx).await?;
        if self.is_cancelling() {
            return Ok(());
        }

        self.pull_phase(ctx).await?;
        if self.is_cancelling() {
            return Ok(());
        }

        self.reconcile_local_deletions_phase(ctx)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase A: push local changes
    // ------------------------------------------------------------------

    async fn push_phase(&self, ctx: &mut SyncContext) -> Result<()> {
        loop {
            if self.is_cancelling() {
                return Ok(());
            }

            let page = self
                .store
                .items_that_need_sync(self.target_id, self.config.page_size)?;
            let mut handled_any = false;

            for local in &page.items {
                if self.is_cancelling() {
                    return Ok(());
                }
                if ctx.skipped_ids.contains(&local.id) {
                    continue;
                }

                let path = local.path();
                // Safety check against infinite loops: a handled path must
                // have had its sync_time advanced
                if ctx.done_paths.contains(&path) {
                    return Err(CarnetError::Sync(format!(
                        "processing a path that has already been done: {path}; \
                         sync_time was not updated?"
                    )));
                }

                if self.push_item(ctx, local, &path).await? {
                    ctx.done_paths.insert(path);
                    handled_any = true;
                } else {
                    ctx.skipped_ids.insert(local.id.clone());
                }
            }

            if !page.has_more || !handled_any {
                return Ok(());
            }
        }
    }

    /// Push one item; `Ok(false)` means a benign skip
    async fn push_item(&self, ctx: &mut SyncContext, local: &SyncItem, path: &str) -> Result<bool> {
        let sync_time = self.store.sync_time(self.target_id, &local.id)?;
        let remote_stat = self.api.stat(path).await?;

        // The backend's file timestamp is not accurate enough for conflict
        // detection; read the client-set updated_time from the payload.
        let remote_item = match &remote_stat {
            Some(_) => match self.api.get(path).await? {
                Some(bytes) => match SyncItem::from_bytes(&bytes) {
                    Ok(item) => Some(item),
                    Err(err) => {
                        tracing::warn!(path, error = %err, "unreadable remote payload, skipping");
                        ctx.report.errors.push(format!("{path}: {err}"));
                        return Ok(false);
                    }
                },
                None => {
                    tracing::warn!(path, "remote vanished between stat and get, skipping");
                    return Ok(false);
                }
            },
            None => None,
        };

        let decision = classify_push(
            local.kind,
            sync_time,
            remote_item.as_ref().map(|item| item.updated_time),
        );
        self.log_operation(ctx, decision.action, Some(local), None, decision.reason);

        match decision.action {
            SyncAction::CreateRemote | SyncAction::UpdateRemote => {
                let bytes = local.to_bytes()?;
                match self.api.put_atomic(path, &bytes, local.updated_time).await {
                    Ok(()) => {
                        self.store
                            .set_sync_time(self.target_id, &local.id, now_ms())?;
                    }
                    Err(CarnetError::RejectedByTarget { reason, .. }) => {
                        tracing::warn!(
                            path,
                            reason = %reason,
                            "target rejected item; disabling sync for it"
                        );
                        self.store
                            .set_sync_disabled(self.target_id, &local.id, &reason)?;
                        ctx.report.errors.push(format!("{path}: {reason}"));
                    }
                    Err(err) => return Err(err),
                }
            }

            SyncAction::ItemConflict => {
                // Structural items hold little content: the remote version
                // (the one that synced first) wins
                match &remote_item {
                    Some(remote) => self.apply_remote_version(remote)?,
                    None => self.store.delete(
                        &local.id,
                        DeleteOptions {
                            track_deleted: false,
                            delete_children: false,
                        },
                    )?,
                }
            }

            SyncAction::NoteConflict => {
                // Preserve the local edit first so it is never silently lost
                let must_preserve = remote_item
                    .as_ref()
                    .map(|remote| note_conflict_matters(local, remote))
                    .unwrap_or(true);
                if must_preserve {
                    let mut duplicate = local.clone();
                    duplicate.id = new_item_id();
                    duplicate.is_conflict = true;
                    self.store.save(
                        &duplicate,
                        SaveOptions {
                            auto_timestamp: false,
                            is_new: true,
                        },
                    )?;
                }
                match &remote_item {
                    Some(remote) => self.apply_remote_version(remote)?,
                    None => self.store.delete(
                        &local.id,
                        DeleteOptions {
                            track_deleted: false,
                            delete_children: false,
                        },
                    )?,
                }
            }

            other => {
                return Err(CarnetError::Sync(format!(
                    "unexpected push action: {other}"
                )))
            }
        }

        Ok(true)
    }

    /// Overwrite the local copy with the remote version and record sync
    /// progress, without this looking like a user edit
    fn apply_remote_version(&self, remote: &SyncItem) -> Result<()> {
        self.store.save(
            remote,
            SaveOptions {
                auto_timestamp: false,
                is_new: false,
            },
        )?;
        self.store
            .set_sync_time(self.target_id, &remote.id, now_ms())?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase B: propagate local deletions
    // ------------------------------------------------------------------

    async fn propagate_deletions_phase(&self, ctx: &mut SyncContext) -> Result<()> {
        for record in self.store.deletion_records(self.target_id)? {
            if self.is_cancelling() {
                return Ok(());
            }

            let path = item_path(&record.item_id);
            self.log_operation(
                ctx,
                SyncAction::DeleteRemote,
                None,
                Some(&path),
                "local has been deleted",
            );
            // Driver delete is idempotent; a remote already gone is fine
            self.api.delete(&path).await?;
            self.store
                .purge_deletion_record(self.target_id, &record.item_id)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase C: pull remote changes
    // ------------------------------------------------------------------

    async fn pull_phase(&self, ctx: &mut SyncContext) -> Result<()> {
        let fail_safe = self.store.setting_bool(FAIL_SAFE_SETTING, true)?;
        let delta_options = DeltaOptions {
            page_size: self.config.delta_page_size,
            fail_safe,
            fail_safe_threshold: self.config.fail_safe_threshold,
        };

        let known_ids = self.store.synced_item_ids(self.target_id)?;
        let mut context = self.load_delta_context()?;
        let mut resynced = false;

        loop {
            if self.is_cancelling() {
                return Ok(());
            }

            let page = match self
                .api
                .delta("", context.clone(), &known_ids, &delta_options)
                .await
            {
                Ok(page) => page,
                Err(CarnetError::ResyncRequired(msg)) if !resynced => {
                    tracing::warn!(
                        target_id = self.target_id,
                        "{msg}; discarding delta context and rescanning"
                    );
                    self.clear_delta_context()?;
                    context = None;
                    resynced = true;
                    continue;
                }
                Err(err) => return Err(err),
            };

            for remote in &page.items {
                if self.is_cancelling() {
                    // Do not record the new context: the next session
                    // resumes from the previous checkpoint, and re-applying
                    // an already-pulled item is a harmless no-op
                    return Ok(());
                }
                self.process_remote_change(ctx, remote).await?;
            }

            self.save_delta_context(&page.context)?;
            if !page.has_more {
                return Ok(());
            }
            context = Some(page.context);
        }
    }

    async fn process_remote_change(&self, ctx: &mut SyncContext, remote: &RemoteObject) -> Result<()> {
        // Delta feeds may surface the work directory or other housekeeping
        if !is_item_path(&remote.path) {
            return Ok(());
        }
        // Push already reconciled these this session
        if ctx.done_paths.contains(&remote.path) {
            return Ok(());
        }

        let local = self.store.load_by_path(&remote.path)?;

        match (local, remote.is_deleted) {
            (None, true) => Ok(()),

            (None, false) => {
                let mut item = match self.fetch_remote_item(ctx, &remote.path).await? {
                    Some(item) => item,
                    None => return Ok(()),
                };
                self.log_operation(
                    ctx,
                    SyncAction::CreateLocal,
                    Some(&item),
                    None,
                    "remote exists but local does not",
                );
                if matches!(item.kind, ItemKind::Folder | ItemKind::Tag) {
                    item.title =
                        self.store
                            .disambiguate_title(item.kind, &item.parent_id, &item.title)?;
                }
                self.store.save(
                    &item,
                    SaveOptions {
                        auto_timestamp: false,
                        is_new: true,
                    },
                )?;
                self.store.set_sync_time(self.target_id, &item.id, now_ms())?;
                Ok(())
            }

            (Some(local), true) => {
                if local.kind == ItemKind::Folder {
                    // Deleted last, and only if empty
                    ctx.folders_to_delete.push(local);
                    return Ok(());
                }
                self.log_operation(
                    ctx,
                    SyncAction::DeleteLocal,
                    Some(&local),
                    None,
                    "remote has been deleted",
                );
                self.store.delete(
                    &local.id,
                    DeleteOptions {
                        track_deleted: false,
                        delete_children: false,
                    },
                )?;
                Ok(())
            }

            (Some(local), false) => {
                let item = match self.fetch_remote_item(ctx, &remote.path).await? {
                    Some(item) => item,
                    None => return Ok(()),
                };
                if item.updated_time <= local.updated_time {
                    return Ok(());
                }
                self.log_operation(
                    ctx,
                    SyncAction::UpdateLocal,
                    Some(&local),
                    None,
                    "remote is more recent than local",
                );
                self.store.save(
                    &item,
                    SaveOptions {
                        auto_timestamp: false,
                        is_new: false,
                    },
                )?;
                self.store.set_sync_time(self.target_id, &item.id, now_ms())?;
                Ok(())
            }
        }
    }

    /// Fetch and deserialize one remote item; `None` with a logged warning
    /// for the benign cases (vanished mid-session, unreadable payload)
    async fn fetch_remote_item(
        &self,
        ctx: &mut SyncContext,
        path: &str,
    ) -> Result<Option<SyncItem>> {
        let bytes = match self.api.get(path).await? {
            Some(bytes) => bytes,
            None => {
                tracing::warn!(
                    path,
                    "remote deleted between delta and get; handled next session"
                );
                return Ok(None);
            }
        };
        match SyncItem::from_bytes(&bytes) {
            Ok(item) => Ok(Some(item)),
            Err(err) => {
                tracing::warn!(path, error = %err, "unreadable remote payload, skipping");
                ctx.report.errors.push(format!("{path}: {err}"));
                Ok(None)
            }
        }
    }

    // ------------------------------------------------------------------
    // Phase D: local deletion reconciliation
    // ------------------------------------------------------------------

    fn reconcile_local_deletions_phase(&self, ctx: &mut SyncContext) -> Result<()> {
        let folders = std::mem::take(&mut ctx.folders_to_delete);
        for folder in folders {
            if self.is_cancelling() {
                return Ok(());
            }

            let note_ids = self.store.note_ids_in_folder(&folder.id)?;
            if !note_ids.is_empty() {
                // Whatever deleted the folder should have deleted its notes
                // too; keep them as conflict copies rather than dropping them
                tracing::warn!(
                    folder_id = %folder.id,
                    notes = note_ids.len(),
                    "remotely deleted folder still has local notes, preserving them"
                );
                self.store.mark_notes_conflicted(&folder.id)?;
            }
            self.log_operation(
                ctx,
                SyncAction::DeleteLocal,
                Some(&folder),
                None,
                "remote has been deleted",
            );
            self.store.delete(
                &folder.id,
                DeleteOptions {
                    track_deleted: false,
                    delete_children: false,
                },
            )?;
        }

        self.store.delete_orphan_sync_records()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn log_operation(
        &self,
        ctx: &mut SyncContext,
        action: SyncAction,
        local: Option<&SyncItem>,
        remote_path: Option<&str>,
        reason: &str,
    ) {
        tracing::info!(
            target_id = self.target_id,
            action = %action,
            item_id = local.map(|item| item.id.as_str()).unwrap_or(""),
            kind = local.map(|item| item.kind.as_str()).unwrap_or(""),
            title = local.map(|item| item.title.as_str()).unwrap_or(""),
            remote_path = remote_path.unwrap_or(""),
            reason,
            "sync operation"
        );
        ctx.report.record(action);
        if let Some(progress) = &ctx.progress {
            progress(&ctx.report);
        }
    }

    fn context_key(&self) -> String {
        format!("sync.{}.context", self.target_id)
    }

    fn load_delta_context(&self) -> Result<Option<DeltaContext>> {
        match self.store.setting(&self.context_key())? {
            Some(blob) => match serde_json::from_str(&blob) {
                Ok(context) => Ok(Some(context)),
                Err(err) => {
                    tracing::warn!(
                        target_id = self.target_id,
                        error = %err,
                        "discarding unreadable delta context"
                    );
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    fn save_delta_context(&self, context: &DeltaContext) -> Result<()> {
        let blob = serde_json::to_string(context)?;
        self.store.set_setting(&self.context_key(), &blob)
    }

    fn clear_delta_context(&self) -> Result<()> {
        self.store.delete_setting(&self.context_key())
    }
}
