//! Basic delta algorithm
//!
//! Change detection for backends with no native change feed, built only on
//! a full listing and the set of locally-known item ids. Several objects can
//! share one timestamp, so the continuation context records both the
//! checkpoint timestamp and every path seen at exactly that timestamp; a
//! strict greater-than comparison alone would drop same-millisecond
//! siblings spanning a page boundary.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CarnetError, Result};
use crate::fileapi::driver::RemoteObject;
use crate::types::{item_path, path_to_id, ItemId};

/// Default number of entries per delta page
pub const DEFAULT_DELTA_PAGE_SIZE: usize = 1000;

/// Default fraction of known items that may vanish before the fail-safe trips
pub const DEFAULT_FAIL_SAFE_THRESHOLD: f64 = 0.90;

/// Persisted continuation state for one target's delta scan.
///
/// Round-trips exactly through serde so a paginated scan can resume across
/// process restarts. The caches live only for the duration of one full scan
/// and are cleared when the last page is returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaContext {
    /// Checkpoint: highest object timestamp fully processed
    #[serde(default)]
    pub timestamp: i64,
    /// Paths whose timestamp is exactly `timestamp`, already processed
    #[serde(default)]
    pub paths_at_timestamp: Vec<String>,
    /// Full remote listing, sorted ascending, cached until the scan completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_cache: Option<Vec<RemoteObject>>,
    /// Item ids present in the cached listing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_ids_cache: Option<HashSet<ItemId>>,
    /// Whether this scan already emitted deletion entries
    #[serde(default)]
    pub deleted_items_processed: bool,
}

impl DeltaContext {
    /// Whether a fresh listing is needed before the next page
    pub fn needs_listing(&self) -> bool {
        self.stats_cache.is_none()
    }

    /// Install a fresh full listing for a new scan
    pub fn prime(&mut self, mut listing: Vec<RemoteObject>) {
        listing.retain(|stat| !stat.is_dir);
        listing.sort_by(|a, b| a.updated_time.cmp(&b.updated_time));
        self.stat_ids_cache = Some(
            listing
                .iter()
                .filter_map(|stat| path_to_id(&stat.path).map(str::to_string))
                .collect(),
        );
        self.stats_cache = Some(listing);
    }
}

/// Tuning knobs for the basic delta algorithm
#[derive(Debug, Clone)]
pub struct DeltaOptions {
    pub page_size: usize,
    /// Bulk-deletion guard. Disabled only through an explicit setting.
    pub fail_safe: bool,
    pub fail_safe_threshold: f64,
}

impl Default for DeltaOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_DELTA_PAGE_SIZE,
            fail_safe: true,
            fail_safe_threshold: DEFAULT_FAIL_SAFE_THRESHOLD,
        }
    }
}

/// One page of delta results
#[derive(Debug, Clone)]
pub struct DeltaPage {
    pub items: Vec<RemoteObject>,
    pub has_more: bool,
    pub context: DeltaContext,
}

/// Compute one page of changes from a primed context.
///
/// `known_item_ids` are the ids the local side believes exist on the target;
/// ids absent from the full listing are emitted as deletions, once per scan,
/// on the first page. If deletions would exceed the configured fraction of
/// known ids the fail-safe aborts the scan: a wiped or misconfigured remote
/// must not read as a clean slate.
pub fn basic_delta(
    context: DeltaContext,
    known_item_ids: &HashSet<ItemId>,
    options: &DeltaOptions,
) -> Result<DeltaPage> {
    let mut ctx = context;
    let stats = match &ctx.stats_cache {
        Some(stats) => stats.clone(),
        None => {
            return Err(CarnetError::Sync(
                "basic_delta called without a primed listing".to_string(),
            ))
        }
    };

    let checkpoint = ctx.timestamp;
    let done_at_checkpoint: HashSet<&str> =
        ctx.paths_at_timestamp.iter().map(String::as_str).collect();

    let mut items: Vec<RemoteObject> = Vec::new();
    let mut new_timestamp = ctx.timestamp;
    let mut new_paths = ctx.paths_at_timestamp.clone();
    let mut exhausted = true;

    for stat in &stats {
        if stat.updated_time < checkpoint {
            continue;
        }
        if stat.updated_time == checkpoint && done_at_checkpoint.contains(stat.path.as_str()) {
            continue;
        }
        if items.len() >= options.page_size {
            exhausted = false;
            break;
        }
        if stat.updated_time > new_timestamp {
            new_timestamp = stat.updated_time;
            new_paths.clear();
        }
        new_paths.push(stat.path.clone());
        items.push(stat.clone());
    }

    if !ctx.deleted_items_processed {
        let remote_ids = match &ctx.stat_ids_cache {
            Some(ids) => ids.clone(),
            None => stats
                .iter()
                .filter_map(|stat| path_to_id(&stat.path).map(str::to_string))
                .collect(),
        };

        let mut missing: Vec<&ItemId> = known_item_ids
            .iter()
            .filter(|id| !remote_ids.contains(*id))
            .collect();
        missing.sort();

        if options.fail_safe && !known_item_ids.is_empty() {
            let fraction = missing.len() as f64 / known_item_ids.len() as f64;
            if fraction > options.fail_safe_threshold {
                return Err(CarnetError::FailSafeTriggered(format!(
                    "{} of {} known items are missing from the remote; refusing to \
                     delete them locally. If the remote was intentionally wiped, \
                     disable the sync.fail_safe setting and sync again.",
                    missing.len(),
                    known_item_ids.len()
                )));
            }
        }

        for id in missing {
            items.push(RemoteObject::deleted(item_path(id)));
        }
        ctx.deleted_items_processed = true;
    }

    ctx.timestamp = new_timestamp;
    ctx.paths_at_timestamp = new_paths;

    let has_more = !exhausted;
    if !has_more {
        // Scan complete: next session starts fresh and rescans deletions
        ctx.stats_cache = None;
        ctx.stat_ids_cache = None;
        ctx.deleted_items_processed = false;
    }

    Ok(DeltaPage {
        items,
        has_more,
        context: ctx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::new_item_id;
    use pretty_assertions::assert_eq;

    fn primed(listing: Vec<RemoteObject>) -> DeltaContext {
        let mut ctx = DeltaContext::default();
        ctx.prime(listing);
        ctx
    }

    fn ids_of(page: &DeltaPage) -> Vec<String> {
        page.items.iter().map(|o| o.path.clone()).collect()
    }

    #[test]
    fn empty_listing_no_known_items() {
        let page = basic_delta(primed(vec![]), &HashSet::new(), &DeltaOptions::default()).unwrap();
        assert!(page.items.is_empty());
        assert!(!page.has_more);
        assert!(page.context.stats_cache.is_none());
    }

    #[test]
    fn reports_everything_on_first_scan() {
        let listing = vec![
            RemoteObject::file(item_path(&new_item_id()), 100),
            RemoteObject::file(item_path(&new_item_id()), 200),
        ];
        let page =
            basic_delta(primed(listing), &HashSet::new(), &DeltaOptions::default()).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.context.timestamp, 200);
        assert!(!page.has_more);
    }

    #[test]
    fn skips_entries_before_checkpoint() {
        let old = RemoteObject::file(item_path(&new_item_id()), 50);
        let new = RemoteObject::file(item_path(&new_item_id()), 150);
        let mut ctx = primed(vec![old, new.clone()]);
        ctx.timestamp = 100;

        let page = basic_delta(ctx, &HashSet::new(), &DeltaOptions::default()).unwrap();
        assert_eq!(ids_of(&page), vec![new.path]);
    }

    #[test]
    fn directories_are_ignored() {
        let mut dir = RemoteObject::file(".resource", 500);
        dir.is_dir = true;
        let file = RemoteObject::file(item_path(&new_item_id()), 100);
        let page = basic_delta(
            primed(vec![dir, file.clone()]),
            &HashSet::new(),
            &DeltaOptions::default(),
        )
        .unwrap();
        assert_eq!(ids_of(&page), vec![file.path]);
    }

    #[test]
    fn pagination_with_shared_timestamps_is_exactly_once() {
        // Five objects, three sharing one timestamp, page size forces the
        // shared group to straddle page boundaries.
        let mut listing = vec![
            RemoteObject::file(item_path(&new_item_id()), 100),
            RemoteObject::file(item_path(&new_item_id()), 200),
            RemoteObject::file(item_path(&new_item_id()), 200),
            RemoteObject::file(item_path(&new_item_id()), 200),
            RemoteObject::file(item_path(&new_item_id()), 300),
        ];
        listing.sort_by_key(|o| o.path.clone());
        let all_paths: HashSet<String> = listing.iter().map(|o| o.path.clone()).collect();

        let options = DeltaOptions {
            page_size: 2,
            ..Default::default()
        };

        let mut seen: Vec<String> = Vec::new();
        let mut ctx = primed(listing);
        loop {
            // A resumed scan re-primes with the same listing if needed
            let page = basic_delta(ctx, &HashSet::new(), &options).unwrap();
            seen.extend(ids_of(&page));
            ctx = page.context;
            if !page.has_more {
                break;
            }
        }

        let unique: HashSet<String> = seen.iter().cloned().collect();
        assert_eq!(seen.len(), unique.len(), "no duplicates");
        assert_eq!(unique, all_paths, "no omissions");
    }

    #[test]
    fn context_survives_serde_round_trip_mid_scan() {
        let listing: Vec<RemoteObject> = (0..5)
            .map(|i| RemoteObject::file(item_path(&new_item_id()), 100 + i))
            .collect();
        let options = DeltaOptions {
            page_size: 2,
            ..Default::default()
        };

        let page = basic_delta(primed(listing), &HashSet::new(), &options).unwrap();
        assert!(page.has_more);

        let blob = serde_json::to_string(&page.context).unwrap();
        let restored: DeltaContext = serde_json::from_str(&blob).unwrap();
        assert_eq!(restored, page.context);

        // The restored context continues the scan without a fresh listing
        assert!(!restored.needs_listing());
        let next = basic_delta(restored, &HashSet::new(), &options).unwrap();
        assert!(!next.items.is_empty());
    }

    #[test]
    fn deletions_emitted_once_per_scan() {
        let kept = new_item_id();
        let gone = new_item_id();
        let listing = vec![RemoteObject::file(item_path(&kept), 100)];
        let known: HashSet<ItemId> = [kept.clone(), gone.clone()].into_iter().collect();

        let options = DeltaOptions {
            page_size: 1,
            fail_safe: false,
            ..Default::default()
        };

        let first = basic_delta(primed(listing), &known, &options).unwrap();
        let deleted: Vec<_> = first.items.iter().filter(|o| o.is_deleted).collect();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].path, item_path(&gone));
        assert!(first.context.deleted_items_processed || !first.has_more);

        if first.has_more {
            let second = basic_delta(first.context, &known, &options).unwrap();
            assert!(second.items.iter().all(|o| !o.is_deleted));
        }
    }

    #[test]
    fn fail_safe_trips_above_threshold() {
        let survivor = new_item_id();
        let listing = vec![RemoteObject::file(item_path(&survivor), 100)];
        let mut known: HashSet<ItemId> = (0..19).map(|_| new_item_id()).collect();
        known.insert(survivor.clone());

        // 19 of 20 missing = 95% > 90%
        let err = basic_delta(primed(listing.clone()), &known, &DeltaOptions::default())
            .unwrap_err();
        assert!(matches!(err, CarnetError::FailSafeTriggered(_)));

        // Explicit override lets the deletions through
        let options = DeltaOptions {
            fail_safe: false,
            ..Default::default()
        };
        let page = basic_delta(primed(listing), &known, &options).unwrap();
        assert_eq!(page.items.iter().filter(|o| o.is_deleted).count(), 19);
    }

    #[test]
    fn fail_safe_ignores_empty_local_set() {
        let listing = vec![RemoteObject::file(item_path(&new_item_id()), 100)];
        let page = basic_delta(primed(listing), &HashSet::new(), &DeltaOptions::default());
        assert!(page.is_ok());
    }

    #[test]
    fn caches_cleared_only_when_scan_completes() {
        let listing: Vec<RemoteObject> = (0..3)
            .map(|i| RemoteObject::file(item_path(&new_item_id()), 100 + i))
            .collect();
        let options = DeltaOptions {
            page_size: 2,
            ..Default::default()
        };

        let first = basic_delta(primed(listing), &HashSet::new(), &options).unwrap();
        assert!(first.has_more);
        assert!(first.context.stats_cache.is_some());

        let second = basic_delta(first.context, &HashSet::new(), &options).unwrap();
        assert!(!second.has_more);
        assert!(second.context.stats_cache.is_none());
        assert!(!second.context.deleted_items_processed);
    }
}
