//! The intent store.
//!
//! Intent lives on disk as one YAML document per workload so that mesh
//! configuration is reviewed, versioned, and rolled back with the same tools
//! as any other artifact. The directory is re-read on an interval rather
//! than watched for events; a scan is cheap at this scale and a missed
//! filesystem notification can never wedge the control plane.
//!
//! A document that stops parsing keeps its last valid contents
//! authoritative until an edit fixes it. A document that disappears reverts
//! its workload to pass-through.

use crate::{registry, SharedIndex};
use ahash::AHashMap as HashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{trace, warn};
use weft_error::Error;
use weft_policy::Intent;

/// Re-reads the intent directory on `interval`, applying changes to the
/// index and starting registry watches for newly named services.
///
/// The first scan happens immediately so that proxies connecting at startup
/// do not wait a full interval for configuration.
pub async fn watch(
    dir: PathBuf,
    interval: Duration,
    index: SharedIndex,
    registry: registry::Watcher,
) {
    let mut files = BTreeMap::new();
    let mut ticks = time::interval(interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        scan(&dir, &mut files).await;
        let new_services = index.write().reset(effective(&files));
        for service in new_services {
            registry.spawn_watch(service);
        }
    }
}

/// Reconciles `files` with the directory's current contents.
///
/// Unreadable documents keep their previous entry; if the directory itself
/// cannot be read, the whole previous set stays authoritative.
async fn scan(dir: &Path, files: &mut BTreeMap<PathBuf, Intent>) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) => {
            warn!(%error, dir = %dir.display(), "Failed to read intent directory");
            return;
        }
    };

    let mut seen = BTreeSet::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!(%error, dir = %dir.display(), "Failed to read intent directory");
                return;
            }
        };
        let path = entry.path();
        if !is_intent(&path) {
            continue;
        }
        seen.insert(path.clone());
        match load(&path).await {
            Ok(intent) => {
                trace!(path = %path.display(), workload = %intent.workload, "Loaded intent");
                files.insert(path, intent);
            }
            Err(error) if files.contains_key(&path) => {
                warn!(%error, path = %path.display(), "Keeping last valid intent");
            }
            Err(error) => {
                warn!(%error, path = %path.display(), "Ignoring unreadable intent");
            }
        }
    }
    files.retain(|path, _| seen.contains(path));
}

fn is_intent(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml") | Some("yaml")
    )
}

async fn load(path: &Path) -> Result<Intent, Error> {
    let doc = tokio::fs::read_to_string(path).await?;
    Ok(Intent::from_yaml(&doc)?)
}

/// Collapses per-file documents into a per-workload set. When two files
/// claim the same workload, the lexically first path wins and the rest are
/// logged and ignored.
fn effective(files: &BTreeMap<PathBuf, Intent>) -> HashMap<String, Intent> {
    let mut intents = HashMap::default();
    for (path, intent) in files {
        if intents.contains_key(&intent.workload) {
            warn!(
                workload = %intent.workload,
                path = %path.display(),
                "Duplicate intent document ignored"
            );
            continue;
        }
        intents.insert(intent.workload.clone(), intent.clone());
    }
    intents
}
