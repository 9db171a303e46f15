//! Hierarchical named log source tree (spec §4.1, component C10).
//!
//! Sources form a tree rooted at an unnamed root. Each has a stable
//! process-wide id, an atomic current level (for lock-free `canLog` checks
//! under concurrent `setLevel`/remote reconfiguration), a target affinity
//! mask over the first 64 target ids, and a set of pass-keys a target may
//! require before accepting records from it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ElogError, Result};
use crate::level::Level;

static NEXT_SOURCE_ID: AtomicU32 = AtomicU32::new(1);

fn next_source_id() -> u32 {
    NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// How a `setLevel` call propagates to descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagate {
    /// Change this source only.
    None,
    /// Recurse, but only lower (stricter) a descendant whose current level
    /// is strictly looser than the new level; a descendant already at the
    /// new level is left untouched.
    Loose,
    /// Recurse unconditionally.
    Strict,
    /// Like `Strict`, and additionally locks every touched descendant
    /// against subsequent bulk (`Strict`/`Loose`) overrides from an
    /// ancestor. An explicit single-source `setLevel(_, _, None)` on a
    /// locked descendant is still honored and clears that source's lock —
    /// explicit intent on one source always wins over an inherited bulk
    /// lock, so `Force` can't become a one-way trap (open question (i),
    /// resolved in SPEC_FULL.md).
    Force,
}

struct SourceNode {
    id: u32,
    short_name: String,
    qualified_name: String,
    parent: Option<Arc<Source>>,
    level: AtomicU8,
    locked: std::sync::atomic::AtomicBool,
    affinity: AtomicU64,
    pass_keys: Mutex<Vec<String>>,
    children: Mutex<BTreeMap<String, Arc<Source>>>,
}

/// A node in the log source tree.
pub struct Source(SourceNode);

impl Source {
    fn new_root() -> Arc<Source> {
        Arc::new(Source(SourceNode {
            id: 0,
            short_name: String::new(),
            qualified_name: String::new(),
            parent: None,
            level: AtomicU8::new(Level::Info.ordinal()),
            locked: std::sync::atomic::AtomicBool::new(false),
            affinity: AtomicU64::new(u64::MAX),
            pass_keys: Mutex::new(Vec::new()),
            children: Mutex::new(BTreeMap::new()),
        }))
    }

    fn new_child(parent: &Arc<Source>, short_name: &str) -> Arc<Source> {
        let qualified_name = if parent.0.qualified_name.is_empty() {
            short_name.to_string()
        } else {
            format!("{}.{}", parent.0.qualified_name, short_name)
        };
        let level = parent.level();
        Arc::new(Source(SourceNode {
            id: next_source_id(),
            short_name: short_name.to_string(),
            qualified_name,
            parent: Some(parent.clone()),
            level: AtomicU8::new(level.ordinal()),
            locked: std::sync::atomic::AtomicBool::new(false),
            affinity: AtomicU64::new(parent.affinity()),
            pass_keys: Mutex::new(Vec::new()),
            children: Mutex::new(BTreeMap::new()),
        }))
    }

    pub fn id(&self) -> u32 {
        self.0.id
    }

    pub fn short_name(&self) -> &str {
        &self.0.short_name
    }

    pub fn qualified_name(&self) -> &str {
        &self.0.qualified_name
    }

    pub fn parent(&self) -> Option<&Arc<Source>> {
        self.0.parent.as_ref()
    }

    pub fn level(&self) -> Level {
        Level::from_ordinal(self.0.level.load(Ordering::Acquire)).unwrap_or(Level::Info)
    }

    pub fn affinity(&self) -> u64 {
        self.0.affinity.load(Ordering::Acquire)
    }

    pub fn set_affinity(&self, mask: u64) {
        self.0.affinity.store(mask, Ordering::Release);
    }

    pub fn pass_keys(&self) -> Vec<String> {
        self.0.pass_keys.lock().clone()
    }

    pub fn add_pass_key(&self, key: impl Into<String>) {
        let key = key.into();
        let mut keys = self.0.pass_keys.lock();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    pub fn has_pass_key(&self, key: &str) -> bool {
        self.0.pass_keys.lock().iter().any(|k| k == key)
    }

    /// `true` iff a record at `level` is admitted by this source's current ceiling.
    #[inline]
    pub fn can_log(&self, level: Level) -> bool {
        level.admitted_by(self.level())
    }

    fn set_level_raw(&self, level: Level) {
        self.0.level.store(level.ordinal(), Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.0.locked.load(Ordering::Acquire)
    }

    fn set_locked(&self, locked: bool) {
        self.0.locked.store(locked, Ordering::Release);
    }

    fn children_snapshot(&self) -> Vec<Arc<Source>> {
        self.0.children.lock().values().cloned().collect()
    }

    /// Set this source's level, propagating to descendants per `mode`.
    pub fn set_level(self: &Arc<Self>, level: Level, mode: Propagate) {
        match mode {
            Propagate::None => {
                self.set_level_raw(level);
                self.set_locked(false);
            }
            Propagate::Loose => {
                self.set_level_raw(level);
                self.propagate_loose(level);
            }
            Propagate::Strict => {
                self.set_level_raw(level);
                self.propagate_strict(level, false);
            }
            Propagate::Force => {
                self.set_level_raw(level);
                self.propagate_strict(level, true);
            }
        }
    }

    fn propagate_loose(&self, level: Level) {
        for child in self.children_snapshot() {
            if child.is_locked() {
                continue;
            }
            // Strictly looser than `level` means a larger ordinal; a
            // descendant already at or stricter than `level` is untouched.
            if child.level().ordinal() > level.ordinal() {
                child.set_level_raw(level);
            }
            child.propagate_loose(level);
        }
    }

    fn propagate_strict(&self, level: Level, lock: bool) {
        for child in self.children_snapshot() {
            if child.is_locked() && !lock {
                continue;
            }
            child.set_level_raw(level);
            if lock {
                child.set_locked(true);
            }
            child.propagate_strict(level, lock);
        }
    }
}

/// The log source tree: owns the root and the full id/name indices.
pub struct SourceTree {
    root: Arc<Source>,
    by_id: Mutex<BTreeMap<u32, Arc<Source>>>,
}

impl SourceTree {
    pub fn new() -> Self {
        let root = Source::new_root();
        let mut by_id = BTreeMap::new();
        by_id.insert(root.id(), root.clone());
        SourceTree { root, by_id: Mutex::new(by_id) }
    }

    pub fn root(&self) -> Arc<Source> {
        self.root.clone()
    }

    /// Look up a source by id.
    pub fn get_by_id(&self, id: u32) -> Option<Arc<Source>> {
        self.by_id.lock().get(&id).cloned()
    }

    /// Look up a source by its dot-qualified name, without creating it.
    pub fn get(&self, qualified_name: &str) -> Option<Arc<Source>> {
        if qualified_name.is_empty() {
            return Some(self.root.clone());
        }
        let mut current = self.root.clone();
        for part in qualified_name.split('.') {
            let next = current.0.children.lock().get(part).cloned()?;
            current = next;
        }
        Some(current)
    }

    /// Define (or return the existing) source at `qualified_name`.
    ///
    /// When `create_missing` is false and any ancestor is missing, fails
    /// with `InvalidArgument` rather than creating it. Idempotent: defining
    /// the same name twice returns the same source.
    pub fn define_source(&self, qualified_name: &str, create_missing: bool) -> Result<Arc<Source>> {
        if qualified_name.is_empty() {
            return Ok(self.root.clone());
        }
        let mut current = self.root.clone();
        for part in qualified_name.split('.') {
            let mut children = current.0.children.lock();
            let next = match children.get(part) {
                Some(child) => child.clone(),
                None => {
                    if !create_missing {
                        return Err(ElogError::InvalidArgument(format!(
                            "ancestor missing while defining source: {qualified_name}"
                        )));
                    }
                    // Mint and insert under the same `children` guard so two
                    // threads racing to define the same missing name can't
                    // both observe `None`, both create a source, and have
                    // the second `insert` silently overwrite the first.
                    let child = Source::new_child(&current, part);
                    children.insert(part.to_string(), child.clone());
                    drop(children);
                    self.by_id.lock().insert(child.id(), child.clone());
                    apply_env_override(&child);
                    child
                }
            };
            current = next;
        }
        Ok(current)
    }

    /// Remove a named child from its parent. Fails if the source has
    /// children of its own (callers should remove the subtree bottom-up).
    pub fn remove_child(&self, parent: &Arc<Source>, short_name: &str) -> Result<()> {
        let mut children = parent.0.children.lock();
        let Some(child) = children.get(short_name) else {
            return Err(ElogError::InvalidArgument(format!("no such child: {short_name}")));
        };
        if !child.0.children.lock().is_empty() {
            return Err(ElogError::InvalidState(format!("source {short_name} still has children")));
        }
        let id = child.id();
        children.remove(short_name);
        drop(children);
        self.by_id.lock().remove(&id);
        Ok(())
    }

    /// List sources whose qualified name matches `include` and not `exclude`
    /// (both optional regexes), for the control plane (C18).
    pub fn list_sources(&self, include: Option<&regex::Regex>, exclude: Option<&regex::Regex>) -> Vec<(String, Level)> {
        self.by_id
            .lock()
            .values()
            .filter(|s| include.map(|re| re.is_match(s.qualified_name())).unwrap_or(true))
            .filter(|s| !exclude.map(|re| re.is_match(s.qualified_name())).unwrap_or(false))
            .map(|s| (s.qualified_name().to_string(), s.level()))
            .collect()
    }
}

impl Default for SourceTree {
    fn default() -> Self {
        SourceTree::new()
    }
}

/// Derive `QUALIFIED_NAME_log_level` (dots -> underscores, upper-cased) and
/// apply it with `Propagate::None` if the environment variable is set. Only
/// consulted at source-definition time; never overrides a later explicit
/// `setLevel` (spec §4.1 "Early-env overrides").
fn apply_env_override(source: &Arc<Source>) {
    if source.qualified_name().is_empty() {
        return;
    }
    let key = format!("{}_log_level", source.qualified_name().replace('.', "_")).to_ascii_uppercase();
    if let Ok(value) = std::env::var(&key) {
        if let Some(level) = Level::from_name(&value) {
            source.set_level(level, Propagate::None);
        }
    }
}
