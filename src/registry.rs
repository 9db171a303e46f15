//! Target registry and dispatch (spec §4.11, component C15).
//!
//! Holds every registered target in a fixed-size slot array indexed by the
//! target's own id, plus a separate default target used as a catch-all when
//! a record matches none of them. `dispatch` is the single place the global
//! filter, the affinity mask (first 64 ids only — ids at or above 64 are
//! always eligible, per spec §4.11), and pass-key gating are applied.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ElogError, Result};
use crate::filter::Filter;
use crate::preinit::PreInitBuffer;
use crate::record::LogRecord;
use crate::source::SourceTree;
use crate::target::Target;

/// Hard cap on simultaneously registered targets (spec §4.11).
pub const MAX_TARGETS: usize = 256;

/// Target ids at or above this bit width are always affinity-eligible; only
/// the first 64 ids participate in the affinity mask at all.
pub const AFFINITY_BITS: u32 = 64;

pub struct Registry {
    targets: RwLock<Vec<Option<Arc<dyn Target>>>>,
    next_id: AtomicU32,
    default_target: RwLock<Option<Arc<dyn Target>>>,
    global_filter: RwLock<Option<Filter>>,
    sources: Arc<SourceTree>,
    preinit: PreInitBuffer,
    any_target_registered: AtomicBool,
    global_filter_drops: AtomicU64,
}

impl Registry {
    pub fn new(sources: Arc<SourceTree>) -> Self {
        Registry::with_preinit_capacity(sources, crate::preinit::DEFAULT_CAPACITY)
    }

    pub fn with_preinit_capacity(sources: Arc<SourceTree>, preinit_capacity: usize) -> Self {
        Registry {
            targets: RwLock::new((0..MAX_TARGETS).map(|_| None).collect()),
            next_id: AtomicU32::new(0),
            default_target: RwLock::new(None),
            global_filter: RwLock::new(None),
            sources,
            preinit: PreInitBuffer::new(preinit_capacity),
            any_target_registered: AtomicBool::new(false),
            global_filter_drops: AtomicU64::new(0),
        }
    }

    /// Reserve the next free target id for a caller about to construct a
    /// target (every concrete target's constructor takes `id` up front, so
    /// the id has to exist before the target does).
    pub fn allocate_target_id(&self) -> Result<u32> {
        let targets = self.targets.read();
        let start = self.next_id.load(Ordering::Relaxed) as usize;
        for offset in 0..MAX_TARGETS {
            let candidate = (start + offset) % MAX_TARGETS;
            if targets[candidate].is_none() {
                self.next_id.store((candidate + 1) as u32 % MAX_TARGETS as u32, Ordering::Relaxed);
                return Ok(candidate as u32);
            }
        }
        Err(ElogError::ResourceExhausted(format!("target slot cap ({MAX_TARGETS}) reached")))
    }

    /// Register a target built with an id obtained from `allocate_target_id`.
    pub fn add_target(&self, target: Arc<dyn Target>) -> Result<()> {
        let id = target.id() as usize;
        if id >= MAX_TARGETS {
            return Err(ElogError::InvalidArgument(format!("target id {id} outside [0, {MAX_TARGETS})")));
        }
        {
            let mut targets = self.targets.write();
            if targets[id].is_some() {
                return Err(ElogError::InvalidState(format!("target id {id} already registered")));
            }
            target.start()?;
            targets[id] = Some(target);
        }
        self.note_registration();
        Ok(())
    }

    /// Remove a target by id, stopping it first. A no-op if the slot is
    /// already empty.
    pub fn remove_target(&self, id: u32) -> Result<()> {
        let id = id as usize;
        if id >= MAX_TARGETS {
            return Err(ElogError::InvalidArgument(format!("target id {id} outside [0, {MAX_TARGETS})")));
        }
        let removed = self.targets.write()[id].take();
        if let Some(target) = removed {
            target.stop();
        }
        Ok(())
    }

    /// Remove the target with the given name, if any is registered under it.
    pub fn remove_target_by_name(&self, name: &str) -> Result<()> {
        let id = {
            let targets = self.targets.read();
            targets.iter().flatten().find(|t| t.name() == name).map(|t| t.id())
        };
        match id {
            Some(id) => self.remove_target(id),
            None => Ok(()),
        }
    }

    pub fn get_target(&self, id: u32) -> Option<Arc<dyn Target>> {
        self.targets.read().get(id as usize).and_then(|slot| slot.clone())
    }

    pub fn get_target_by_name(&self, name: &str) -> Option<Arc<dyn Target>> {
        self.targets.read().iter().flatten().find(|t| t.name() == name).cloned()
    }

    /// Stop and remove every registered target. The default target, if any,
    /// is left in place.
    pub fn clear_all(&self) {
        let removed: Vec<Arc<dyn Target>> = {
            let mut targets = self.targets.write();
            targets.iter_mut().filter_map(|slot| slot.take()).collect()
        };
        for target in removed {
            target.stop();
        }
    }

    /// Set (replacing any previous) default target, consulted when a record
    /// matches no registered target.
    pub fn set_default_target(&self, target: Arc<dyn Target>) -> Result<()> {
        target.start()?;
        *self.default_target.write() = Some(target);
        self.note_registration();
        Ok(())
    }

    pub fn default_target(&self) -> Option<Arc<dyn Target>> {
        self.default_target.read().clone()
    }

    pub fn set_global_filter(&self, filter: Option<Filter>) {
        *self.global_filter.write() = filter;
    }

    pub fn preinit_dropped_count(&self) -> u64 {
        self.preinit.dropped_oldest_count()
    }

    pub fn global_filter_drop_count(&self) -> u64 {
        self.global_filter_drops.load(Ordering::Relaxed)
    }

    /// The first target (or default target) registration drains and replays
    /// the pre-init buffer through the real dispatch path exactly once; all
    /// later registrations are no-ops here.
    fn note_registration(&self) {
        if !self.any_target_registered.swap(true, Ordering::AcqRel) {
            self.preinit.drain_into(|record| self.dispatch_registered(record));
        }
    }

    /// Route a finished record to every eligible target, or buffer it if
    /// nothing has been registered yet.
    pub fn dispatch(&self, record: &LogRecord) {
        if !self.any_target_registered.load(Ordering::Acquire) {
            self.preinit.push(record.clone());
            return;
        }
        self.dispatch_registered(record);
    }

    fn dispatch_registered(&self, record: &LogRecord) {
        if let Some(filter) = self.global_filter.read().as_ref() {
            if !filter.evaluate(record).admit {
                self.global_filter_drops.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let source = self.sources.get_by_id(record.source_id);
        let affinity = source.as_ref().map(|s| s.affinity()).unwrap_or(u64::MAX);

        let mut dispatched_any = false;
        for (index, slot) in self.targets.read().iter().enumerate() {
            let Some(target) = slot else { continue };
            if (index as u32) < AFFINITY_BITS && affinity & (1u64 << index) == 0 {
                continue;
            }
            if let Some(pass_key) = target.pass_key() {
                let admitted = source.as_ref().map(|s| s.has_pass_key(pass_key)).unwrap_or(false);
                if !admitted {
                    continue;
                }
            }
            target.log(record);
            dispatched_any = true;
        }

        if !dispatched_any {
            if let Some(default_target) = self.default_target.read().as_ref() {
                default_target.log(record);
            }
        }
    }
}
