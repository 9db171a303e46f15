//! Control-plane operations (spec §4.14, component C18).
//!
//! `listSources`/`updateLevels`/`reload` are the slow-path, infrequently
//! called operations a management surface (CLI, RPC handler, SIGHUP
//! handler) drives — never the hot log path. All three are idempotent:
//! calling any of them twice with the same input leaves state unchanged
//! the second time.

use std::sync::Arc;

use regex::Regex;

use crate::config::ConfigTable;
use crate::error::{ElogError, Result};
use crate::level::Level;
use crate::registry::Registry;
use crate::report::ReportChannel;
use crate::source::{Propagate, SourceTree};

/// One entry of an `updateLevels` call.
#[derive(Debug, Clone)]
pub struct LevelUpdate {
    pub qualified_name: String,
    pub level: Level,
    pub propagate: Propagate,
}

/// Entry point for the three control-plane operations, holding references
/// to the live source tree, registry, and report channel they act on.
pub struct Control {
    sources: Arc<SourceTree>,
    registry: Arc<Registry>,
    report: Arc<ReportChannel>,
}

impl Control {
    pub fn new(sources: Arc<SourceTree>, registry: Arc<Registry>, report: Arc<ReportChannel>) -> Self {
        Control { sources, registry, report }
    }

    /// `listSources(includeRegex, excludeRegex)`.
    pub fn list_sources(&self, include: Option<&str>, exclude: Option<&str>) -> Result<Vec<(String, Level)>> {
        let include_re = include
            .map(Regex::new)
            .transpose()
            .map_err(|e| ElogError::InvalidArgument(format!("bad include regex: {e}")))?;
        let exclude_re = exclude
            .map(Regex::new)
            .transpose()
            .map_err(|e| ElogError::InvalidArgument(format!("bad exclude regex: {e}")))?;
        Ok(self.sources.list_sources(include_re.as_ref(), exclude_re.as_ref()))
    }

    /// `updateLevels(entries, reportLevel)`. Entries are applied in the
    /// order supplied, so a later entry targeting a descendant always wins
    /// over an earlier ancestor's bulk propagation — the caller controls
    /// ordering, this never reorders by specificity. A bad entry (unknown
    /// source under `create_missing = false`, say) is recorded and
    /// skipped rather than aborting the whole batch, since the entries are
    /// independent of one another; the aggregated message is returned
    /// alongside an overall error status if anything failed.
    pub fn update_levels(&self, entries: &[LevelUpdate], report_level: Option<Level>) -> Result<()> {
        let mut failures = Vec::new();
        for entry in entries {
            match self.sources.define_source(&entry.qualified_name, true) {
                Ok(source) => source.set_level(entry.level, entry.propagate),
                Err(err) => failures.push(format!("{}: {err}", entry.qualified_name)),
            }
        }
        if let Some(level) = report_level {
            self.report.set_level(level);
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ElogError::InvalidArgument(failures.join("; ")))
        }
    }

    /// `reload(configSnapshot)`: re-apply the live-reloadable subset of a
    /// configuration snapshot — levels, affinity, and report level. Target
    /// and formatter declarations require constructing new objects (I/O for
    /// file targets, etc.) and are `configure`'s job, one layer up, not
    /// this cheap in-process call.
    pub fn reload(&self, table: &ConfigTable) -> Result<()> {
        let mut failures = Vec::new();

        if let Some((level, propagate)) = table.root_level {
            self.sources.root().set_level(level, propagate);
        }
        for directive in &table.source_levels {
            match self.sources.define_source(&directive.qualified_name, true) {
                Ok(source) => source.set_level(directive.level, directive.propagate),
                Err(err) => failures.push(format!("{}: {err}", directive.qualified_name)),
            }
        }
        for (qualified_name, mask) in &table.source_affinity {
            match self.sources.define_source(qualified_name, true) {
                Ok(source) => source.set_affinity(*mask),
                Err(err) => failures.push(format!("{qualified_name}: {err}")),
            }
        }
        if let Some(report_level) = table.extra.get("report_level").and_then(|v| Level::from_name(v)) {
            self.report.set_level(report_level);
        }
        let _ = &self.registry; // reserved for reload hooks that touch dispatch state directly

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ElogError::InvalidArgument(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;

    fn fresh_control() -> Control {
        let sources = Arc::new(SourceTree::new());
        let registry = Arc::new(Registry::new(sources.clone()));
        let report = Arc::new(ReportChannel::new(&sources, registry.clone(), Level::Diag));
        Control::new(sources, registry, report)
    }

    #[test]
    fn list_sources_filters_by_include_and_exclude() {
        let control = fresh_control();
        control.sources.define_source("svc.db", true).unwrap();
        control.sources.define_source("svc.http", true).unwrap();
        let listed = control.list_sources(Some("^svc"), Some("http")).unwrap();
        let names: Vec<_> = listed.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["svc.db"]);
    }

    #[test]
    fn list_sources_rejects_bad_regex() {
        let control = fresh_control();
        assert!(control.list_sources(Some("("), None).is_err());
    }

    #[test]
    fn update_levels_applies_entries_in_supplied_order() {
        let control = fresh_control();
        let entries = vec![
            LevelUpdate { qualified_name: "svc".to_string(), level: Level::Debug, propagate: Propagate::Strict },
            LevelUpdate { qualified_name: "svc.db".to_string(), level: Level::Error, propagate: Propagate::None },
        ];
        control.update_levels(&entries, None).unwrap();
        let db = control.sources.get("svc.db").unwrap();
        // the later, more specific entry wins over the earlier bulk propagation.
        assert_eq!(db.level(), Level::Error);
    }

    #[test]
    fn update_levels_also_sets_report_level() {
        let control = fresh_control();
        control.update_levels(&[], Some(Level::Error)).unwrap();
        assert_eq!(control.report.level(), Level::Error);
    }

    #[test]
    fn update_levels_collects_failures_without_aborting_the_batch() {
        let control = fresh_control();
        let entries = vec![
            LevelUpdate { qualified_name: "good".to_string(), level: Level::Warn, propagate: Propagate::None },
        ];
        let result = control.update_levels(&entries, None);
        assert!(result.is_ok());
        assert_eq!(control.sources.get("good").unwrap().level(), Level::Warn);
    }

    #[test]
    fn reload_reapplies_root_level_source_levels_and_affinity() {
        let control = fresh_control();
        let mut entries = std::collections::BTreeMap::new();
        entries.insert("log_level".to_string(), "warn".to_string());
        entries.insert("svc.log_level".to_string(), "debug".to_string());
        entries.insert("svc.log_affinity".to_string(), "0,1".to_string());
        entries.insert("report_level".to_string(), "error".to_string());
        let table = ConfigTable::from_flat_map(&entries).unwrap();

        control.reload(&table).unwrap();

        assert_eq!(control.sources.root().level(), Level::Warn);
        let svc = control.sources.get("svc").unwrap();
        assert_eq!(svc.level(), Level::Debug);
        assert_eq!(svc.affinity(), 0b11);
        assert_eq!(control.report.level(), Level::Error);
    }
}
