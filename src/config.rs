//! Configuration object model (spec §6 "Configuration (recognized options)") [AMBIENT].
//!
//! Recognized flat keys are parsed into typed directives a `configure`/`reload`
//! implementation (C18) can apply; target declarations can additionally be
//! expressed as `scheme://type?key=value&...` URL strings (spec §6 "Target
//! URL grammar"). `ConfigValue` is `serde_json::Value` — the teacher already
//! depends on `serde_json`, and a config-file/network-service backend handing
//! `configure` a tagged tree has no reason to reinvent one.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{ElogError, Result};
use crate::level::Level;
use crate::source::Propagate;

/// A tagged configuration value tree, e.g. parsed from JSON/YAML by an
/// out-of-scope config-file backend.
pub type ConfigValue = serde_json::Value;

/// A parsed `log_level` / `<qname>.log_level` directive.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelDirective {
    /// Dot-qualified source name; empty means the root.
    pub qualified_name: String,
    pub level: Level,
    pub propagate: Propagate,
}

/// A parsed `<scheme>://<type>?key=value&...` target declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    pub scheme: String,
    pub kind: String,
    pub params: BTreeMap<String, String>,
}

impl TargetUrl {
    /// Parse a target URL. Properties not recognized by the scheme are the
    /// caller's concern (spec: "ignored with a warning"); this only handles
    /// the grammar, not scheme-specific validation.
    pub fn parse(url: &str) -> Result<TargetUrl> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| ElogError::InvalidArgument(format!("malformed target url: {url}")))?;
        if scheme.is_empty() {
            return Err(ElogError::InvalidArgument(format!("malformed target url: {url}")));
        }
        let (kind, query) = match rest.split_once('?') {
            Some((kind, query)) => (kind, query),
            None => (rest, ""),
        };
        if kind.is_empty() {
            return Err(ElogError::InvalidArgument(format!("target url missing type: {url}")));
        }
        let mut params = BTreeMap::new();
        if !query.is_empty() {
            for pair in query.split('&') {
                if pair.is_empty() {
                    continue;
                }
                match pair.split_once('=') {
                    Some((key, value)) => {
                        params.insert(key.to_string(), value.to_string());
                    }
                    None => {
                        params.insert(pair.to_string(), String::new());
                    }
                }
            }
        }
        Ok(TargetUrl { scheme: scheme.to_string(), kind: kind.to_string(), params })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Parse a `log_level` value's optional propagation suffix, e.g.
/// `"warn+:force"`.
pub fn parse_level_with_propagation(value: &str) -> Result<(Level, Propagate)> {
    let (level_part, propagate) = match value.split_once("+:") {
        Some((level_part, "force")) => (level_part, Propagate::Force),
        Some((level_part, "strict")) => (level_part, Propagate::Strict),
        Some((level_part, "loose")) => (level_part, Propagate::Loose),
        Some((_, suffix)) => {
            return Err(ElogError::InvalidArgument(format!("unknown propagation suffix: {suffix}")));
        }
        None => (value, Propagate::None),
    };
    let level = Level::from_name(level_part.trim())
        .ok_or_else(|| ElogError::InvalidArgument(format!("unknown level: {level_part}")))?;
    Ok((level, propagate))
}

/// Parse a comma-separated `<qname>.log_affinity` value into a bitmask over
/// the first 64 target ids. An id at or beyond 64 is accepted (it is always
/// affinity-eligible per the registry's dispatch rule) but contributes no bit.
pub fn parse_affinity_mask(value: &str) -> Result<u64> {
    let mut mask = 0u64;
    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let id: u32 = part
            .parse()
            .map_err(|_| ElogError::InvalidArgument(format!("invalid target id in affinity list: {part}")))?;
        if id < 64 {
            mask |= 1u64 << id;
        }
    }
    Ok(mask)
}

/// Parse a `log_rate_limit` value: `"maxMsg:timeout:units"`, units one of
/// `ms`/`s`/`min`.
pub fn parse_rate_limit(value: &str) -> Result<(u64, Duration)> {
    let parts: Vec<&str> = value.split(':').collect();
    let (max_msg, timeout, units) = match parts.as_slice() {
        [max_msg, timeout, units] => (*max_msg, *timeout, *units),
        _ => return Err(ElogError::InvalidArgument(format!("malformed log_rate_limit: {value}"))),
    };
    let max_msg: u64 = max_msg
        .parse()
        .map_err(|_| ElogError::InvalidArgument(format!("invalid maxMsg in log_rate_limit: {max_msg}")))?;
    let timeout: u64 = timeout
        .parse()
        .map_err(|_| ElogError::InvalidArgument(format!("invalid timeout in log_rate_limit: {timeout}")))?;
    let duration = match units {
        "ms" => Duration::from_millis(timeout),
        "s" => Duration::from_secs(timeout),
        "min" => Duration::from_secs(timeout * 60),
        other => return Err(ElogError::InvalidArgument(format!("unknown log_rate_limit unit: {other}"))),
    };
    Ok((max_msg, duration))
}

/// A flattened, typed view of the recognized configuration keys, ready for
/// `configure`/`reload` to apply. Unrecognized keys land in `extra` rather
/// than failing the whole table — spec §6: "properties not recognized ...
/// are ignored with a warning", applied here to config keys generally, not
/// just target-url query params.
#[derive(Debug, Clone, Default)]
pub struct ConfigTable {
    pub root_level: Option<(Level, Propagate)>,
    pub source_levels: Vec<LevelDirective>,
    pub source_affinity: Vec<(String, u64)>,
    pub format: Option<String>,
    pub filter: Option<String>,
    pub rate_limit: Option<(u64, Duration)>,
    pub targets: Vec<TargetUrl>,
    pub extra: BTreeMap<String, String>,
}

impl ConfigTable {
    /// Build a table from a flat `key -> value` map, the shape a config-file
    /// parser or `configureByString` backend hands `configure`. `log_target`
    /// may repeat (one entry per target to add).
    pub fn from_flat_map(entries: &BTreeMap<String, String>) -> Result<ConfigTable> {
        let mut table = ConfigTable::default();
        for (key, value) in entries {
            match key.as_str() {
                "log_level" => table.root_level = Some(parse_level_with_propagation(value)?),
                "log_format" => table.format = Some(value.clone()),
                "log_filter" => table.filter = Some(value.clone()),
                "log_rate_limit" => table.rate_limit = Some(parse_rate_limit(value)?),
                "log_target" => table.targets.push(TargetUrl::parse(value)?),
                _ if key.ends_with(".log_level") => {
                    let qualified_name = key[..key.len() - ".log_level".len()].to_string();
                    let (level, propagate) = parse_level_with_propagation(value)?;
                    table.source_levels.push(LevelDirective { qualified_name, level, propagate });
                }
                _ if key.ends_with(".log_affinity") => {
                    let qualified_name = key[..key.len() - ".log_affinity".len()].to_string();
                    table.source_affinity.push((qualified_name, parse_affinity_mask(value)?));
                }
                other => {
                    table.extra.insert(other.to_string(), value.clone());
                }
            }
        }
        Ok(table)
    }
}

/// `ELOG_REPORT_LEVEL`, recognized during very early init (spec §6
/// "Environment overrides").
pub fn report_level_from_env() -> Option<Level> {
    std::env::var("ELOG_REPORT_LEVEL").ok().and_then(|v| Level::from_name(&v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_url_parses_scheme_type_and_query() {
        let url = TargetUrl::parse("file:///var/log/app.log?buffer_size=4096&lock_mode=true").unwrap();
        assert_eq!(url.scheme, "file");
        assert_eq!(url.kind, "/var/log/app.log");
        assert_eq!(url.get("buffer_size"), Some("4096"));
        assert_eq!(url.get("lock_mode"), Some("true"));
    }

    #[test]
    fn target_url_without_query_has_empty_params() {
        let url = TargetUrl::parse("sys://stderr").unwrap();
        assert_eq!(url.scheme, "sys");
        assert_eq!(url.kind, "stderr");
        assert!(url.params.is_empty());
    }

    #[test]
    fn target_url_rejects_missing_scheme_separator() {
        assert!(TargetUrl::parse("not-a-url").is_err());
    }

    #[test]
    fn level_with_propagation_suffix_parses() {
        assert_eq!(parse_level_with_propagation("warn+:force").unwrap(), (Level::Warn, Propagate::Force));
        assert_eq!(parse_level_with_propagation("info").unwrap(), (Level::Info, Propagate::None));
        assert!(parse_level_with_propagation("info+:bogus").is_err());
    }

    #[test]
    fn affinity_mask_ignores_ids_at_or_above_64() {
        let mask = parse_affinity_mask("0,2,64,9999").unwrap();
        assert_eq!(mask, 0b101);
    }

    #[test]
    fn rate_limit_parses_each_unit() {
        assert_eq!(parse_rate_limit("10:500:ms").unwrap(), (10, Duration::from_millis(500)));
        assert_eq!(parse_rate_limit("10:5:s").unwrap(), (10, Duration::from_secs(5)));
        assert_eq!(parse_rate_limit("10:2:min").unwrap(), (10, Duration::from_secs(120)));
        assert!(parse_rate_limit("malformed").is_err());
    }

    #[test]
    fn config_table_classifies_recognized_and_extra_keys() {
        let mut entries = BTreeMap::new();
        entries.insert("log_level".to_string(), "warn+:strict".to_string());
        entries.insert("svc.db.log_level".to_string(), "debug".to_string());
        entries.insert("svc.db.log_affinity".to_string(), "0,1".to_string());
        entries.insert("log_format".to_string(), "%time% %level% %message%".to_string());
        entries.insert("log_target".to_string(), "sys://stdout".to_string());
        entries.insert("some_unrecognized_key".to_string(), "value".to_string());

        let table = ConfigTable::from_flat_map(&entries).unwrap();
        assert_eq!(table.root_level, Some((Level::Warn, Propagate::Strict)));
        assert_eq!(
            table.source_levels,
            vec![LevelDirective { qualified_name: "svc.db".to_string(), level: Level::Debug, propagate: Propagate::None }]
        );
        assert_eq!(table.source_affinity, vec![("svc.db".to_string(), 0b11)]);
        assert_eq!(table.format.as_deref(), Some("%time% %level% %message%"));
        assert_eq!(table.targets, vec![TargetUrl::parse("sys://stdout").unwrap()]);
        assert_eq!(table.extra.get("some_unrecognized_key"), Some(&"value".to_string()));
    }
}
