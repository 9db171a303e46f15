//! A high-throughput structured logging engine: hierarchical sources, a
//! fixed-slot target registry with affinity/pass-key dispatch, pre-init
//! record buffering, rate-limited/burst-moderated filtering, and
//! lock-free segmented-file writes (spec §OVERVIEW).
//!
//! This crate root owns the process-wide engine lifecycle
//! (`initialize`/`terminate`/`is_initialized`) and the convenience surface
//! built on top of the lower-level modules — applications normally only
//! touch this module and [`level::Level`].

pub mod config;
pub mod control;
pub mod error;
pub mod filter;
pub mod flush_policy;
pub mod format_cache;
pub mod formatter;
pub mod level;
pub mod logger;
pub mod preinit;
pub mod rate_limiter;
pub mod record;
pub mod record_builder;
pub mod registry;
pub mod report;
pub mod ring_buffer;
pub mod source;
pub mod stats;
pub mod target;

pub use config::{ConfigTable, ConfigValue, TargetUrl};
pub use control::{Control, LevelUpdate};
pub use error::{ElogError, Result};
pub use filter::Filter;
pub use level::Level;
pub use logger::{Logger, MultiPartHandle};
pub use record::LogRecord;
pub use registry::Registry;
pub use report::ReportHandler;
pub use source::{Propagate, Source, SourceTree};
pub use target::Target;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use formatter::Formatter;
use target::buffered_file::BufferedFileWriter;
use target::console::ConsoleTarget;
use target::segmented_file::SegmentedFileTarget;
use target::syslog::{Facility, SyslogTarget};
use target::tracer::TracerTarget;

/// Default output template for built-in targets and `setFormatter`'s
/// starting point, until overridden.
const BUILTIN_DEFAULT_FORMAT: &str = "[%datetime%] %level% %source% %message%";

static DEFAULT_FORMAT: RwLock<Option<String>> = RwLock::new(None);

fn default_template() -> String {
    DEFAULT_FORMAT.read().clone().unwrap_or_else(|| BUILTIN_DEFAULT_FORMAT.to_string())
}

fn resolve_formatter(template: Option<&str>) -> Result<Formatter> {
    let template = template.map(str::to_string).unwrap_or_else(default_template);
    Formatter::compile(&template)
}

/// `setFormatter(template)`: change the default output template consulted
/// by the `addXTarget` convenience constructors when no per-call template
/// is supplied. Does not touch formatters already baked into existing
/// targets — a target's `Formatter` is immutable once built, matching how
/// every concrete target stores it as a plain field rather than behind a
/// mutable cell.
pub fn set_formatter(template: &str) -> Result<()> {
    Formatter::compile(template)?; // validate before committing
    *DEFAULT_FORMAT.write() = Some(template.to_string());
    Ok(())
}

/// Parameters for [`initialize`].
pub struct InitParams {
    pub root_level: Level,
    pub report_level: Level,
    /// Capacity of the pre-init replay buffer; `None` uses [`preinit::DEFAULT_CAPACITY`].
    pub preinit_capacity: Option<usize>,
    /// Install a built-in stderr console target as the catch-all default
    /// target, so records have somewhere to go before the application
    /// configures its own targets.
    pub install_default_stderr_target: bool,
}

impl Default for InitParams {
    fn default() -> Self {
        InitParams {
            root_level: Level::Info,
            report_level: config::report_level_from_env().unwrap_or(Level::Warn),
            preinit_capacity: None,
            install_default_stderr_target: true,
        }
    }
}

struct Engine {
    sources: Arc<SourceTree>,
    registry: Arc<Registry>,
    report: Arc<report::ReportChannel>,
    control: Control,
    default_logger: Logger,
}

static ENGINE: RwLock<Option<Arc<Engine>>> = RwLock::new(None);

fn engine() -> Result<Arc<Engine>> {
    ENGINE
        .read()
        .clone()
        .ok_or_else(|| ElogError::InvalidState("elog is not initialized".to_string()))
}

/// `initialize(params)`. Fails with `InvalidState` if already initialized
/// (spec §9 "double-initialize is an error").
pub fn initialize(params: InitParams) -> Result<()> {
    let mut slot = ENGINE.write();
    if slot.is_some() {
        return Err(ElogError::InvalidState("elog is already initialized".to_string()));
    }

    let sources = Arc::new(SourceTree::new());
    sources.root().set_level(params.root_level, Propagate::None);
    let registry = Arc::new(match params.preinit_capacity {
        Some(capacity) => Registry::with_preinit_capacity(sources.clone(), capacity),
        None => Registry::new(sources.clone()),
    });
    let report_channel = Arc::new(report::ReportChannel::new(&sources, registry.clone(), params.report_level));
    report::install(report_channel.clone());
    let control = Control::new(sources.clone(), registry.clone(), report_channel.clone());
    let default_logger = Logger::new_shared(sources.root(), registry.clone());

    if params.install_default_stderr_target {
        let id = registry.allocate_target_id()?;
        let formatter = resolve_formatter(None)?;
        let target = Arc::new(ConsoleTarget::stderr(id, Level::Trace, formatter));
        registry.set_default_target(target)?;
    }

    *slot = Some(Arc::new(Engine { sources, registry, report: report_channel, control, default_logger }));
    Ok(())
}

/// `isInitialized()`.
pub fn is_initialized() -> bool {
    ENGINE.read().is_some()
}

/// `terminate()`: stops every registered target (including the built-in
/// default, since nothing downstream of it survives a full shutdown),
/// discards anything still buffered in the pre-init queue, and tears the
/// engine down. A second call is a no-op reported through the (still-live,
/// stderr-fallback) report channel rather than an error (spec §9).
pub fn terminate() {
    let mut slot = ENGINE.write();
    match slot.take() {
        Some(engine) => {
            engine.registry.clear_all();
            if let Some(default_target) = engine.registry.default_target() {
                default_target.stop();
            }
            report::uninstall();
        }
        None => report::report_warning("terminate called while elog was not initialized"),
    }
}

/// `getDefaultLogger()`: the logger bound to the root source.
pub fn get_default_logger() -> Result<Logger> {
    Ok(engine()?.default_logger.clone())
}

/// `getSharedLogger(name)`: a thread-local-backed logger bound to `name`,
/// defining the source if it doesn't already exist.
pub fn get_shared_logger(qualified_name: &str) -> Result<Logger> {
    let engine = engine()?;
    let source = engine.sources.define_source(qualified_name, true)?;
    Ok(Logger::new_shared(source, engine.registry.clone()))
}

/// `getPrivateLogger(name)`: a logger with its own record-builder stack,
/// for single-threaded use.
pub fn get_private_logger(qualified_name: &str) -> Result<Logger> {
    let engine = engine()?;
    let source = engine.sources.define_source(qualified_name, true)?;
    Ok(Logger::new_private(source, engine.registry.clone()))
}

/// `defineSource(name)`.
pub fn define_source(qualified_name: &str) -> Result<Arc<Source>> {
    engine()?.sources.define_source(qualified_name, true)
}

/// `getSource(name)`, without creating it.
pub fn get_source(qualified_name: &str) -> Result<Option<Arc<Source>>> {
    Ok(engine()?.sources.get(qualified_name))
}

/// `getSource(id)`.
pub fn get_source_by_id(id: u32) -> Result<Option<Arc<Source>>> {
    Ok(engine()?.sources.get_by_id(id))
}

/// `getRoot()`.
pub fn get_root() -> Result<Arc<Source>> {
    Ok(engine()?.sources.root())
}

/// `visitSources(include, exclude)` — returns the matching `(name, level)`
/// pairs rather than taking a visitor callback, the natural Rust rendition
/// of a read-only tree walk.
pub fn visit_sources(include: Option<&str>, exclude: Option<&str>) -> Result<Vec<(String, Level)>> {
    engine()?.control.list_sources(include, exclude)
}

/// `setLevel(qualifiedName, level, propagate)`.
pub fn set_level(qualified_name: &str, level: Level, propagate: Propagate) -> Result<()> {
    let entry = LevelUpdate { qualified_name: qualified_name.to_string(), level, propagate };
    engine()?.control.update_levels(&[entry], None)
}

/// `updateLevels(entries, reportLevel)` — the bulk control-plane form.
pub fn update_levels(entries: &[LevelUpdate], report_level: Option<Level>) -> Result<()> {
    engine()?.control.update_levels(entries, report_level)
}

/// `reload(configSnapshot)`.
pub fn reload(table: &ConfigTable) -> Result<()> {
    engine()?.control.reload(table)
}

/// `setReportLevel(level)`.
pub fn set_report_level(level: Level) -> Result<()> {
    engine()?.report.set_level(level);
    Ok(())
}

/// `setReportHandler(handler)`.
pub fn set_report_handler(handler: Option<Arc<dyn ReportHandler>>) -> Result<()> {
    engine()?.report.set_handler(handler);
    Ok(())
}

/// `configure(table)`: applies every directive in a [`ConfigTable`] —
/// levels, affinity, global filter, rate limit, and declared targets (via
/// [`TargetUrl`], dispatched by scheme). `log_format` becomes the new
/// default template. Partial application: a bad target URL is reported
/// and skipped rather than aborting the whole call, matching `reload`'s
/// "independent entries" treatment.
pub fn configure(table: &ConfigTable) -> Result<()> {
    let engine = engine()?;
    engine.control.reload(table)?;

    if let Some(format) = &table.format {
        set_formatter(format)?;
    }
    if let Some(filter_expr) = &table.filter {
        report::report_warning(format!(
            "log_filter expression parsing is not implemented; ignoring: {filter_expr}"
        ));
    }
    if let Some((max_msg, window)) = table.rate_limit {
        set_rate_limit(max_msg, window, true)?;
    }
    for target_url in &table.targets {
        if let Err(err) = add_target_from_url(target_url) {
            report::report_warning(format!("log_target {}://{}: {err}", target_url.scheme, target_url.kind));
        }
    }
    Ok(())
}

/// `configureByString(text)`: parse `key=value` lines (one per line, `#`
/// comments, blank lines ignored) into a flat map and apply via [`configure`].
pub fn configure_by_string(text: &str) -> Result<()> {
    let mut entries = std::collections::BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| ElogError::InvalidArgument(format!("malformed config line: {line}")))?;
        entries.insert(key.trim().to_string(), value.trim().to_string());
    }
    let table = ConfigTable::from_flat_map(&entries)?;
    configure(&table)
}

/// `configureByFile(path)`.
pub fn configure_by_file(path: impl AsRef<std::path::Path>) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    configure_by_string(&text)
}

/// `setRateLimit(maxMsg, timeout, replaceGlobal)`. `Filter`'s rate-limit
/// and counting variants hold atomic counters and so can't implement
/// `Clone`; with no way to read back and re-compose the registry's current
/// global filter, `replace_global = false` is not distinguishable from
/// `true` here. A caller that wants the rate limiter combined with another
/// filter should build the combined tree with `Filter::and` and call
/// [`set_filter`] directly instead of going through this convenience.
pub fn set_rate_limit(max_msg: u64, window: Duration, replace_global: bool) -> Result<()> {
    let _ = replace_global;
    let engine = engine()?;
    engine.registry.set_global_filter(Some(Filter::rate_limit(max_msg, window, "global")));
    Ok(())
}

/// `setFilter(filter)`: install (or clear, with `None`) the registry's
/// global filter, evaluated before any per-target filter.
pub fn set_filter(filter: Option<Filter>) -> Result<()> {
    engine()?.registry.set_global_filter(filter);
    Ok(())
}

/// Reserve the next free target id, for a caller about to construct a
/// target whose constructor requires one up front.
pub fn allocate_target_id() -> Result<u32> {
    engine()?.registry.allocate_target_id()
}

/// `addTarget(target)`: register a fully-constructed target (built with an
/// id from [`allocate_target_id`]).
pub fn add_target(target: Arc<dyn Target>) -> Result<()> {
    engine()?.registry.add_target(target)
}

/// `addStdErrTarget(name, level, format)`.
pub fn add_stderr_target(name: &str, level: Level, format: Option<&str>) -> Result<u32> {
    let engine = engine()?;
    let id = engine.registry.allocate_target_id()?;
    let target = Arc::new(ConsoleTarget::new(id, name, level, resolve_formatter(format)?, target::console::ConsoleStream::Stderr));
    engine.registry.add_target(target)?;
    Ok(id)
}

/// `addStdOutTarget(name, level, format)`.
pub fn add_stdout_target(name: &str, level: Level, format: Option<&str>) -> Result<u32> {
    let engine = engine()?;
    let id = engine.registry.allocate_target_id()?;
    let target = Arc::new(ConsoleTarget::new(id, name, level, resolve_formatter(format)?, target::console::ConsoleStream::Stdout));
    engine.registry.add_target(target)?;
    Ok(id)
}

/// `addFileTarget(name, path, level, format, capacity, lockMode)`: a
/// buffered (non-segmented) file sink.
#[allow(clippy::too_many_arguments)]
pub fn add_file_target(
    name: &str,
    path: impl AsRef<std::path::Path>,
    level: Level,
    format: Option<&str>,
    capacity: usize,
    lock_mode: bool,
) -> Result<u32> {
    let engine = engine()?;
    let id = engine.registry.allocate_target_id()?;
    let target = Arc::new(BufferedFileWriter::open(id, name, path, level, resolve_formatter(format)?, capacity, lock_mode)?);
    engine.registry.add_target(target)?;
    Ok(id)
}

/// `addTarget` specialization for the segmented-file sink (spec §4.10);
/// wires the target's `on_warning` scan-diagnostic callback through the
/// Report Channel rather than a bespoke side channel.
#[allow(clippy::too_many_arguments)]
pub fn add_segmented_file_target(
    name: &str,
    dir: impl AsRef<std::path::Path>,
    log_name: &str,
    level: Level,
    format: Option<&str>,
    segment_cap: u64,
    max_segments: u64,
    pending_capacity: Option<usize>,
) -> Result<u32> {
    let engine = engine()?;
    let id = engine.registry.allocate_target_id()?;
    let target = Arc::new(SegmentedFileTarget::open(
        id,
        name,
        dir,
        log_name,
        level,
        resolve_formatter(format)?,
        segment_cap,
        max_segments,
        pending_capacity,
        Box::new(|msg: &str| report::report_warning(msg)),
    )?);
    engine.registry.add_target(target)?;
    Ok(id)
}

/// `addSysLogTarget(name, socketPath, ident, facility, level)`: send
/// records to the standard syslog datagram socket (`/dev/log` in
/// production; a test wires up its own `UnixDatagram` pair instead).
pub fn add_syslog_target(
    name: &str,
    socket_path: impl AsRef<std::path::Path>,
    ident: &str,
    facility: Facility,
    level: Level,
) -> Result<u32> {
    let engine = engine()?;
    let id = engine.registry.allocate_target_id()?;
    let target = Arc::new(SyslogTarget::open(id, name, socket_path, ident, facility, level, resolve_formatter(None)?)?);
    engine.registry.add_target(target)?;
    Ok(id)
}

/// `addTracer(name, level, capacity, format)`: an in-memory ring of
/// formatted lines, for diagnostic dumping.
pub fn add_tracer(name: &str, level: Level, capacity: usize, format: Option<&str>) -> Result<u32> {
    let engine = engine()?;
    let id = engine.registry.allocate_target_id()?;
    let formatter = match format {
        Some(_) => Some(resolve_formatter(format)?),
        None => None,
    };
    let target = Arc::new(TracerTarget::new(id, name, level, capacity, formatter));
    engine.registry.add_target(target)?;
    Ok(id)
}

/// `getTarget(id)`.
pub fn get_target(id: u32) -> Result<Option<Arc<dyn Target>>> {
    Ok(engine()?.registry.get_target(id))
}

/// `getTarget(name)`.
pub fn get_target_by_name(name: &str) -> Result<Option<Arc<dyn Target>>> {
    Ok(engine()?.registry.get_target_by_name(name))
}

/// `removeTarget(id)`.
pub fn remove_target(id: u32) -> Result<()> {
    engine()?.registry.remove_target(id)
}

/// `removeTarget(name)`.
pub fn remove_target_by_name(name: &str) -> Result<()> {
    engine()?.registry.remove_target_by_name(name)
}

/// `clearAllTargets()`.
pub fn clear_all_targets() -> Result<()> {
    engine()?.registry.clear_all();
    Ok(())
}

/// Dispatch a declared `log_target` URL (spec §6 "Target URL grammar") to
/// the matching built-in constructor. `sys://`, `file://`, and a tracer
/// scheme are wired; `async://`, `net://`, `ipc://`, and `db://` describe
/// out-of-scope remote/wrapping sinks (spec Non-goals) and are reported
/// rather than silently dropped.
fn add_target_from_url(url: &TargetUrl) -> Result<()> {
    let level = url
        .get("level")
        .map(|value| Level::from_name(value).ok_or_else(|| ElogError::InvalidArgument(format!("unknown level: {value}"))))
        .transpose()?
        .unwrap_or(Level::Info);
    let name = url.get("name").unwrap_or(&url.kind).to_string();

    match url.scheme.as_str() {
        "sys" => match url.kind.as_str() {
            "stderr" => add_stderr_target(&name, level, None).map(|_| ()),
            "stdout" => add_stdout_target(&name, level, None).map(|_| ()),
            "syslog" => {
                let socket_path = url.get("socket_path").unwrap_or("/dev/log");
                let ident = url.get("ident").unwrap_or(&name).to_string();
                add_syslog_target(&name, socket_path, &ident, Facility::User, level).map(|_| ())
            }
            other => Err(ElogError::InvalidArgument(format!("unsupported sys:// target type: {other}"))),
        },
        "file" => {
            let capacity: usize = url.get("buffer_size").and_then(|v| v.parse().ok()).unwrap_or(64 * 1024);
            let lock_mode = url.get("lock_mode").map(|v| v == "true").unwrap_or(false);
            add_file_target(&name, &url.kind, level, None, capacity, lock_mode).map(|_| ())
        }
        "tracer" => {
            let capacity: usize = url.get("capacity").and_then(|v| v.parse().ok()).unwrap_or(1024);
            add_tracer(&name, level, capacity, None).map(|_| ())
        }
        other => Err(ElogError::InvalidArgument(format!("target scheme not handled by this core build: {other}"))),
    }
}
