//! Console and rotating-file logging driven by the `logging` config block.
//!
//! Each non-`default` key names a target prefix (`routekit::mapper`,
//! `routekit_server`) with its own levels and optional file. Everything else
//! falls through to the `default` section.

use crate::config::{LoggingConfig, LoggingSection};
use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};
use parking_lot::Mutex;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::Targets, fmt, util::SubscriberInitExt, Layer};

// Dropping the guard would stop the non-blocking console worker.
static CONSOLE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

const DEFAULT_MAX_SIZE_MB: u64 = 100;

fn parse_level(s: &str) -> Option<LevelFilter> {
    match s.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(LevelFilter::TRACE),
        "debug" => Some(LevelFilter::DEBUG),
        "info" => Some(LevelFilter::INFO),
        "warn" => Some(LevelFilter::WARN),
        "error" => Some(LevelFilter::ERROR),
        "off" | "none" => Some(LevelFilter::OFF),
        "" => None,
        _ => Some(LevelFilter::INFO),
    }
}

/// `target == prefix` or `target` starts with `prefix::`.
fn matches_prefix(target: &str, prefix: &str) -> bool {
    target
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

// ---------- rotating file sinks ----------

type Rotating = Arc<Mutex<FileRotate<AppendTimestamp>>>;

#[derive(Clone)]
struct FileSink(Rotating);

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().flush()
    }
}

/// Writer that discards everything when no file claims the record.
struct MaybeSink(Option<FileSink>);

impl Write for MaybeSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.0 {
            Some(sink) => sink.write(buf),
            None => Ok(buf.len()),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.0 {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

/// Picks the file for a record by the longest matching target prefix.
#[derive(Clone, Default)]
struct FileRouter {
    default: Option<FileSink>,
    by_prefix: Vec<(String, FileSink)>,
}

impl FileRouter {
    fn build(cfg: &LoggingConfig, base_dir: &Path) -> Self {
        let mut router = Self::default();
        for (name, section) in cfg {
            let Some(sink) = open_file_sink(name, section, base_dir) else {
                continue;
            };
            if name == "default" {
                router.default = Some(sink);
            } else {
                router.by_prefix.push((name.clone(), sink));
            }
        }
        router
            .by_prefix
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
        router
    }

    fn sink_for(&self, target: &str) -> Option<FileSink> {
        self.by_prefix
            .iter()
            .find(|(prefix, _)| matches_prefix(target, prefix))
            .map(|(_, sink)| sink)
            .or(self.default.as_ref())
            .cloned()
    }

    fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_prefix.is_empty()
    }
}

impl<'a> fmt::MakeWriter<'a> for FileRouter {
    type Writer = MaybeSink;

    fn make_writer(&'a self) -> Self::Writer {
        MaybeSink(self.default.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        MaybeSink(self.sink_for(meta.target()))
    }
}

fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn open_file_sink(name: &str, section: &LoggingSection, base_dir: &Path) -> Option<FileSink> {
    if section.file.trim().is_empty() {
        return None;
    }
    let path = resolve_log_path(&section.file, base_dir);
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!(
                "Failed to create log directory for '{name}': {} ({e})",
                parent.display()
            );
            return None;
        }
    }

    // Backup count wins over age when both are configured.
    let limit = match section.max_backups {
        Some(n) => FileLimit::MaxFiles(n),
        None => FileLimit::Age(chrono::Duration::days(
            i64::from(section.max_age_days.unwrap_or(1)),
        )),
    };
    let max_bytes = section.max_size_mb.unwrap_or(DEFAULT_MAX_SIZE_MB) * 1024 * 1024;

    let rotating = FileRotate::new(
        &path,
        AppendTimestamp::default(limit),
        ContentLimit::BytesSurpassed(usize::try_from(max_bytes).unwrap_or(usize::MAX)),
        Compression::None,
        None,
    );
    Some(FileSink(Arc::new(Mutex::new(rotating))))
}

// ---------- level targets ----------

#[derive(Clone, Copy)]
enum Sink {
    Console,
    File,
}

fn build_targets(cfg: &LoggingConfig, sink: Sink, has_default_file: bool) -> Targets {
    let level_of = |section: &LoggingSection| match sink {
        Sink::Console => parse_level(&section.console_level),
        Sink::File => parse_level(&section.file_level),
    };

    let fallback = match sink {
        Sink::Console => LevelFilter::INFO,
        Sink::File if has_default_file => LevelFilter::INFO,
        Sink::File => LevelFilter::OFF,
    };
    let default_level = cfg.get("default").and_then(&level_of).unwrap_or(fallback);

    let mut targets = Targets::new().with_default(default_level);
    for (name, section) in cfg.iter().filter(|(k, _)| k.as_str() != "default") {
        if matches!(sink, Sink::File) && section.file.trim().is_empty() {
            continue;
        }
        if let Some(level) = level_of(section) {
            targets = targets.with_target(name.clone(), level);
        }
    }
    targets
}

// ---------- public init ----------

/// Install the global subscriber from `cfg`; relative log files land under `base_dir`.
///
/// `RUST_LOG`, when set, caps both sinks. Calling this twice is harmless;
/// the second subscriber is ignored.
pub fn init_logging_unified(cfg: &LoggingConfig, base_dir: &Path) {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("LogTracer init skipped: {e}");
    }

    if cfg.is_empty() {
        init_minimal();
        return;
    }

    let router = FileRouter::build(cfg, base_dir);
    let console_targets = build_targets(cfg, Sink::Console, false);
    let file_targets = build_targets(cfg, Sink::File, router.default.is_some());
    install_subscriber(console_targets, file_targets, router);
}

fn install_subscriber(console_targets: Targets, file_targets: Targets, router: FileRouter) {
    use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

    let env = EnvFilter::try_from_default_env().ok();

    let (nb_stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = CONSOLE_GUARD.set(guard);

    let console_layer = fmt::layer()
        .with_writer(nb_stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(console_targets);

    let file_layer = (!router.is_empty()).then(|| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_level(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(router)
            .with_filter(file_targets)
    });

    let _ = Registry::default()
        .with(env)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

/// INFO to stderr, honoring `RUST_LOG`.
pub fn init_minimal() {
    use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let _ = Registry::default().with(env).with(fmt_layer).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn section(console: &str, file: &str, file_level: &str) -> LoggingSection {
        LoggingSection {
            console_level: console.into(),
            file: file.into(),
            file_level: file_level.into(),
            max_age_days: None,
            max_backups: Some(2),
            max_size_mb: Some(1),
        }
    }

    #[test]
    fn level_names() {
        assert_eq!(parse_level("DEBUG"), Some(LevelFilter::DEBUG));
        assert_eq!(parse_level("off"), Some(LevelFilter::OFF));
        assert_eq!(parse_level(""), None);
        assert_eq!(parse_level("loud"), Some(LevelFilter::INFO));
    }

    #[test]
    fn prefix_matching_respects_path_boundaries() {
        assert!(matches_prefix("routekit", "routekit"));
        assert!(matches_prefix("routekit::mapper", "routekit"));
        assert!(!matches_prefix("routekit_server", "routekit"));
        assert!(!matches_prefix("route", "routekit"));
    }

    #[test]
    fn router_prefers_longest_prefix_then_default() {
        let tmp = tempdir().unwrap();
        let mut cfg = LoggingConfig::new();
        cfg.insert("default".into(), section("info", "logs/all.log", "debug"));
        cfg.insert("routekit".into(), section("info", "logs/kit.log", "debug"));
        cfg.insert(
            "routekit::mapper".into(),
            section("debug", "logs/mapper.log", "trace"),
        );
        cfg.insert("quiet".into(), section("warn", "", ""));

        let router = FileRouter::build(&cfg, tmp.path());
        assert_eq!(router.by_prefix.len(), 2);
        assert_eq!(router.by_prefix[0].0, "routekit::mapper");

        let mapper = router.sink_for("routekit::mapper").unwrap();
        assert!(Arc::ptr_eq(&mapper.0, &router.by_prefix[0].1 .0));
        let kit = router.sink_for("routekit::factory").unwrap();
        assert!(Arc::ptr_eq(&kit.0, &router.by_prefix[1].1 .0));
        let other = router.sink_for("hyper").unwrap();
        assert!(Arc::ptr_eq(&other.0, &router.default.as_ref().unwrap().0));

        assert!(tmp.path().join("logs").is_dir());
    }

    #[test]
    fn empty_router_discards_writes() {
        let router = FileRouter::default();
        assert!(router.is_empty());
        let mut w = MaybeSink(router.sink_for("anything"));
        assert_eq!(w.write(b"dropped").unwrap(), 7);
    }
}
