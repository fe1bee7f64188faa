use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::paths::home_dir::resolve_home_dir;

/// Process settings: where the server lives, which routing sources it loads
/// and how it logs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Logging configuration (optional, uses defaults if None).
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub home_dir: String, // normalized to an absolute path on load
    /// Maximum number of dispatches running at once.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Where routing and component configuration comes from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    /// Configuration sources merged in order; later files win. `${VAR}` is expanded.
    #[serde(default)]
    pub files: Vec<String>,
    /// Section holding the action key table.
    #[serde(default = "default_routing_section")]
    pub section: String,
    /// Merge the built-in `request`/`response`/`event_manager` sections first.
    #[serde(default = "default_true")]
    pub include_defaults: bool,
}

/// Logging configuration - maps subsystem names to their logging settings.
/// Key "default" is the catch-all for logs that don't match explicit subsystems.
pub type LoggingConfig = HashMap<String, LoggingSection>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingSection {
    pub console_level: String, // "info", "debug", "error", "off"
    #[serde(default)]
    pub file: String, // "logs/routekit.log"; empty disables the file sink
    #[serde(default)]
    pub file_level: String,
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

fn default_workers() -> usize {
    4
}

fn default_routing_section() -> String {
    routekit::mapper::DEFAULT_ROUTING_SECTION.to_string()
}

fn default_true() -> bool {
    true
}

const fn default_subdir() -> &'static str {
    ".routekit"
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // Empty => $HOME/.routekit (or %APPDATA%/.routekit)
            home_dir: String::new(),
            workers: default_workers(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            section: default_routing_section(),
            include_defaults: true,
        }
    }
}

/// Create a default logging configuration.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        LoggingSection {
            console_level: "info".to_string(),
            file: "logs/routekit.log".to_string(),
            file_level: "debug".to_string(),
            max_age_days: Some(7),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            routing: RoutingConfig::default(),
            logging: Some(default_logging_config()),
        }
    }
}

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    /// Also normalizes `server.home_dir` into an absolute path and creates the directory.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        // Logging stays None unless YAML/ENV provide it.
        let base = AppConfig {
            server: ServerConfig::default(),
            routing: RoutingConfig::default(),
            logging: None,
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(config_path.as_ref()))
            // Example: APP__SERVER__WORKERS=8 maps to server.workers
            .merge(Env::prefixed("APP__").split("__"));

        let mut config: AppConfig = figment
            .extract()
            .with_context(|| "Failed to extract config from figment".to_string())?;

        normalize_home_dir_inplace(&mut config.server)
            .context("Failed to resolve server.home_dir")?;

        Ok(config)
    }

    /// Load configuration from file or create with default values.
    /// Also normalizes `server.home_dir` into an absolute path and creates the directory.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => {
                let mut c = Self::default();
                normalize_home_dir_inplace(&mut c.server)
                    .context("Failed to resolve server.home_dir (defaults)")?;
                Ok(c)
            }
        }
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(workers) = args.workers {
            self.server.workers = workers.max(1);
        }
        self.routing.files.extend(args.routes.iter().cloned());

        // Set logging level based on verbose flags for "default" section.
        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let Some(default_section) = logging.get_mut("default") {
            default_section.console_level = match args.verbose {
                0 => default_section.console_level.clone(), // keep
                1 => "debug".to_string(),
                _ => "trace".to_string(),
            };
        }
    }

    /// Routing sources with `${VAR}` expanded and relative paths joined to `base_dir`.
    pub fn routing_files(&self, base_dir: &Path) -> Result<Vec<PathBuf>> {
        self.routing
            .files
            .iter()
            .map(|raw| {
                let expanded = expand_env_vars(raw)
                    .with_context(|| format!("Invalid routing file entry '{raw}'"))?;
                let path = PathBuf::from(expanded);
                Ok(if path.is_absolute() {
                    path
                } else {
                    base_dir.join(path)
                })
            })
            .collect()
    }
}

/// Command line arguments structure.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub print_config: bool,
    pub verbose: u8,
    pub workers: Option<usize>,
    /// Extra routing files appended after the configured ones.
    pub routes: Vec<String>,
}

/// Normalize `server.home_dir` using `resolve_home_dir` and store the absolute path back.
fn normalize_home_dir_inplace(server: &mut ServerConfig) -> Result<()> {
    let opt = if server.home_dir.trim().is_empty() {
        None
    } else {
        Some(server.home_dir.clone())
    };

    let resolved: PathBuf = resolve_home_dir(opt, default_subdir(), /*create*/ true)
        .context("home_dir normalization failed")?;

    server.home_dir = resolved.to_string_lossy().to_string();
    Ok(())
}

/// Replaces `${VARNAME}` with the environment variable value.
/// Returns error if any referenced env var is missing.
pub fn expand_env_vars(text: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .context("Invalid env placeholder pattern")?;
    let mut result = text.to_string();
    for cap in re.captures_iter(text) {
        let full_match = &cap[0];
        let var_name = &cap[1];
        let value = std::env::var(var_name)
            .with_context(|| format!("Environment variable '{var_name}' not found"))?;
        result = result.replace(full_match, &value);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};
    use tempfile::tempdir;

    fn is_normalized_path(p: &str) -> bool {
        let pb = PathBuf::from(p);
        pb.is_absolute() && !p.starts_with('~')
    }

    #[test]
    fn default_config_structure() {
        let config = AppConfig::default();
        assert_eq!(config.server.home_dir, "");
        assert_eq!(config.server.workers, 4);
        assert!(config.routing.files.is_empty());
        assert_eq!(config.routing.section, "actionmapping");
        assert!(config.routing.include_defaults);

        let logging = config.logging.as_ref().unwrap();
        assert_eq!(logging["default"].console_level, "info");
        assert_eq!(logging["default"].file, "logs/routekit.log");
    }

    #[test]
    fn load_layered_reads_yaml_and_normalizes_home_dir() {
        let tmp = tempdir().unwrap();
        let cfg_path = tmp.path().join("cfg.yaml");
        let home = tmp.path().join("home");

        let yaml = format!(
            r#"
server:
  home_dir: "{}"
  workers: 2

routing:
  files: ["routes.ini", "/etc/routekit/extra.ini"]
  section: "api_routes"
  include_defaults: false

logging:
  default:
    console_level: debug
    file: "logs/default.log"
"#,
            home.display()
        );
        fs::write(&cfg_path, yaml).unwrap();

        let config = AppConfig::load_layered(&cfg_path).unwrap();
        assert!(is_normalized_path(&config.server.home_dir));
        assert!(home.exists());
        assert_eq!(config.server.workers, 2);
        assert_eq!(config.routing.section, "api_routes");
        assert!(!config.routing.include_defaults);

        let files = config.routing_files(tmp.path()).unwrap();
        assert_eq!(files[0], tmp.path().join("routes.ini"));
        assert_eq!(files[1], PathBuf::from("/etc/routekit/extra.ini"));

        let logging = config.logging.as_ref().unwrap();
        assert_eq!(logging["default"].console_level, "debug");
    }

    #[test]
    fn routing_section_defaults_when_omitted() {
        let tmp = tempdir().unwrap();
        let cfg_path = tmp.path().join("cfg.yaml");
        fs::write(
            &cfg_path,
            format!("server:\n  home_dir: \"{}\"\n", tmp.path().display()),
        )
        .unwrap();

        let config = AppConfig::load_layered(&cfg_path).unwrap();
        assert_eq!(config.routing.section, "actionmapping");
        assert!(config.routing.include_defaults);
        assert!(config.logging.is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let tmp = tempdir().unwrap();
        let cfg_path = tmp.path().join("cfg.yaml");
        fs::write(&cfg_path, "server:\n  home_dir: \"/tmp\"\n  port: 1\n").unwrap();
        assert!(AppConfig::load_layered(&cfg_path).is_err());
    }

    #[test]
    fn cli_overrides() {
        let mut config = AppConfig::default();
        let args = CliArgs {
            verbose: 2,
            workers: Some(0),
            routes: vec!["more.ini".into()],
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);

        assert_eq!(config.server.workers, 1);
        assert_eq!(config.routing.files, vec!["more.ini".to_string()]);
        let logging = config.logging.as_ref().unwrap();
        assert_eq!(logging["default"].console_level, "trace");
    }

    #[test]
    fn env_expansion_in_routing_files() {
        env::set_var("ROUTEKIT_TEST_ROUTES_DIR", "/srv/routes");
        let mut config = AppConfig::default();
        config.routing.files = vec!["${ROUTEKIT_TEST_ROUTES_DIR}/main.ini".into()];
        let files = config.routing_files(Path::new("/unused")).unwrap();
        assert_eq!(files, vec![PathBuf::from("/srv/routes/main.ini")]);

        config.routing.files = vec!["${ROUTEKIT_TEST_SURELY_MISSING}/x.ini".into()];
        let err = config.routing_files(Path::new("/unused")).unwrap_err();
        assert!(format!("{err:#}").contains("ROUTEKIT_TEST_SURELY_MISSING"));
    }

    #[test]
    fn yaml_serialization_round_trips() {
        let config = AppConfig::default();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("server:"));
        assert!(yaml.contains("routing:"));
        assert!(yaml.contains("logging:"));
        let back: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.routing.section, config.routing.section);
    }
}
