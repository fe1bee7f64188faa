use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use routekit::{ActionMapper, ClassRegistry, ObjectFactory, Route};
use routekit_bootstrap::{build_configuration, wait_for_shutdown, AppConfig, CliArgs};
use serde_json::{Map, Value};

use std::path::{Path, PathBuf};
use std::sync::Arc;

mod handlers;
mod transport;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// RouteKit Server - routes action requests to configured handlers
#[derive(Parser)]
#[command(name = "routekit-server")]
#[command(about = "RouteKit Server - routes action requests to configured handlers")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra routing sources merged after the configured ones
    #[arg(short, long = "routes")]
    routes: Vec<String>,

    /// Maximum concurrent dispatches (overrides config)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve newline-delimited JSON dispatch requests on stdin/stdout
    Serve,
    /// Validate configuration and routing table, then exit
    Check,
    /// Show which routing key a request would match
    Resolve {
        #[arg(long, default_value = "")]
        sender: String,
        #[arg(long, default_value = "")]
        context: String,
        #[arg(long, default_value = "")]
        action: String,
    },
    /// Dispatch a single request and print the result
    Dispatch {
        #[arg(long, default_value = "")]
        sender: String,
        #[arg(long, default_value = "")]
        context: String,
        #[arg(long, default_value = "")]
        action: String,
        /// Request values as key=value; values parse as JSON when possible
        #[arg(long = "value", value_parser = parse_key_value)]
        values: Vec<(String, Value)>,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        print_config: cli.print_config,
        verbose: cli.verbose,
        workers: cli.workers,
        routes: cli.routes.clone(),
    };

    // defaults -> YAML (if provided) -> env (APP__*) -> CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.clone().unwrap_or_default();
    routekit_bootstrap::init_logging_unified(&logging_config, Path::new(&config.server.home_dir));

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    // Relative routing sources are looked up next to the config file.
    let base_dir = match cli.config.as_deref().and_then(Path::parent) {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => std::env::current_dir().context("Failed to read current directory")?,
    };
    let mapper = build_mapper(&config, &base_dir)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(mapper, config.server.workers).await,
        Commands::Check => check_routes(&mapper),
        Commands::Resolve {
            sender,
            context,
            action,
        } => {
            match mapper.resolve(&sender, &context, &action) {
                Some((key, value)) => println!("{key} = {value}"),
                None => println!("no route"),
            }
            Ok(())
        }
        Commands::Dispatch {
            sender,
            context,
            action,
            values,
        } => {
            let input = transport::DispatchInput {
                id: None,
                sender,
                context,
                action,
                format: None,
                values: values.into_iter().collect::<Map<_, _>>(),
            };
            let output = transport::dispatch_one(&mapper, input);
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
    }
}

fn build_mapper(config: &AppConfig, base_dir: &Path) -> Result<Arc<ActionMapper>> {
    let configuration = build_configuration(config, base_dir)?;
    let classes = ClassRegistry::discover().context("Failed to collect component classes")?;
    tracing::info!(classes = ?classes.names(), "component classes registered");

    let factory = Arc::new(ObjectFactory::new(Arc::new(configuration), classes));
    let mapper = ActionMapper::from_factory(factory)
        .context("Failed to build action mapper")?
        .with_routing_section(config.routing.section.clone());
    Ok(Arc::new(mapper))
}

async fn run_server(mapper: Arc<ActionMapper>, workers: usize) -> Result<()> {
    tracing::info!(workers, section = mapper.routing_section(), "RouteKit Server starting");
    let shutdown = async {
        if let Err(e) = wait_for_shutdown().await {
            tracing::error!(error = %e, "signal handling failed; shutting down");
        }
    };
    let served = transport::serve(
        mapper,
        tokio::io::BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        workers,
        shutdown,
    )
    .await?;
    tracing::info!(served, "RouteKit Server stopped");
    Ok(())
}

/// Every routing entry must name a registered handler class.
fn check_routes(mapper: &ActionMapper) -> Result<()> {
    let section = mapper.routing_section();
    let factory = mapper.factory();
    let entries = factory
        .configuration()
        .get_section_raw(section)
        .with_context(|| format!("Routing section '{section}' not found"))?;

    let mut problems = Vec::new();
    for (key, value) in &entries {
        match Route::parse(value) {
            Some(route) if factory.classes().contains(&route.class) => {}
            Some(route) => problems.push(format!("{key}: unknown handler class '{}'", route.class)),
            None => problems.push(format!("{key}: no handler named")),
        }
    }

    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("{problem}");
        }
        bail!("{} invalid routing entries", problems.len());
    }
    println!("Configuration is valid ({} routes)", entries.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_arguments() {
        assert_eq!(
            parse_key_value("n=3").unwrap(),
            ("n".to_string(), Value::from(3))
        );
        assert_eq!(
            parse_key_value("name=Ada").unwrap(),
            ("name".to_string(), Value::from("Ada"))
        );
        assert!(parse_key_value("bare").is_err());
    }

    #[test]
    fn check_flags_unknown_classes() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("routes.ini"),
            "[actionmapping]\n??echo = Echo\n??bad = Nope::run\n",
        )
        .unwrap();
        let mut config = AppConfig::default();
        config.routing.files = vec!["routes.ini".into()];

        let mapper = build_mapper(&config, tmp.path()).unwrap();
        let err = check_routes(&mapper).unwrap_err();
        assert!(err.to_string().contains("1 invalid"));
    }
}
