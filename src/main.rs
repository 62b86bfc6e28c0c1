use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kube::api::{Api, ListParams};
use release_operator::config::OperatorConfig;
use release_operator::controller::{self, extract_desired_components, ControllerState};
use release_operator::crd::Release;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version information
    Version,
    /// Validate a configuration file and print the effective settings
    CheckConfig(ConfigArgs),
    /// Show the Releases and desired components in the cluster
    Info(ConfigArgs),
}

#[derive(Parser, Debug)]
struct ConfigArgs {
    /// Path to a TOML configuration file
    #[arg(long, env = "RELEASE_OPERATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Operator namespace, overrides the configuration file
    #[arg(long, env = "OPERATOR_NAMESPACE")]
    namespace: Option<String>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl ConfigArgs {
    fn load(&self) -> anyhow::Result<OperatorConfig> {
        let mut config = match &self.config {
            Some(path) => OperatorConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => OperatorConfig::default(),
        };
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("release-operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::CheckConfig(config_args) => {
            let config = config_args.load()?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Info(config_args) => run_info(config_args).await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn run_info(args: ConfigArgs) -> anyhow::Result<()> {
    let config = args.load()?;
    let client = kube::Client::try_default()
        .await
        .context("connecting to Kubernetes")?;

    let api: Api<Release> = Api::namespaced(client, &config.namespace);
    let releases = api
        .list(&ListParams::default())
        .await
        .context("listing Releases")?
        .items;
    let desired = extract_desired_components(&releases);

    println!("Releases: {}", releases.len());
    println!("Desired components: {}", desired.len());
    for key in desired.keys() {
        println!("  {key}");
    }
    Ok(())
}

async fn run_operator(args: RunArgs) -> anyhow::Result<()> {
    init_tracing(args.log_json);
    let config = args.config.load()?;

    info!(
        "Starting release-operator v{} in namespace {}",
        env!("CARGO_PKG_VERSION"),
        config.namespace
    );

    let client = kube::Client::try_default()
        .await
        .context("connecting to Kubernetes")?;
    info!("Connected to Kubernetes cluster");

    let state = Arc::new(ControllerState {
        client,
        config: Arc::new(config),
    });
    controller::run_controller(state).await?;
    Ok(())
}
