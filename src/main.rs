use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use store_operator::{
    config::OperatorConfig,
    controller::{self, ControllerState, KubeStoreApi, Reconciler, RetryTracker},
    crd::Store,
    storage::{ConfigMapMetadataStore, HttpObjectStore},
    Error,
};
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
    /// Print the Store CustomResourceDefinition as YAML
    Crd,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Namespace to watch; all namespaces when unset
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Base URL of the S3-compatible object store
    #[arg(long, env = "OBJECT_STORE_ENDPOINT")]
    object_store_endpoint: Option<String>,

    /// Region sent as the bucket location constraint
    #[arg(long, env = "OBJECT_STORE_REGION")]
    object_store_region: Option<String>,

    /// Path to a TOML configuration file
    #[arg(long, env = "STORE_OPERATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum number of Stores reconciled in parallel
    #[arg(long, env = "CONCURRENCY")]
    concurrency: Option<u16>,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Port of the REST API server
    #[cfg(feature = "rest-api")]
    #[arg(long, env = "API_PORT", default_value_t = 8080)]
    api_port: u16,
}

impl RunArgs {
    /// File settings with command-line overrides applied
    fn operator_config(&self) -> Result<OperatorConfig, Error> {
        let mut config = match &self.config {
            Some(path) => OperatorConfig::from_file(path)?,
            None => OperatorConfig::default(),
        };
        if let Some(endpoint) = &self.object_store_endpoint {
            config.object_store.endpoint = endpoint.clone();
        }
        if let Some(region) = &self.object_store_region {
            config.object_store.region = Some(region.clone());
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("Store Operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Crd => {
            let yaml = serde_yaml::to_string(&Store::crd())
                .map_err(|e| Error::ConfigError(format!("Failed to render CRD: {}", e)))?;
            print!("{}", yaml);
            Ok(())
        }
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    init_tracing(args.log_json);

    info!("Starting Store Operator v{}", env!("CARGO_PKG_VERSION"));

    let config = args.operator_config()?;
    info!(
        "Object store endpoint: {}, concurrency: {}",
        config.object_store.endpoint, config.concurrency
    );

    // Initialize Kubernetes client
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let reconciler = Reconciler::new(
        Arc::new(KubeStoreApi::new(client.clone())),
        Arc::new(HttpObjectStore::new(&config.object_store)?),
        Arc::new(ConfigMapMetadataStore::new(client.clone())),
        &config,
    );

    // Create shared controller state
    let state = Arc::new(ControllerState {
        client,
        reconciler,
        retries: RetryTracker::default(),
        backoff: config.backoff.clone(),
        namespace: args.namespace.clone(),
    });

    // Start the REST API server
    #[cfg(feature = "rest-api")]
    {
        let api_state = state.clone();
        let port = args.api_port;
        tokio::spawn(async move {
            if let Err(e) = store_operator::rest_api::run_server(api_state, port).await {
                tracing::error!("REST API server error: {:?}", e);
            }
        });
    }

    match &args.namespace {
        Some(ns) => info!("Watching Stores in namespace {}", ns),
        None => info!("Watching Stores in all namespaces"),
    }

    controller::run_controller(state, config.concurrency).await
}
