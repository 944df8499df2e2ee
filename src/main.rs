use anyhow::Context;
use clap::{Parser, Subcommand};
use lead_model_manager::config::Config;
use lead_model_manager::ml::{FeatureMap, JsonFileDataSource, LeadScoringService};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lead-model-manager")]
#[command(about = "Train, version, roll back and serve lead conversion models", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Tenant scope (defaults to "default")
    #[arg(short, long, global = true)]
    tenant: Option<String>,

    /// JSON array of training rows used by `train`
    #[arg(long, global = true, default_value = "training_rows.json")]
    rows: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train and publish a new version
    Train,

    /// Score one lead given as a JSON object of features
    Predict {
        #[arg(value_name = "FEATURES_JSON", default_value = "{}")]
        features: String,

        /// Serve this version instead of the active one
        #[arg(long)]
        version: Option<String>,
    },

    /// Score a JSON array of leads read from a file
    PredictBatch {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List stored versions, newest first
    Versions,

    /// Point the tenant back at an earlier version
    Rollback {
        #[arg(value_name = "VERSION_ID")]
        version: String,
    },

    /// Show the active version
    Info,

    /// Show ranked feature importances of the active version
    Importance,

    /// Print the effective configuration
    Config,
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("lead_model_manager={}", config.observability.log_level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config);

    if let Commands::Config = cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    tracing::info!("Starting lead-model-manager v{}", env!("CARGO_PKG_VERSION"));

    let source = Arc::new(JsonFileDataSource::new(cli.rows.clone()));
    let service = LeadScoringService::from_config(config, source)
        .await
        .context("Failed to open model registry")?;
    let tenant = cli.tenant.as_deref();

    match cli.command {
        Commands::Train => {
            let result = service.train(tenant).await;
            print_json(&result)?;
            if result.status() == "error" {
                std::process::exit(1);
            }
        }

        Commands::Predict { features, version } => {
            let features: FeatureMap =
                serde_json::from_str(&features).context("Features must be a JSON object")?;
            let result = match version {
                Some(version) => service.predict_with_version(&features, tenant, &version).await?,
                None => service.predict(&features, tenant).await?,
            };
            print_json(&result)?;
        }

        Commands::PredictBatch { file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let items: Vec<FeatureMap> =
                serde_json::from_slice(&bytes).context("Batch must be a JSON array of objects")?;
            print_json(&service.predict_batch(&items, tenant).await?)?;
        }

        Commands::Versions => print_json(&service.list_versions(tenant).await?)?,

        Commands::Rollback { version } => print_json(&service.rollback(tenant, &version).await?)?,

        Commands::Info => match service.get_model_info(tenant).await? {
            Some(info) => print_json(&info)?,
            None => println!("No model trained for tenant {}", tenant.unwrap_or("default")),
        },

        Commands::Importance => print_json(&service.get_feature_importance(tenant).await?)?,

        // printed before the service is opened
        Commands::Config => {}
    }

    Ok(())
}
