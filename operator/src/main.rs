use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use tracing_subscriber::EnvFilter;

use opreq_operator::config::{OperatorConfig, RunArgs};
use opreq_operator::controller;
use opreq_operator::crd::{OperandConfig, OperandRegistry, OperandRequest};

#[derive(Parser)]
#[command(name = "opreq-operator")]
#[command(about = "Installs and removes operators and operands requested by OperandRequests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the controller.
    Run(RunArgs),
    /// Print the CRD YAML to stdout.
    Crd,
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            init_tracing(&args.log_level);
            let config = OperatorConfig::from(&args);
            tracing::info!(?config, "starting opreq-operator");

            let client = kube::Client::try_default().await?;
            let version = client.apiserver_version().await?;
            tracing::info!("Connected to Kubernetes {}.{}", version.major, version.minor);

            controller::run(client, config).await;
        }
        Commands::Crd => {
            let crds = [
                serde_yaml::to_string(&OperandRequest::crd())?,
                serde_yaml::to_string(&OperandRegistry::crd())?,
                serde_yaml::to_string(&OperandConfig::crd())?,
            ];
            print!("{}", crds.join("---\n"));
        }
    }
    Ok(())
}
