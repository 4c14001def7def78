//! crudforge provisions a serverless CRUD service on AWS in a single command.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;

use cli::{Asset, Cli, Command, ConfigArgs};
use crudforge_deploy::{
    AwsClients, Deployment, DeploymentConfig, ProvisionResult, SmokeRunner, handler,
    publish::workflow,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match cli.command {
        Command::Deploy { config, output } => deploy(&config, output.as_deref()).await,
        Command::Plan { config, save } => plan(&config, save.as_deref()),
        Command::Render {
            asset,
            config,
            result,
        } => render(asset, &config, result.as_deref()),
        Command::Smoke { url, result } => {
            let url = match (url, result) {
                (Some(url), _) => url,
                (None, Some(path)) => ProvisionResult::load_from_file(&path)?.invoke_url()?,
                (None, None) => anyhow::bail!("Either --url or --result is required"),
            };
            smoke(&url).await
        }
    }
}

fn load_config(args: &ConfigArgs) -> Result<DeploymentConfig> {
    let config = args.resolve()?;
    tracing::info!(
        config_path = ?args.config_path(),
        service_name = %config.service_name,
        region = %config.region,
        publish = config.wants_publish(),
        "Configuration resolved"
    );
    Ok(config)
}

async fn deploy(args: &ConfigArgs, output: Option<&std::path::Path>) -> Result<()> {
    let config = load_config(args)?;
    let clients = AwsClients::from_region(&config.region).await;

    let result = Deployment::new(&config, &clients)?.run().await?;

    if let Some(path) = output {
        result.save_to_file(path)?;
    }

    let json = serde_json::to_string_pretty(&result).context("Failed to serialize result")?;
    println!("{}", json);
    println!("{}", result.to_table());
    Ok(())
}

fn plan(args: &ConfigArgs, save: Option<&std::path::Path>) -> Result<()> {
    let config = load_config(args)?;

    let mut names = Table::new();
    names.set_header(vec!["Resource", "Name"]);
    names.add_row(vec!["Execution role".to_string(), config.role_name()]);
    names.add_row(vec!["Data table".to_string(), config.table_name()]);
    names.add_row(vec!["Function".to_string(), config.function_name()]);
    names.add_row(vec!["REST API".to_string(), config.api_name()]);
    if config.wants_publish() {
        names.add_row(vec!["Repository".to_string(), config.repository_name()]);
    }

    let toml = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
    println!("{}", toml);
    println!("{}", names);

    if let Some(path) = save {
        config.save_to_file(path)?;
    }
    Ok(())
}

fn render(asset: Asset, args: &ConfigArgs, result: Option<&std::path::Path>) -> Result<()> {
    let rendered = match asset {
        Asset::Handler => {
            let config = load_config(args)?;
            handler::render(&config.table_name())?
        }
        Asset::Workflow => {
            let path = result.context("Rendering the workflow requires --result")?;
            let result = ProvisionResult::load_from_file(path)?;
            let config = load_config(args)?;
            workflow::render(&result, &config.publish.branch)?
        }
    };
    print!("{}", rendered);
    Ok(())
}

async fn smoke(url: &url::Url) -> Result<()> {
    tracing::info!(%url, "Running smoke checks...");
    let report = SmokeRunner::new(url)?.run().await?;
    println!("{}", report.to_table());

    if !report.passed() {
        anyhow::bail!("Deployed stage does not honour the handler contract");
    }
    tracing::info!("All smoke checks passed");
    Ok(())
}
