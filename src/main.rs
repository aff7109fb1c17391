use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use slow_planet::config::{ClientConfig, Selection};
use slow_planet::download_plan::DownloadPlan;
use slow_planet::Client;

#[derive(Parser)]
#[command(about = "Search, activate and download satellite imagery assets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a selection template to start from
    Init { path: PathBuf },
    /// Print the items a selection matches
    Search {
        #[arg(short, long)]
        selection: PathBuf,
    },
    /// Turn a selection into a download plan
    Plan {
        #[arg(short, long)]
        selection: PathBuf,
        #[arg(short, long, default_value = "./outputs")]
        output: PathBuf,
    },
    /// Activate, wait for and download every task of a plan
    Execute {
        #[arg(short, long)]
        plan: PathBuf,
    },
    /// Show the activation status of one asset
    Status {
        #[arg(long)]
        item_type: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        asset: String,
    },
}

fn client() -> Result<Client<slow_planet::http::ReqwestHttp>> {
    let config = ClientConfig::from_env()?;
    Ok(Client::from_config(config)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Init { path } => {
            Selection::template()?.write(&path)?;
            info!("selection template written to {:?}", path);
        }
        Command::Search { selection } => {
            let selection = Selection::read(selection)?;
            let filter = selection
                .filter
                .as_ref()
                .ok_or(anyhow::anyhow!("selection has no filter"))?;
            let result = client()?
                .search(&selection.item_types, filter, selection.limit)
                .await?;
            for item in result.items.iter() {
                println!(
                    "{}\t{}\t{}",
                    item.id,
                    item.acquired().map(|t| t.to_rfc3339()).unwrap_or_default(),
                    item.cloud_cover().map(|c| c.to_string()).unwrap_or_default()
                );
            }
        }
        Command::Plan { selection, output } => {
            let selection = Selection::read(selection)?;
            let plan = DownloadPlan::from_selection(&client()?, &selection, &output).await?;
            let plan_path = output.join("download_plan.json");
            plan.write(&plan_path)?;
            info!("{} tasks written to {:?}", plan.tasks().len(), plan_path);
        }
        Command::Execute { plan } => {
            let plan = DownloadPlan::read(plan)?;
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });
            plan.execute(&client()?, &cancel).await?;
        }
        Command::Status { item_type, id, asset } => {
            let client = client()?;
            let asset = client.asset(&item_type, &id, &asset).await?;
            let status = client.poll(&asset).await?;
            println!("{}\t{:?}", asset.name, status);
        }
    }

    Ok(())
}
