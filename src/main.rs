// vmsmith - Main Entry Point
//
// Command-line front end: loads configuration, sets up logging and runs
// one of the build, push, stop or show commands against the tool.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use vmsmith::client::Client;
use vmsmith::config::{Config, DEFAULT_CONFIG_PATH};
use vmsmith::installer::PlistInstaller;
use vmsmith::post::{push_to_registry, resolve_registry_api, stop_artifact};
use vmsmith::steps::{build_pipeline, CancelFlag, RunOutcome, RunState};
use vmsmith::ui::{ConsoleUi, Ui};

/// vmsmith: build macOS VM templates with Anka
#[derive(Parser, Debug)]
#[command(name = "vmsmith")]
#[command(version)]
#[command(about = "Build macOS VM templates from installers or existing VMs", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or clone a VM and bring it to the configured state
    Build,
    /// Push a VM to the configured registry
    Push {
        /// Name of the VM to push
        vm: String,
    },
    /// Stop a VM
    Stop {
        /// Name of the VM to stop
        vm: String,

        /// Stop without waiting for a clean guest shutdown
        #[arg(long)]
        force: bool,
    },
    /// Print a VM's status as JSON
    Show {
        /// Name of the VM
        vm: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = Config::load_from_path(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
    vmsmith::logging::init(&config.logging, args.verbose)?;

    let client = Client::new(Arc::new(config.tool.driver())).with_guest_debug(config.tool.debug);
    let ui: Arc<dyn Ui> = Arc::new(ConsoleUi);

    match args.command {
        Commands::Build => build(&client, ui, config).await,
        Commands::Push { vm } => {
            push(&client, ui.as_ref(), &config, &vm).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Stop { vm, force } => {
            stop_artifact(&client, &vm, force).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show { vm } => {
            let show = client.show(&vm).await?;
            println!("{}", serde_json::to_string_pretty(&show)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn build(client: &Client, ui: Arc<dyn Ui>, config: Config) -> Result<ExitCode> {
    let mut build = config.build.clone();
    build.validate(&mut rand::rng())?;

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling after the current step...");
            on_signal.cancel();
        }
    });

    let mut runner = build_pipeline(client, &build, Box::new(PlistInstaller), cancel);
    let mut state = RunState::new(ui.clone());
    let outcome = match runner.run(&mut state).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Build cleanup failed: {}", e);
            ui.error(&e.to_string());
            return Ok(ExitCode::FAILURE);
        }
    };

    match outcome {
        RunOutcome::Completed => {}
        RunOutcome::Halted => {
            error!("Build halted");
            return Ok(ExitCode::FAILURE);
        }
        RunOutcome::Cancelled => {
            ui.error("Build cancelled");
            return Ok(ExitCode::FAILURE);
        }
    }

    if let Some(artifact) = state.artifact() {
        println!("\n==========================================");
        println!("VM:             {}", artifact.vm_name);
        println!("UUID:           {}", artifact.uuid);
        println!("OS version:     {}", artifact.os_version);
        println!("Darwin version: {}", artifact.darwin_version);
        println!("==========================================");

        if config.registry.push {
            push(client, ui.as_ref(), &config, &artifact.vm_name).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn push(client: &Client, ui: &dyn Ui, config: &Config, vm: &str) -> Result<()> {
    let api = if config.build.force {
        Some(resolve_registry_api(client, &config.registry).await?)
    } else {
        None
    };
    push_to_registry(client, ui, &config.registry, vm, api.as_ref()).await?;
    Ok(())
}
