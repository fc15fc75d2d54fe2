//! sfauth CLI entry point

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use anyhow::{Context, Result};
use sfauth::{ui, Error};

#[derive(Parser)]
#[command(name = "sfauth")]
#[command(about = "Connect Salesforce orgs with OAuth2 + PKCE and keep their credentials under an alias")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate in the browser and save the org under ALIAS
    Connect {
        /// Environment alias; "org" uses SF_LOGIN_URL, anything else SF_SANDBOX_URL
        #[arg(default_value = sfauth::config::PRODUCTION_ALIAS)]
        alias: String,

        /// Also open the authorization URL in the default browser
        #[arg(long)]
        open: bool,
    },

    /// List connected environments
    List,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            ui::print_error(&format!("{:#}", e));
            e.downcast_ref::<Error>().map(Error::exit_code).unwrap_or(2)
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Connect { alias, open } => {
            let config = sfauth::config::load(&alias)?;
            let connected = sfauth::connect::connect(&config, &alias, open).await?;

            ui::print_success("Environment connected and saved");
            ui::print_step(&format!(
                "Access token: {}",
                sfauth::environments::mask_token(&connected.record.access_token)
            ));
            ui::print_step(&format!("Registry: {}", config.environments_path().display()));
        }

        Commands::List => {
            let data_dir = sfauth::config::load_data_dir()?;
            let store = sfauth::environments::EnvironmentStore::new(data_dir.join("environments.json"));
            let envs = store
                .load()
                .with_context(|| format!("reading {}", store.path().display()))?;

            if envs.is_empty() {
                ui::print_step("No environments connected yet. Run 'sfauth connect [alias]'.");
                return Ok(());
            }

            ui::print_header("Connected environments");
            for (index, env) in envs.iter().enumerate() {
                ui::print_environment(index, env);
            }
        }
    }

    Ok(())
}
