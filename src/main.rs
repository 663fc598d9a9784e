use anyhow::Context;
use clap::{Parser, Subcommand};
use pstryk_energy_meter::{
    ClientSettings, ConfigFlow, ConfigStore, FlowResult, Hub, OptionsFlow, SetupForm,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Where configured meters are stored.
    #[clap(long, env = "PSTRYK_CONFIG", default_value = "pstryk_energy_meter.json")]
    config: PathBuf,

    /// Timeout for the `/info` identity check.
    #[clap(
        long,
        env = "PSTRYK_INFO_TIMEOUT_SECS",
        default_value = "2",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    info_timeout_secs: u64,

    /// Timeout for the periodic `/state` poll. Unset uses the HTTP client default.
    #[clap(
        long,
        env = "PSTRYK_STATE_TIMEOUT_SECS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    state_timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a meter and add it to the configuration.
    Add {
        #[clap(long)]
        name: String,
        #[clap(long)]
        host: String,
    },
    /// Change the poll interval of a configured meter.
    Options {
        #[clap(long)]
        entry_id: String,
        /// Seconds between polls, 5 to 3600.
        #[clap(long, allow_negative_numbers = true)]
        update_interval: i64,
    },
    /// Poll every configured meter until interrupted.
    Run,
}

impl Args {
    fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            info_timeout: Duration::from_secs(self.info_timeout_secs),
            state_timeout: self.state_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = args.client_settings();
    let mut store = ConfigStore::open(&args.config)?;
    for entry_id in store.migrate() {
        error!(%entry_id, "Configuration entry cannot be migrated, leaving it untouched");
    }
    if store.is_dirty() {
        store.save()?;
    }

    match args.command {
        Command::Add { name, host } => {
            match ConfigFlow::new(settings)
                .submit(SetupForm { name, host }, &store)
                .await
            {
                FlowResult::CreateEntry(entry) => {
                    store.add(&entry);
                    store.save()?;
                    info!(entry_id = %entry.entry_id, serial = %entry.unique_id, "Meter added");
                }
                FlowResult::ShowForm(errors) => {
                    for (field, error) in errors.iter() {
                        error!(field, %error, "Invalid input");
                    }
                    anyhow::bail!("meter was not added");
                }
                FlowResult::Abort(reason) => {
                    warn!(?reason, "Meter was not added");
                }
            }
        }
        Command::Options {
            entry_id,
            update_interval,
        } => {
            let options = match OptionsFlow::submit(update_interval) {
                Ok(options) => options,
                Err(errors) => {
                    for (field, error) in errors.iter() {
                        error!(field, %error, "Invalid input");
                    }
                    anyhow::bail!("options were not changed");
                }
            };
            store.update_options(&entry_id, options)?;
            store.save()?;
            info!(%entry_id, update_interval = options.update_interval, "Options saved");
        }
        Command::Run => run(store, settings).await?,
    }

    Ok(())
}

async fn run(store: ConfigStore, settings: ClientSettings) -> anyhow::Result<()> {
    let mut hub = Hub::new(settings);
    let mut subscriptions = Vec::new();

    for entry in store.entries() {
        let entry_id = entry.entry_id.clone();
        match hub.setup_entry(entry).await {
            Ok(integration) => {
                for point in integration.data_points() {
                    info!(name = %point.name(), state = %point.state(), "Initial state");
                    subscriptions.push(point.subscribe(|point, state| {
                        let unit = point.descriptor().unit;
                        info!(name = %point.name(), %state, %unit, "Updated");
                    }));
                }
            }
            Err(err) => error!(%entry_id, error = %err, "Meter setup failed"),
        }
    }

    if hub.is_empty() {
        anyhow::bail!(
            "no meter could be set up from {}",
            store.path().display()
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutting down");
    drop(subscriptions);
    hub.unload_all().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_must_be_positive() {
        let args = Args::try_parse_from(["pstryk", "--state-timeout-secs", "10", "run"]).unwrap();
        assert_eq!(
            args.client_settings(),
            ClientSettings {
                info_timeout: Duration::from_secs(2),
                state_timeout: Some(Duration::from_secs(10)),
            }
        );

        assert!(Args::try_parse_from(["pstryk", "--info-timeout-secs", "0", "run"]).is_err());
        assert!(Args::try_parse_from(["pstryk", "--state-timeout-secs", "0", "run"]).is_err());
    }
}
