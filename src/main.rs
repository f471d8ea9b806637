use clap::Parser;

use ybook::cli::commands::{init, serve};
use ybook::cli::{Cli, Commands};
use ybook::config::{ConfigError, Overrides, Settings};
use ybook::logging;

/// Load settings from the config file, falling back to defaults (plus `YB_`
/// environment variables) when it does not exist.
fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    match Settings::load_from(&cli.config) {
        Ok(settings) => Ok(settings),
        Err(ConfigError::Missing { .. }) => Ok(Settings::from_env()?),
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::New { force } = cli.action() {
        logging::init();
        return init::run_new(&cli.config, force);
    }

    let settings = load_settings(&cli)?;
    logging::init_with_config(&settings.logging);

    match cli.action() {
        Commands::Serve { port, snapshot } => {
            serve::run(Overrides { port, snapshot }, settings, &cli.config).await
        }
        Commands::Config => {
            init::run_config(&settings);
            Ok(())
        }
        Commands::New { .. } => Ok(()),
    }
}
