//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_FILE;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser, Debug)]
#[command(
    name = "yb",
    version = env!("CARGO_PKG_VERSION"),
    about = "Serve a directory of Markdown notes over HTTP",
    long_about = "Serve a directory of Markdown notes over HTTP with live cache invalidation, pluggable search and hot-reloaded configuration.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Quick Start:\n  $ yb new             # Write yb.toml and a sample blog/ directory\n  $ yb                 # Serve it on http://localhost:8080/blog/\n  $ yb config          # Show the effective settings"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "YB_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Subcommand; defaults to `serve`
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve content and the search API
    #[command(
        about = "Start the HTTP server",
        after_help = "Examples:\n  yb serve\n  yb serve --port 9000\n  yb serve --config site/yb.toml --snapshot"
    )]
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Write static copies of served pages (overrides config)
        #[arg(long)]
        snapshot: bool,
    },

    /// Scaffold a new site
    #[command(about = "Write a default yb.toml and sample content")]
    New {
        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display the effective settings")]
    Config,
}

impl Cli {
    /// The subcommand to run, `serve` when none was given.
    pub fn action(&self) -> Commands {
        match &self.command {
            Some(Commands::Serve { port, snapshot }) => Commands::Serve {
                port: *port,
                snapshot: *snapshot,
            },
            Some(Commands::New { force }) => Commands::New { force: *force },
            Some(Commands::Config) => Commands::Config,
            None => Commands::Serve {
                port: None,
                snapshot: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::parse_from(["yb"]);
        assert_eq!(cli.config, PathBuf::from("yb.toml"));
        assert!(matches!(
            cli.action(),
            Commands::Serve {
                port: None,
                snapshot: false
            }
        ));
    }

    #[test]
    fn test_serve_overrides() {
        let cli = Cli::parse_from(["yb", "serve", "--port", "9000", "--config", "site/yb.toml"]);
        assert_eq!(cli.config, PathBuf::from("site/yb.toml"));
        assert!(matches!(
            cli.action(),
            Commands::Serve {
                port: Some(9000),
                ..
            }
        ));
    }

    #[test]
    fn test_new_force() {
        let cli = Cli::parse_from(["yb", "new", "-f"]);
        assert!(matches!(cli.action(), Commands::New { force: true }));
    }
}
