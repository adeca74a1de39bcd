//! CLI for this application
//!
use std::path::PathBuf;

use crate::settings::{self, APP_NAME};

#[derive(Clone, Debug, clap::Parser)]
#[clap(name = APP_NAME, version = settings::APP_VERSION)]
pub struct Cli {
    // JSON configuration file
    #[clap(
        long,
        default_value = "conf.json",
        env("MESHMAP_CONF"),
        help = "Path to the JSON configuration file"
    )]
    pub conf: PathBuf,

    // Overrides web.addr from the configuration
    #[clap(
        long,
        env("MESHMAP_LISTEN_ADDRESS"),
        help = "Socket address to listen on, e.g. 0.0.0.0:8077"
    )]
    pub listen_address: Option<String>,

    #[clap(long, help = "Log at debug level")]
    pub debug: bool,

    #[clap(long, conflicts_with = "debug", help = "Log errors only")]
    pub quiet: bool,

    #[clap(long, env("MESHMAP_LOG_JSON"), help = "Emit logs as JSON lines")]
    pub log_json: bool,

    #[clap(long, help = "Reject every request that would modify the database")]
    pub readonly: bool,

    // Import a JSON array of nodes before serving
    #[clap(long, help = "Seed the local node table from a JSON file, then serve")]
    pub import: Option<PathBuf>,
}

impl Cli {
    /// Default tracing directives when RUST_LOG is unset.
    pub fn log_filter(&self) -> String {
        let level = if self.debug {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "info"
        };
        format!("{}={},tower_http={}", APP_NAME, level, level)
    }

    /// Apply command-line overrides on top of the file configuration.
    pub fn apply(&self, settings: &mut settings::Settings) {
        if let Some(addr) = &self.listen_address {
            settings.web.addr = addr.clone();
        }
        if self.readonly {
            settings.database.read_only = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from(["meshmap", "--listen-address", "[::1]:9000", "--readonly"]);
        let mut settings = settings::Settings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.web.addr, "[::1]:9000");
        assert!(settings.database.read_only);
    }

    #[test]
    fn test_log_filter() {
        let cli = Cli::parse_from(["meshmap", "--debug"]);
        assert_eq!(cli.log_filter(), "meshmap=debug,tower_http=debug");
        let cli = Cli::parse_from(["meshmap"]);
        assert_eq!(cli.log_filter(), "meshmap=info,tower_http=info");
        let cli = Cli::parse_from(["meshmap", "--quiet"]);
        assert_eq!(cli.log_filter(), "meshmap=error,tower_http=error");
        assert!(Cli::try_parse_from(["meshmap", "--debug", "--quiet"]).is_err());
    }
}
