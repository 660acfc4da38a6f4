//! Clap CLI definitions for ramutex.

use clap::Parser;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
Examples:
  ramutex                             Run every configured node in this process
  ramutex --node 1                    Run node 1 only (start one process per node)
  ramutex --config cluster.toml       Read a TOML configuration
  ramutex --audit-log logs.txt        Also append [LOG] lines to logs.txt

Set RUST_LOG (e.g. RUST_LOG=debug) to change log verbosity.";

/// ramutex: Ricart–Agrawala distributed mutual exclusion over TCP.
#[derive(Parser, Debug)]
#[command(name = "ramutex", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to the cluster configuration (JSON, or TOML for `.toml` files).
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,

    /// Run only this node. Without it every node runs in-process.
    #[arg(long)]
    pub node: Option<u32>,

    /// Append audit lines to this file.
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    /// Override the number of rounds each node requests.
    #[arg(long)]
    pub rounds: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["ramutex"]);
        assert_eq!(cli.config, PathBuf::from("config.json"));
        assert_eq!(cli.node, None);
        assert!(cli.audit_log.is_none());
        assert!(cli.rounds.is_none());
    }

    #[test]
    fn test_all_flags() {
        let cli = Cli::parse_from([
            "ramutex",
            "--config",
            "c.toml",
            "--node",
            "2",
            "--audit-log",
            "logs.txt",
            "--rounds",
            "9",
        ]);
        assert_eq!(cli.config, PathBuf::from("c.toml"));
        assert_eq!(cli.node, Some(2));
        assert_eq!(cli.audit_log, Some(PathBuf::from("logs.txt")));
        assert_eq!(cli.rounds, Some(9));
    }

    #[test]
    fn test_rejects_non_numeric_node() {
        assert!(Cli::try_parse_from(["ramutex", "--node", "x"]).is_err());
    }
}
