//! CLI definitions using clap.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// repo-watcher - governance-driven repository controller
#[derive(Parser, Debug)]
#[command(name = "repo-watcher")]
#[command(version)]
#[command(about = "Keeps repositories on the hosting platform in line with governance files")]
#[command(
    long_about = "repo-watcher reads the repository, sig and OWNERS files of a community and \
                  repeatedly creates repositories, branches, protections and memberships on the \
                  hosting platform until they match."
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "REPO_WATCHER_CONFIG")]
    pub config: PathBuf,

    /// Serve the (inert) webhook endpoint on this address
    #[arg(long)]
    pub webhook_addr: Option<SocketAddr>,

    /// Reconcile against an in-memory platform using the local governance root
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_full_command_line() {
        let cli = Cli::try_parse_from([
            "repo-watcher",
            "--config",
            "watcher.yaml",
            "--webhook-addr",
            "127.0.0.1:8888",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("watcher.yaml"));
        assert_eq!(cli.webhook_addr.map(|a| a.port()), Some(8888));
        assert!(cli.dry_run);
    }

    #[test]
    fn test_bad_address_rejected() {
        assert!(
            Cli::try_parse_from(["repo-watcher", "-c", "w.yaml", "--webhook-addr", "nope"]).is_err()
        );
    }
}
