//! nodewright CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// nodewright - Windows worker node tooling
#[derive(Parser, Debug)]
#[command(name = "nodewright")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log line format (json or text)
    #[arg(long, global = true, env = "NODEWRIGHT_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replace a rotated signer in a trust bundle
    MergeBundle(commands::merge_bundle::MergeBundleArgs),
    /// Render container runtime mirror configuration
    RenderMirrors(commands::render_mirrors::RenderMirrorsArgs),
    /// Print the cluster DNS address for a service network
    ClusterDns(commands::cluster_dns::ClusterDnsArgs),
    /// Show what a boot configuration document yields
    InspectBootConfig(commands::inspect_boot_config::InspectBootConfigArgs),
    /// Load the cluster endpoint and CA the way orchestrators do
    ProbeCredentials(commands::probe_credentials::ProbeCredentialsArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::MergeBundle(args) => commands::merge_bundle::run(args),
            Commands::RenderMirrors(args) => commands::render_mirrors::run(args).await,
            Commands::ClusterDns(args) => commands::cluster_dns::run(args),
            Commands::InspectBootConfig(args) => commands::inspect_boot_config::run(args),
            Commands::ProbeCredentials(args) => commands::probe_credentials::run(args).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_merge_bundle() {
        let cli = Cli::try_parse_from([
            "nodewright",
            "merge-bundle",
            "--initial",
            "anchor.crt",
            "--new",
            "rotated.crt",
        ])
        .expect("should parse");
        match cli.command {
            Commands::MergeBundle(args) => {
                assert_eq!(args.new.as_deref(), Some(std::path::Path::new("rotated.crt")));
                assert_eq!(args.subject, nodewright_common::KUBELET_SIGNER_SUBJECT);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cluster_dns_requires_cidr() {
        assert!(Cli::try_parse_from(["nodewright", "cluster-dns"]).is_err());
    }

    #[test]
    fn test_log_format_flag_is_global() {
        let cli = Cli::try_parse_from([
            "nodewright",
            "cluster-dns",
            "--service-cidr",
            "10.96.0.0/12",
            "--log-format",
            "json",
        ])
        .expect("should parse");
        assert_eq!(cli.log_format, "json");
    }
}
