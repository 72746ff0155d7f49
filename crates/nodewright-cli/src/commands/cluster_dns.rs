//! cluster-dns command

use clap::Args;

use crate::Result;

/// cluster-dns arguments
#[derive(Args, Debug)]
pub struct ClusterDnsArgs {
    /// Cluster service network, e.g. 172.30.0.0/16
    #[arg(long, env = "NODEWRIGHT_SERVICE_CIDR")]
    pub service_cidr: String,
}

/// Run the cluster-dns command
pub fn run(args: ClusterDnsArgs) -> Result<()> {
    println!("{}", nodewright_bootstrap::cluster_dns(&args.service_cidr)?);
    Ok(())
}
