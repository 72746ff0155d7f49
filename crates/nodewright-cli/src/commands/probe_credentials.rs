//! probe-credentials command - check that orchestrators can start
//!
//! Loads the cluster CA and pairs it with the external API endpoint, exactly
//! as a process does before constructing any orchestrator, then reports what
//! was found.

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use nodewright_bootstrap::ClusterCredentials;
use nodewright_common::kube_utils::create_client;
use nodewright_common::DEFAULT_DAEMON_NAMESPACE;

use crate::Result;

/// probe-credentials arguments
#[derive(Args, Debug)]
pub struct ProbeCredentialsArgs {
    /// Kubeconfig for the cluster (inferred when unset)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace to read the cluster CA from
    #[arg(long, short = 'n', env = "NODEWRIGHT_NAMESPACE", default_value = DEFAULT_DAEMON_NAMESPACE)]
    pub namespace: String,

    /// API endpoint instances connect to
    #[arg(long, env = "NODEWRIGHT_API_ENDPOINT")]
    pub api_endpoint: String,
}

/// Run the probe-credentials command
pub async fn run(args: ProbeCredentialsArgs) -> Result<()> {
    let client = create_client(args.kubeconfig.as_deref()).await?;
    let credentials = ClusterCredentials::load(&client, &args.namespace, &args.api_endpoint).await?;
    let certificates = nodewright_pki::decode_pem_blocks(credentials.ca_bundle()).len();

    info!(namespace = %args.namespace, "cluster credentials loaded");
    println!("api endpoint: {}", credentials.api_endpoint());
    println!("ca certificates: {}", certificates);
    Ok(())
}
