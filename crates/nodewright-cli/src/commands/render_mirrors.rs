//! render-mirrors command - print the mirror configuration an instance receives
//!
//! Declarations come from the cluster's `ImageDigestMirrorSet` and
//! `ImageTagMirrorSet` resources, or from a multi-document YAML file holding
//! the same resources.

use std::path::PathBuf;

use clap::Args;
use serde::Deserialize;

use nodewright_common::crd::{ImageDigestMirrorSet, ImageMirrorDeclaration, ImageTagMirrorSet};
use nodewright_common::kube_utils::create_client;
use nodewright_node::{ClusterClient, KubeClusterClient};
use nodewright_registries::{build_mirror_sets, mirror_config_files};

use super::read_file_to_string;
use crate::{Error, Result};

/// render-mirrors arguments
#[derive(Args, Debug)]
pub struct RenderMirrorsArgs {
    /// Read mirror set resources from this YAML file instead of the cluster
    #[arg(long)]
    pub from_file: Option<PathBuf>,

    /// Kubeconfig for the cluster (inferred when unset)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,
}

/// Digest and tag declarations, in document order
#[derive(Debug, Default, PartialEq)]
pub struct Declarations {
    /// From digest mirror sets
    pub digest: Vec<ImageMirrorDeclaration>,
    /// From tag mirror sets
    pub tag: Vec<ImageMirrorDeclaration>,
}

#[derive(Deserialize)]
struct TypeMeta {
    kind: Option<String>,
}

/// Run the render-mirrors command
pub async fn run(args: RenderMirrorsArgs) -> Result<()> {
    let declarations = match &args.from_file {
        Some(path) => declarations_from_yaml(&read_file_to_string(path)?)?,
        None => declarations_from_cluster(args.kubeconfig.as_deref()).await?,
    };
    print!("{}", render(&declarations));
    Ok(())
}

async fn declarations_from_cluster(kubeconfig: Option<&std::path::Path>) -> Result<Declarations> {
    let cluster = KubeClusterClient::new(create_client(kubeconfig).await?);
    let digest = cluster.list_digest_mirror_sets().await?;
    let tag = cluster.list_tag_mirror_sets().await?;
    Ok(Declarations {
        digest: digest
            .into_iter()
            .flat_map(|s| s.spec.image_digest_mirrors)
            .collect(),
        tag: tag.into_iter().flat_map(|s| s.spec.image_tag_mirrors).collect(),
    })
}

/// Collect declarations from YAML documents; documents of other kinds are ignored
pub fn declarations_from_yaml(input: &str) -> Result<Declarations> {
    let mut out = Declarations::default();
    for document in serde_yaml::Deserializer::from_str(input) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let meta: TypeMeta = serde_yaml::from_value(value.clone())?;
        match meta.kind.as_deref() {
            Some("ImageDigestMirrorSet") => {
                let set: ImageDigestMirrorSet = serde_yaml::from_value(value)?;
                out.digest.extend(set.spec.image_digest_mirrors);
            }
            Some("ImageTagMirrorSet") => {
                let set: ImageTagMirrorSet = serde_yaml::from_value(value)?;
                out.tag.extend(set.spec.image_tag_mirrors);
            }
            Some(_) => {}
            None => return Err(Error::validation("YAML document without a kind")),
        }
    }
    Ok(out)
}

/// Each generated `hosts.toml`, preceded by a comment naming its path
pub fn render(declarations: &Declarations) -> String {
    let sets = build_mirror_sets(&declarations.digest, &declarations.tag);
    mirror_config_files(&sets)
        .into_iter()
        .map(|(path, contents)| {
            format!("# {}\n{}\n", path, String::from_utf8_lossy(&contents))
        })
        .collect()
}
