//! Image mirror declaration resources
//!
//! `ImageDigestMirrorSet` and `ImageTagMirrorSet` are cluster-scoped resources
//! owned by the cluster's config API. nodewright only reads them: digest
//! mirrors may serve pulls by digest, tag mirrors may additionally resolve tags.
//!
//! Example:
//! ```yaml
//! apiVersion: config.openshift.io/v1
//! kind: ImageDigestMirrorSet
//! metadata:
//!   name: ubi
//! spec:
//!   imageDigestMirrors:
//!   - source: registry.access.redhat.com/ubi9
//!     mirrors:
//!     - mirror.example.com/redhat/ubi9
//!     mirrorSourcePolicy: NeverContactSource
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Whether pulls may fall back to the source registry
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum MirrorSourcePolicy {
    /// Fall back to the source when no mirror serves the image
    #[default]
    AllowContactingSource,
    /// Never contact the source registry
    NeverContactSource,
}

/// One source repository and the mirrors that serve it
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageMirrorDeclaration {
    /// Repository being mirrored (e.g. `registry.io/ns/repo`)
    pub source: String,

    /// Mirror repositories, in preference order
    #[serde(default)]
    pub mirrors: Vec<String>,

    /// Fallback policy for the source; absent means allow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_source_policy: Option<MirrorSourcePolicy>,
}

impl ImageMirrorDeclaration {
    /// Effective source policy
    pub fn policy(&self) -> MirrorSourcePolicy {
        self.mirror_source_policy.unwrap_or_default()
    }
}

/// Mirrors that may serve image pulls by digest
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "ImageDigestMirrorSet",
    plural = "imagedigestmirrorsets"
)]
#[serde(rename_all = "camelCase")]
pub struct ImageDigestMirrorSetSpec {
    /// Digest mirror declarations
    #[serde(default)]
    pub image_digest_mirrors: Vec<ImageMirrorDeclaration>,
}

/// Mirrors that may serve image pulls by tag
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "ImageTagMirrorSet",
    plural = "imagetagmirrorsets"
)]
#[serde(rename_all = "camelCase")]
pub struct ImageTagMirrorSetSpec {
    /// Tag mirror declarations
    #[serde(default)]
    pub image_tag_mirrors: Vec<ImageMirrorDeclaration>,
}
