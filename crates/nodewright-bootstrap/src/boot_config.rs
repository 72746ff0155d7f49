//! Boot configuration extraction
//!
//! The cluster publishes a boot specification (an Ignition document) for new
//! workers. Windows instances can't consume it directly, so the pieces the
//! kubelet needs are pulled out of it: the kubelet service arguments, a small
//! set of embedded files and the kubelet trust anchor.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tracing::debug;

use nodewright_common::{Error, Result};

/// Name of the systemd unit carrying the kubelet command line
pub const KUBELET_UNIT: &str = "kubelet.service";

/// Path of the kubelet trust anchor in the boot specification
pub const TRUST_ANCHOR_PATH: &str = "/etc/kubernetes/kubelet-ca.crt";

/// Files copied from the boot specification to the instance by default
///
/// The trust anchor is not among them: the instance receives the merged
/// kubelet bundle instead.
pub const DEFAULT_EXTRACTED_FILES: &[&str] = &["/etc/kubernetes/cloud.conf"];

/// A file embedded in the boot specification
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootFile {
    /// Absolute path the file was declared at
    pub path: String,
    /// Base64 payload or `data:` URL
    pub contents: String,
}

impl BootFile {
    /// Create a boot file from its declared path and encoded contents
    pub fn new(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }

    /// Final path segment, used as the file name on the instance
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Decoded file contents
    pub fn decode(&self) -> Result<Vec<u8>> {
        decode_contents(&self.path, &self.contents)
    }
}

/// Output contract of a boot configuration extractor
pub trait BootConfig: Send + Sync {
    /// Kubelet command line flags without the leading `--`
    fn service_args(&self) -> BTreeMap<String, String>;

    /// Embedded files to copy to the instance
    fn files(&self) -> Vec<BootFile>;

    /// PEM bundle the kubelet trusts for client authentication
    fn trust_anchor_data(&self) -> Vec<u8>;
}

/// Boot configuration held in memory
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StaticBootConfig {
    /// Kubelet command line flags
    pub service_args: BTreeMap<String, String>,
    /// Embedded files
    pub files: Vec<BootFile>,
    /// Kubelet trust anchor PEM
    pub trust_anchor: Vec<u8>,
}

impl BootConfig for StaticBootConfig {
    fn service_args(&self) -> BTreeMap<String, String> {
        self.service_args.clone()
    }

    fn files(&self) -> Vec<BootFile> {
        self.files.clone()
    }

    fn trust_anchor_data(&self) -> Vec<u8> {
        self.trust_anchor.clone()
    }
}

/// Boot configuration extracted from an Ignition v3 document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IgnitionBootConfig {
    inner: StaticBootConfig,
}

impl IgnitionBootConfig {
    /// Parse an Ignition document, keeping [`DEFAULT_EXTRACTED_FILES`]
    pub fn parse(document: &str) -> Result<Self> {
        Self::parse_with_files(document, DEFAULT_EXTRACTED_FILES)
    }

    /// Parse an Ignition document, keeping only the files at `wanted` paths.
    ///
    /// The kubelet unit and the trust anchor are required; a document missing
    /// either cannot bootstrap a node.
    pub fn parse_with_files(document: &str, wanted: &[&str]) -> Result<Self> {
        let doc: IgnitionDocument = serde_json::from_str(document)
            .map_err(|e| Error::serialization_for_kind("Ignition", e.to_string()))?;

        if !doc.ignition.version.starts_with("3.") {
            return Err(Error::configuration(
                "ignition.version",
                format!("unsupported version {}", doc.ignition.version),
            ));
        }

        let unit = doc
            .systemd
            .units
            .iter()
            .find(|u| u.name == KUBELET_UNIT)
            .ok_or_else(|| Error::configuration(KUBELET_UNIT, "unit not found in boot config"))?;
        let service_args = parse_exec_start(unit.contents.as_deref().unwrap_or_default())
            .ok_or_else(|| Error::configuration(KUBELET_UNIT, "unit has no ExecStart"))?;

        let mut trust_anchor = None;
        let mut files = Vec::new();
        for file in doc.storage.files {
            let Some(source) = file.contents.and_then(|c| c.source) else {
                continue;
            };
            if file.path == TRUST_ANCHOR_PATH {
                trust_anchor = Some(decode_contents(&file.path, &source)?);
            }
            if wanted.contains(&file.path.as_str()) {
                files.push(BootFile::new(file.path, source));
            }
        }

        let trust_anchor = trust_anchor
            .filter(|data| !data.is_empty())
            .ok_or_else(|| Error::configuration(TRUST_ANCHOR_PATH, "trust anchor missing or empty"))?;

        debug!(
            args = service_args.len(),
            files = files.len(),
            "extracted boot configuration"
        );

        Ok(Self {
            inner: StaticBootConfig {
                service_args,
                files,
                trust_anchor,
            },
        })
    }
}

impl BootConfig for IgnitionBootConfig {
    fn service_args(&self) -> BTreeMap<String, String> {
        self.inner.service_args()
    }

    fn files(&self) -> Vec<BootFile> {
        self.inner.files()
    }

    fn trust_anchor_data(&self) -> Vec<u8> {
        self.inner.trust_anchor_data()
    }
}

/// Decode a boot file payload: a `data:` URL or plain base64
pub fn decode_contents(context: &str, contents: &str) -> Result<Vec<u8>> {
    let Some(url) = contents.strip_prefix("data:") else {
        return STANDARD
            .decode(contents.trim())
            .map_err(|e| Error::configuration(context, format!("invalid base64: {}", e)));
    };

    let (media, data) = url
        .split_once(',')
        .ok_or_else(|| Error::configuration(context, "data URL has no ',' separator"))?;

    if media.split(';').any(|p| p == "base64") {
        STANDARD
            .decode(data.trim())
            .map_err(|e| Error::configuration(context, format!("invalid base64 data URL: {}", e)))
    } else {
        Ok(urlencoding::decode_binary(data.as_bytes()).into_owned())
    }
}

/// Flags of the `ExecStart` line in a systemd unit, continuation lines joined.
///
/// Returns `None` when the unit has no `ExecStart`.
fn parse_exec_start(unit: &str) -> Option<BTreeMap<String, String>> {
    let joined = unit.replace("\\\r\n", " ").replace("\\\n", " ");
    let command = joined
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("ExecStart="))?;

    let args = command
        .split_whitespace()
        .filter_map(|token| token.strip_prefix("--"))
        .map(|flag| match flag.split_once('=') {
            Some((key, value)) => (key.to_string(), unquote(value).to_string()),
            None => (flag.to_string(), String::new()),
        })
        .collect();
    Some(args)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[derive(Deserialize)]
struct IgnitionDocument {
    ignition: IgnitionMeta,
    #[serde(default)]
    storage: IgnitionStorage,
    #[serde(default)]
    systemd: IgnitionSystemd,
}

#[derive(Deserialize)]
struct IgnitionMeta {
    version: String,
}

#[derive(Deserialize, Default)]
struct IgnitionStorage {
    #[serde(default)]
    files: Vec<IgnitionFile>,
}

#[derive(Deserialize)]
struct IgnitionFile {
    path: String,
    #[serde(default)]
    contents: Option<IgnitionContents>,
}

#[derive(Deserialize)]
struct IgnitionContents {
    #[serde(default)]
    source: Option<String>,
}

#[derive(Deserialize, Default)]
struct IgnitionSystemd {
    #[serde(default)]
    units: Vec<IgnitionUnit>,
}

#[derive(Deserialize)]
struct IgnitionUnit {
    name: String,
    #[serde(default)]
    contents: Option<String>,
}
