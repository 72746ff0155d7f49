//! Mirror set merge and rendering

use std::collections::BTreeMap;

use nodewright_common::crd::{ImageMirrorDeclaration, MirrorSourcePolicy};
use nodewright_common::HOSTS_TOML_FILE;
use tracing::debug;

/// Line ending for rendered documents (the runtime runs on Windows)
const EOL: &str = "\r\n";

/// Whether the runtime may fall back to the source registry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SourcePolicy {
    /// Source may be contacted when no mirror serves the image
    #[default]
    Allow,
    /// Source must never be contacted
    Never,
}

impl From<MirrorSourcePolicy> for SourcePolicy {
    fn from(policy: MirrorSourcePolicy) -> Self {
        match policy {
            MirrorSourcePolicy::AllowContactingSource => SourcePolicy::Allow,
            MirrorSourcePolicy::NeverContactSource => SourcePolicy::Never,
        }
    }
}

/// One alternate pull location
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mirror {
    /// Unique prefix of the mirror location (shared path suffix removed)
    pub host: String,
    /// Whether the mirror may resolve tags to digests
    pub resolve_tags: bool,
}

impl Mirror {
    fn capabilities(&self) -> &'static str {
        if self.resolve_tags {
            r#"["pull", "resolve"]"#
        } else {
            r#"["pull"]"#
        }
    }
}

/// Pull routing for one source registry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorSet {
    /// Source registry
    pub source: String,
    /// Mirrors, sorted by host
    pub mirrors: Vec<Mirror>,
    /// Source contact policy
    pub policy: SourcePolicy,
}

impl MirrorSet {
    /// Endpoint advertised as the server: the source, or the first mirror
    /// when the source must never be contacted
    pub fn advertised_server(&self) -> Option<&str> {
        match self.policy {
            SourcePolicy::Allow => Some(&self.source),
            SourcePolicy::Never => self.mirrors.first().map(|m| m.host.as_str()),
        }
    }

    /// Render the `hosts.toml` document for this set.
    ///
    /// A set without mirrors renders to an empty string.
    pub fn render(&self) -> String {
        if self.mirrors.is_empty() {
            return String::new();
        }
        let Some(server) = self.advertised_server() else {
            return String::new();
        };

        let mut out = format!("server = \"https://{}\"{EOL}", server);
        for mirror in &self.mirrors {
            out.push_str(EOL);
            out.push_str(&format!("[host.\"https://{}\"]{EOL}", mirror.host));
            out.push_str(&format!("  capabilities = {}{EOL}", mirror.capabilities()));
        }
        out
    }
}

/// Host segment of an image location (`registry.io/ns/repo` -> `registry.io`)
pub fn extract_hostname(location: &str) -> &str {
    location.split('/').next().unwrap_or(location)
}

/// Unique prefix of `mirror` relative to `source`.
///
/// The runtime re-appends the path the mirror shares with the source when it
/// fetches, so the longest common path-segment suffix (compared back to front)
/// is stripped. A mirror equal to the source collapses to the source host; a
/// mirror with no unique prefix left collapses to its own host segment.
pub fn truncate_mirror(mirror: &str, source: &str) -> String {
    if mirror == source {
        return extract_hostname(source).to_string();
    }

    let mirror_segments: Vec<&str> = mirror.split('/').collect();
    let source_segments: Vec<&str> = source.split('/').collect();

    let shared = mirror_segments
        .iter()
        .rev()
        .zip(source_segments.iter().rev())
        .take_while(|(m, s)| m == s)
        .count();

    let unique = &mirror_segments[..mirror_segments.len() - shared];
    if unique.is_empty() {
        extract_hostname(mirror).to_string()
    } else {
        unique.join("/")
    }
}

fn normalize(location: &str) -> &str {
    location.trim().trim_end_matches('/')
}

#[derive(Default)]
struct PendingSet {
    mirrors: BTreeMap<String, bool>,
    policy: SourcePolicy,
}

impl PendingSet {
    fn add(&mut self, decl: &ImageMirrorDeclaration, resolve_tags: bool) {
        let source = normalize(&decl.source);
        for location in decl.mirrors.iter().map(|m| normalize(m)).filter(|m| !m.is_empty()) {
            let host = truncate_mirror(location, source);
            let entry = self.mirrors.entry(host).or_insert(false);
            *entry |= resolve_tags;
        }
        // Never dominates Allow
        self.policy = self.policy.max(decl.policy().into());
    }
}

/// Merge digest and tag mirror declarations into one set per source host.
///
/// Digest mirrors contribute `resolve_tags = false`, tag mirrors
/// `resolve_tags = true`. Within a set mirrors are deduplicated by host with
/// `true` winning, and the policy is `Never` if any contributing declaration
/// says so. Output is sorted by source, mirrors by host.
pub fn build_mirror_sets(
    digest_mirrors: &[ImageMirrorDeclaration],
    tag_mirrors: &[ImageMirrorDeclaration],
) -> Vec<MirrorSet> {
    let mut pending: BTreeMap<String, PendingSet> = BTreeMap::new();

    let declarations = digest_mirrors
        .iter()
        .map(|d| (d, false))
        .chain(tag_mirrors.iter().map(|d| (d, true)));

    for (decl, resolve_tags) in declarations {
        let source = normalize(&decl.source);
        if source.is_empty() {
            debug!("skipping mirror declaration with empty source");
            continue;
        }
        pending
            .entry(extract_hostname(source).to_string())
            .or_default()
            .add(decl, resolve_tags);
    }

    pending
        .into_iter()
        .map(|(source, set)| MirrorSet {
            source,
            mirrors: set
                .mirrors
                .into_iter()
                .map(|(host, resolve_tags)| Mirror { host, resolve_tags })
                .collect(),
            policy: set.policy,
        })
        .collect()
}

/// Directory name the Windows container runtime looks up for a registry host.
///
/// `:` is not valid in a Windows path, so `host:port` becomes `host_port_`.
pub fn host_directory(host: &str) -> String {
    match host.rfind(':') {
        Some(idx) if idx > 0 => format!("{}_{}_", &host[..idx], &host[idx + 1..]),
        _ => host.to_string(),
    }
}

/// Directory contents for the registries directory: `<source dir>\hosts.toml`
/// per set with a non-empty rendering
pub fn mirror_config_files(sets: &[MirrorSet]) -> BTreeMap<String, Vec<u8>> {
    sets.iter()
        .filter_map(|set| {
            let rendered = set.render();
            if rendered.is_empty() {
                return None;
            }
            Some((
                format!("{}\\{}", host_directory(&set.source), HOSTS_TOML_FILE),
                rendered.into_bytes(),
            ))
        })
        .collect()
}
