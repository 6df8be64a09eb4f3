use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::ImageStream;

pub mod docker;

/// Label the build recipe stores the payload digest under.
pub const DIGEST_LABEL: &str = "SHA256";
/// Graph driver key of the writable layer directory.
pub const UPPER_DIR_KEY: &str = "UpperDir";

/// One entry of the runtime's local image list.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ImageSummary {
    pub id: String,
    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
    #[serde(default)]
    pub size: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ImageInspect {
    pub id: String,
    #[serde(default)]
    pub graph_driver: GraphDriver,
    #[serde(default)]
    pub config: Option<InspectConfig>,
}

impl ImageInspect {
    pub fn upper_dir(&self) -> Option<PathBuf> {
        self.graph_driver
            .data
            .as_ref()
            .and_then(|data| data.get(UPPER_DIR_KEY))
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
    }

    pub fn label(&self, key: &str) -> Option<&String> {
        self.config.as_ref().and_then(|config| config.labels.as_ref()).and_then(|labels| labels.get(key))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "PascalCase")]
pub struct GraphDriver {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data: Option<HashMap<String, String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "PascalCase")]
pub struct InspectConfig {
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
}

/// A build request: an uncompressed tar stream holding the recipe and its inputs.
pub struct BuildContext {
    pub archive: Box<dyn Read + Send>,
    /// Name of the recipe file inside the archive.
    pub dockerfile: String,
    pub tag: String,
}

/// Registry credentials handed to the daemon for pulls and pushes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

impl RegistryAuth {
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

/// The subset of a container runtime the image managers rely on.
///
/// `build`, `pull` and `push` hand back the daemon's JSON progress lines. A
/// failure in the middle of the operation shows up as an `error` line there,
/// see [`crate::util::io::check_progress`].
pub trait RuntimeClient: Send + Sync {
    fn list_images(&self) -> Result<Vec<ImageSummary>>;

    fn build(&self, context: BuildContext) -> Result<ImageStream>;

    fn pull(&self, reference: &str, auth: &RegistryAuth) -> Result<ImageStream>;

    fn push(&self, reference: &str, auth: &RegistryAuth, all_tags: bool) -> Result<ImageStream>;

    fn inspect(&self, reference: &str) -> Result<ImageInspect>;

    fn remove(&self, reference: &str, force: bool, prune_children: bool) -> Result<()>;

    fn ping(&self) -> Result<()>;
}

/// Splits `host:port/repo/name:tag` into repository and tag.
pub fn split_reference(reference: &str) -> (&str, Option<&str>) {
    match reference.rfind(':') {
        Some(pos) if !reference[pos..].contains('/') => (&reference[..pos], Some(&reference[pos + 1..])),
        _ => (reference, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_reference_keeps_registry_port() {
        assert_eq!(split_reference("reg:5000/library/ubuntu:latest"), ("reg:5000/library/ubuntu", Some("latest")));
        assert_eq!(split_reference("reg:5000/library/ubuntu"), ("reg:5000/library/ubuntu", None));
        assert_eq!(split_reference("ubuntu:20.04"), ("ubuntu", Some("20.04")));
    }

    #[test]
    fn inspect_upper_dir_and_labels() {
        let json = r#"{
            "Id": "sha256:1234",
            "GraphDriver": {"Name": "overlay2", "Data": {"UpperDir": "/var/lib/docker/overlay2/x/diff", "WorkDir": "/w"}},
            "Config": {"Labels": {"SHA256": "sha256:beef"}}
        }"#;
        let inspect = serde_json::from_str::<ImageInspect>(json).unwrap();
        assert_eq!(inspect.upper_dir(), Some(PathBuf::from("/var/lib/docker/overlay2/x/diff")));
        assert_eq!(inspect.label(DIGEST_LABEL).map(|s| s.as_str()), Some("sha256:beef"));

        let bare = serde_json::from_str::<ImageInspect>(r#"{"Id": "sha256:1", "Config": {"Labels": null}}"#).unwrap();
        assert_eq!(bare.upper_dir(), None);
        assert_eq!(bare.label(DIGEST_LABEL), None);
    }
}
