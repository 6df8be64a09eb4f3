use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::image::{format_name, DigestState, Image, OsInfo, DEFAULT_TAG};

pub mod client;

/// Image record as the hub describes it.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HubImage {
    #[serde(default)]
    pub username: String,
    pub name: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub virtual_size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub os: OsInfo,
    #[serde(default)]
    pub snapshot: Option<String>,
    /// Path of the cached payload, set for local images only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

fn default_tag() -> String {
    DEFAULT_TAG.to_string()
}

impl HubImage {
    pub fn fullname(&self) -> String {
        format_name(&self.username, &self.name, &self.tag)
    }

    pub fn from_image(img: &Image) -> HubImage {
        HubImage {
            username: img.owner.clone(),
            name: img.name.clone(),
            tag: img.tag.clone(),
            private: img.private,
            size: img.actual_size,
            virtual_size: img.virtual_size,
            digest: img.digest.value().unwrap_or_default().to_string(),
            os: img.os.clone(),
            snapshot: img.snapshot.clone(),
            local_path: img.local_path.clone(),
        }
    }

    pub fn into_image(self) -> Image {
        Image {
            owner: self.username,
            name: self.name,
            tag: self.tag,
            digest: DigestState::from_label(Some(&self.digest)),
            actual_size: self.size,
            virtual_size: self.virtual_size,
            local_path: self.local_path,
            os: self.os,
            private: self.private,
            snapshot: self.snapshot,
        }
    }

    /// Copies what the hub knows onto `img`, keeping its identity.
    pub fn apply_to(&self, img: &mut Image) {
        img.tag = self.tag.clone();
        img.private = self.private;
        img.actual_size = self.size;
        img.virtual_size = self.virtual_size;
        img.digest = DigestState::from_label(Some(&self.digest));
        img.os = self.os.clone();
        img.snapshot = self.snapshot.clone();
        img.local_path = self.local_path.clone();
    }
}

/// Credentialed image hub with a local cache.
pub trait HubApi: Send + Sync {
    /// Hub address, used for the reachability check.
    fn addr(&self) -> &str;

    fn list_local(&self) -> Result<Vec<HubImage>>;

    /// Cached copy of `fullname`, if there is one.
    fn local_info(&self, fullname: &str) -> Result<Option<HubImage>>;

    /// Remote metadata of `fullname`, no transfer.
    fn get_info(&self, fullname: &str) -> Result<HubImage>;

    /// Registers a new local image and copies `source` (path or URL) into it.
    fn import(&self, fullname: &str, source: &str) -> Result<HubImage>;

    /// Transfers `fullname` from the hub into the local cache.
    fn download(&self, fullname: &str) -> Result<HubImage>;

    fn push(&self, image: &HubImage, force: bool) -> Result<()>;

    /// Drops the cached copy. Absence is not an error.
    fn remove_local(&self, fullname: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_image_json() {
        let json = r#"{"username":"alice","name":"ubuntu","tag":"20.04","private":true,"size":42,
            "virtualSize":1024,"digest":"sha256:aa","os":{"type":"linux","distrib":"ubuntu","version":"20.04","arch":"amd64"}}"#;
        let hub_image = serde_json::from_str::<HubImage>(json).unwrap();
        assert_eq!(hub_image.fullname(), "alice/ubuntu:20.04");
        let img = hub_image.clone().into_image();
        assert_eq!(img.distro(), "ubuntu");
        assert_eq!(img.digest.value(), Some("sha256:aa"));
        assert_eq!(HubImage::from_image(&img), hub_image);
    }

    #[test]
    fn tag_defaults_to_latest() {
        let hub_image = serde_json::from_str::<HubImage>(r#"{"name":"centos"}"#).unwrap();
        assert_eq!(hub_image.fullname(), "centos:latest");
        assert_eq!(hub_image.into_image().digest, DigestState::Unknown);
    }
}
