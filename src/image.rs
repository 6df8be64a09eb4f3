use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::digest::file_digest;
use crate::error::{Result, VmImageError};

pub const DEFAULT_TAG: &str = "latest";

/// Splits `[owner/]name[:tag]` into its parts. The tag defaults to `latest`.
///
/// Only the separators are checked, segments are not validated any further.
pub fn parse_name(fullname: &str) -> Result<(String, String, String)> {
    let parts = fullname.split('/').collect::<Vec<&str>>();
    let (owner, name_tag) = match parts.as_slice() {
        [name_tag] => ("", *name_tag),
        [owner, name_tag] => (*owner, *name_tag),
        _ => return Err(VmImageError::invalid_input(format!("invalid image name: {}", fullname))),
    };
    let parts = name_tag.split(':').collect::<Vec<&str>>();
    let (name, tag) = match parts.as_slice() {
        [name] => (*name, DEFAULT_TAG),
        [name, tag] => (*name, *tag),
        _ => return Err(VmImageError::invalid_input(format!("invalid image name: {}", fullname))),
    };
    Ok((owner.to_string(), name.to_string(), tag.to_string()))
}

pub fn format_name(owner: &str, name: &str, tag: &str) -> String {
    if owner.is_empty() {
        format!("{}:{}", name, tag)
    } else {
        format!("{}/{}:{}", owner, name, tag)
    }
}

/// `owner/name`, or just `name` for images without owner.
pub fn image_name(owner: &str, name: &str) -> String {
    if owner.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", owner, name)
    }
}

/// Filesystem-safe form of a canonical name: `/` becomes `.` and `:` becomes `-`.
pub fn storage_key(fullname: &str) -> String {
    fullname.replace('/', ".").replace(':', "-")
}

/// Whether a pulled copy may satisfy a pull request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    /// Fetch unconditionally.
    Always,
    /// Skip the transfer if the image is already present.
    #[default]
    #[serde(alias = "if-not-present")]
    IfNotPresent,
    /// Fail if the image is not present.
    Never,
}

impl FromStr for PullPolicy {
    type Err = VmImageError;

    fn from_str(arg: &str) -> Result<Self, Self::Err> {
        Ok(match arg.to_ascii_lowercase().as_str() {
            "always" => PullPolicy::Always,
            "ifnotpresent" | "if-not-present" => PullPolicy::IfNotPresent,
            "never" => PullPolicy::Never,
            _ => return Err(VmImageError::invalid_input(format!("unknown pull policy: {}", arg))),
        })
    }
}

impl Display for PullPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PullPolicy::Always => "always",
            PullPolicy::IfNotPresent => "ifnotpresent",
            PullPolicy::Never => "never",
        })
    }
}

/// Content digest of an image, computed on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DigestState {
    #[default]
    Unknown,
    Computed(String),
}

impl DigestState {
    pub fn from_label(value: Option<&String>) -> DigestState {
        match value {
            Some(digest) if !digest.is_empty() => DigestState::Computed(digest.clone()),
            _ => DigestState::Unknown,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            DigestState::Unknown => None,
            DigestState::Computed(digest) => Some(digest),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    #[serde(rename = "type", default)]
    pub os_type: String,
    #[serde(default)]
    pub distrib: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub arch: String,
}

/// One VM image: its canonical identity plus whatever the backend told us about it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    pub owner: String,
    pub name: String,
    pub tag: String,
    pub digest: DigestState,
    pub actual_size: u64,
    pub virtual_size: u64,
    pub local_path: Option<PathBuf>,
    pub os: OsInfo,
    pub private: bool,
    pub snapshot: Option<String>,
}

impl Image {
    /// Builds an unresolved image from its canonical name. Does no I/O.
    pub fn new(fullname: &str) -> Result<Image> {
        let (owner, name, tag) = parse_name(fullname)?;
        Ok(Image {
            owner,
            name,
            tag,
            ..Default::default()
        })
    }

    pub fn fullname(&self) -> String {
        format_name(&self.owner, &self.name, &self.tag)
    }

    pub fn storage_key(&self) -> String {
        storage_key(&self.fullname())
    }

    pub fn filepath(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    pub fn distro(&self) -> &str {
        &self.os.distrib
    }

    /// Returns the digest, hashing the local file first if it is still unknown.
    pub fn ensure_digest(&mut self) -> Result<&str> {
        if let DigestState::Unknown = self.digest {
            let path = self.local_path.as_ref().ok_or_else(|| {
                VmImageError::invalid_input(format!("image {} has no local file to digest", self.fullname()))
            })?;
            self.digest = DigestState::Computed(file_digest(path)?);
        }
        match &self.digest {
            DigestState::Computed(digest) => Ok(digest),
            DigestState::Unknown => unreachable!(),
        }
    }
}

impl Display for Image {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.fullname())
    }
}
