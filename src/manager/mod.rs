use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::{Result, VmImageError};
use crate::image::{Image, PullPolicy};
use crate::ImageStream;

pub mod docker;
pub mod hub;
pub mod mock;

pub use docker::DockerManager;
pub use hub::HubManager;
pub use mock::MockManager;

/// The closed set of backends a manager can sit on.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum BackendType {
    Docker,
    Hub,
    Mock,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Docker => "docker",
            BackendType::Hub => "hub",
            BackendType::Mock => "mock",
        }
    }
}

impl FromStr for BackendType {
    type Err = VmImageError;

    fn from_str(arg: &str) -> Result<Self, Self::Err> {
        Ok(match arg {
            "docker" => BackendType::Docker,
            "hub" | "vmihub" => BackendType::Hub,
            "mock" => BackendType::Mock,
            _ => return Err(VmImageError::config(format!("invalid image manager type: {}", arg))),
        })
    }
}

impl Display for BackendType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image operations against one backend.
///
/// Every call blocks until the backend answered. Streams handed back by
/// `prepare`, `pull` and `push` carry backend progress output, failures
/// included; read them with [`crate::util::io::check_progress`].
pub trait Manager: Send + Sync {
    fn backend(&self) -> BackendType;

    /// Parses `fullname` into an unresolved image. No I/O.
    fn new_image(&self, fullname: &str) -> Result<Image> {
        Image::new(fullname)
    }

    /// Images present locally whose owner is `owner` (any owner when empty).
    fn list_local_images(&self, owner: &str) -> Result<Vec<Image>>;

    /// Pulls `name`, waits for the pull to finish and fills in the metadata.
    fn load_image(&self, name: &str) -> Result<Image>;

    /// Packages `source` (local path or URL) as `image`.
    fn prepare(&self, source: &str, image: &Image) -> Result<ImageStream>;

    fn pull(&self, image: &mut Image, policy: PullPolicy) -> Result<ImageStream>;

    /// `force` overwrites the remote copy (all tags for the container runtime).
    fn push(&self, image: &Image, force: bool) -> Result<ImageStream>;

    /// Deletes the backend's local copy, even while it is in use.
    fn remove_local(&self, image: &Image) -> Result<()>;

    fn check_health(&self) -> Result<()>;
}
