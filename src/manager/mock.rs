use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use log::debug;

use crate::digest::file_digest;
use crate::error::{Result, VmImageError};
use crate::image::{DigestState, Image, PullPolicy};
use crate::manager::{BackendType, Manager};
use crate::pack::Source;
use crate::{empty_stream, ImageStream};

#[derive(Default)]
struct MockState {
    /// Images present "locally".
    local: HashMap<String, Image>,
    /// Images pushed so far, what a pull fetches from.
    remote: HashMap<String, Image>,
    calls: Vec<String>,
}

/// In-memory backend for tests of code built on top of managers.
#[derive(Default)]
pub struct MockManager {
    state: Mutex<MockState>,
}

impl MockManager {
    pub fn new() -> MockManager {
        MockManager::default()
    }

    /// Seeds the remote side with `images`.
    pub fn with_remote(images: Vec<Image>) -> MockManager {
        let mgr = MockManager::default();
        mgr.state().remote = images.into_iter().map(|img| (img.fullname(), img)).collect();
        mgr
    }

    /// Every call so far as `<op> <fullname>`.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // a panicking test must not poison every later call
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, op: &str, fullname: &str) -> MutexGuard<'_, MockState> {
        let mut state = self.state();
        state.calls.push(format!("{} {}", op, fullname));
        state
    }
}

impl Manager for MockManager {
    fn backend(&self) -> BackendType {
        BackendType::Mock
    }

    fn list_local_images(&self, owner: &str) -> Result<Vec<Image>> {
        let state = self.record("list", owner);
        let mut images = state
            .local
            .values()
            .filter(|img| owner.is_empty() || img.owner == owner)
            .cloned()
            .collect::<Vec<Image>>();
        images.sort_by_key(|img| img.fullname());
        Ok(images)
    }

    fn load_image(&self, name: &str) -> Result<Image> {
        let fullname = self.new_image(name)?.fullname();
        let state = self.record("load", &fullname);
        state
            .local
            .get(&fullname)
            .or_else(|| state.remote.get(&fullname))
            .cloned()
            .ok_or_else(|| VmImageError::backend("load", fullname.clone(), "image not found"))
    }

    fn prepare(&self, source: &str, image: &Image) -> Result<ImageStream> {
        let fullname = image.fullname();
        let mut img = image.clone();
        if let Source::Local(path) = Source::detect(source) {
            img.digest = DigestState::Computed(file_digest(&path)?);
            img.actual_size = path.metadata()?.len();
            img.local_path = Some(path);
        }
        debug!("Mock prepared {} from {}", fullname, source);
        self.record("prepare", &fullname).local.insert(fullname, img);
        Ok(empty_stream())
    }

    fn pull(&self, image: &mut Image, policy: PullPolicy) -> Result<ImageStream> {
        let fullname = image.fullname();
        let state = self.record("pull", &fullname);
        let found = match policy {
            PullPolicy::Always => state.remote.get(&fullname),
            PullPolicy::IfNotPresent => state.local.get(&fullname).or_else(|| state.remote.get(&fullname)),
            PullPolicy::Never => state.local.get(&fullname),
        };
        let found = found
            .cloned()
            .ok_or_else(|| VmImageError::backend("pull", fullname.clone(), format!("image not found ({})", policy)))?;
        drop(state);
        *image = found.clone();
        self.state().local.insert(fullname, found);
        Ok(empty_stream())
    }

    fn push(&self, image: &Image, _force: bool) -> Result<ImageStream> {
        let fullname = image.fullname();
        self.record("push", &fullname).remote.insert(fullname, image.clone());
        Ok(empty_stream())
    }

    fn remove_local(&self, image: &Image) -> Result<()> {
        let fullname = image.fullname();
        self.record("remove", &fullname).local.remove(&fullname);
        Ok(())
    }

    fn check_health(&self) -> Result<()> {
        self.record("health", "");
        Ok(())
    }
}
