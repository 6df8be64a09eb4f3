use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::image::{Image, PullPolicy};
use crate::manager::{BackendType, DockerManager, HubManager, Manager, MockManager};
use crate::ImageStream;

/// Builds a manager of type `ty` out of `config`. No caching.
pub fn build_manager(ty: BackendType, config: &Config) -> Result<Arc<dyn Manager>> {
    config.check(ty)?;
    info!("Create {} image manager", ty);
    let mgr: Arc<dyn Manager> = match ty {
        BackendType::Docker => Arc::new(DockerManager::new(&config.docker)?),
        BackendType::Hub => Arc::new(HubManager::new(&config.hub)?),
        BackendType::Mock => Arc::new(MockManager::new()),
    };
    Ok(mgr)
}

/// Registry holding at most one manager per backend type.
///
/// The default type is built when the factory is created, others on first use.
pub struct Factory {
    config: Config,
    default_type: BackendType,
    managers: DashMap<BackendType, Arc<dyn Manager>>,
}

impl Factory {
    pub fn new(config: Config) -> Result<Factory> {
        Factory::with_builder(config, build_manager)
    }

    fn with_builder(mut config: Config, builder: fn(BackendType, &Config) -> Result<Arc<dyn Manager>>) -> Result<Factory> {
        config.refine()?;
        let default_type = config.backend_type()?;
        let factory = Factory {
            config,
            default_type,
            managers: DashMap::new(),
        };
        factory.managers.insert(default_type, builder(default_type, &factory.config)?);
        Ok(factory)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn default_type(&self) -> BackendType {
        self.default_type
    }

    /// Manager of the named type, `""` meaning the default one.
    pub fn get_manager(&self, ty: &str) -> Result<Arc<dyn Manager>> {
        let ty = if ty.is_empty() { self.default_type } else { ty.parse::<BackendType>()? };
        self.manager_of(ty, build_manager)
    }

    fn manager_of(&self, ty: BackendType, builder: fn(BackendType, &Config) -> Result<Arc<dyn Manager>>) -> Result<Arc<dyn Manager>> {
        if let Some(mgr) = self.managers.get(&ty) {
            return Ok(mgr.value().clone());
        }
        debug!("No {} manager yet", ty);
        let mgr = self.managers.entry(ty).or_try_insert_with(|| builder(ty, &self.config))?;
        Ok(mgr.value().clone())
    }

    pub fn default_manager(&self) -> Result<Arc<dyn Manager>> {
        self.get_manager("")
    }

    pub fn new_image(&self, fullname: &str) -> Result<Image> {
        self.default_manager()?.new_image(fullname)
    }

    pub fn list_local_images(&self, owner: &str) -> Result<Vec<Image>> {
        self.default_manager()?.list_local_images(owner)
    }

    pub fn load_image(&self, name: &str) -> Result<Image> {
        self.default_manager()?.load_image(name)
    }

    pub fn prepare(&self, source: &str, image: &Image) -> Result<ImageStream> {
        self.default_manager()?.prepare(source, image)
    }

    /// Pulls with the configured pull policy.
    pub fn pull(&self, image: &mut Image) -> Result<ImageStream> {
        self.pull_with(image, self.config.pull_policy)
    }

    pub fn pull_with(&self, image: &mut Image, policy: PullPolicy) -> Result<ImageStream> {
        self.default_manager()?.pull(image, policy)
    }

    pub fn push(&self, image: &Image, force: bool) -> Result<ImageStream> {
        self.default_manager()?.push(image, force)
    }

    pub fn remove_local(&self, image: &Image) -> Result<()> {
        self.default_manager()?.remove_local(image)
    }

    pub fn check_health(&self) -> Result<()> {
        self.default_manager()?.check_health()
    }
}
