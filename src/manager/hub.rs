use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use url::Url;

use crate::config::HubConfig;
use crate::error::{BackendContext, Result, VmImageError};
use crate::hub::client::{HubAuth, HubHttpClient};
use crate::hub::{HubApi, HubImage};
use crate::image::{Image, PullPolicy};
use crate::manager::{BackendType, Manager};
use crate::{empty_stream, ImageStream};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(1);

/// Manager storing images in the image hub and its local cache.
pub struct HubManager {
    api: Arc<dyn HubApi>,
}

impl HubManager {
    pub fn new(cfg: &HubConfig) -> Result<HubManager> {
        let auth = HubAuth {
            username: cfg.username.clone(),
            password: cfg.password.clone(),
        };
        let client = HubHttpClient::new(&cfg.addr, &cfg.base_dir, auth, cfg.timeout())?;
        Ok(HubManager::with_api(Arc::new(client)))
    }

    pub fn with_api(api: Arc<dyn HubApi>) -> HubManager {
        HubManager { api }
    }
}

impl Manager for HubManager {
    fn backend(&self) -> BackendType {
        BackendType::Hub
    }

    fn list_local_images(&self, owner: &str) -> Result<Vec<Image>> {
        let images = self.api.list_local().backend_ctx("list", owner)?;
        Ok(images
            .into_iter()
            .filter(|hub_image| owner.is_empty() || hub_image.username == owner)
            .map(HubImage::into_image)
            .collect())
    }

    fn load_image(&self, name: &str) -> Result<Image> {
        let mut img = self.new_image(name)?;
        let hub_image = self.api.get_info(&img.fullname()).backend_ctx("load", name)?;
        hub_image.apply_to(&mut img);
        Ok(img)
    }

    fn prepare(&self, source: &str, image: &Image) -> Result<ImageStream> {
        let fullname = image.fullname();
        let hub_image = self.api.import(&fullname, source).backend_ctx("prepare", &fullname)?;
        info!("Prepared {} at {:?}", fullname, hub_image.local_path);
        Ok(empty_stream())
    }

    fn pull(&self, image: &mut Image, policy: PullPolicy) -> Result<ImageStream> {
        let fullname = image.fullname();
        let local = self.api.local_info(&fullname).backend_ctx("pull", &fullname)?;
        let hub_image = match (policy, local) {
            (PullPolicy::Never, None) => {
                return Err(VmImageError::backend(
                    "pull",
                    fullname,
                    "image is not present locally and pull policy is never",
                ))
            }
            (PullPolicy::Never, Some(local)) | (PullPolicy::IfNotPresent, Some(local)) => {
                debug!("{} is present locally, skip download", fullname);
                local
            }
            _ => {
                info!("Pull {}", fullname);
                self.api.download(&fullname).backend_ctx("pull", &fullname)?
            }
        };
        hub_image.apply_to(image);
        Ok(empty_stream())
    }

    fn push(&self, image: &Image, force: bool) -> Result<ImageStream> {
        let fullname = image.fullname();
        info!("Push {}", fullname);
        self.api.push(&HubImage::from_image(image), force).backend_ctx("push", &fullname)?;
        Ok(empty_stream())
    }

    fn remove_local(&self, image: &Image) -> Result<()> {
        let fullname = image.fullname();
        info!("Remove {}", fullname);
        self.api.remove_local(&fullname).backend_ctx("remove", &fullname)
    }

    fn check_health(&self) -> Result<()> {
        let addr = self.api.addr();
        let url = Url::parse(addr).map_err(|err| VmImageError::config(format!("invalid hub address {}: {}", addr, err)))?;
        let host = url
            .host_str()
            .ok_or_else(|| VmImageError::config(format!("hub address {} has no host", addr)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| VmImageError::config(format!("hub address {} has no port", addr)))?;
        let socket_addrs = (host, port)
            .to_socket_addrs()
            .map_err(|err| VmImageError::network(format!("resolve {} failed: {}", host, err)))?
            .collect::<Vec<_>>();
        let mut last_err = None;
        for socket_addr in socket_addrs {
            match TcpStream::connect_timeout(&socket_addr, HEALTH_TIMEOUT) {
                Ok(_) => return Ok(()),
                Err(err) => last_err = Some(err),
            }
        }
        Err(VmImageError::network(match last_err {
            Some(err) => format!("connect to {} failed: {}", addr, err),
            None => format!("{} resolves to no address", addr),
        }))
    }
}
