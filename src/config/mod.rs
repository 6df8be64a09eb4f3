use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use home::home_dir;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VmImageError};
use crate::image::PullPolicy;
use crate::manager::BackendType;
use crate::runtime::RegistryAuth;

pub mod cmd;

pub const DEFAULT_ENDPOINT: &str = "unix:///var/run/docker.sock";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Default backend: `docker`, `hub` or `mock`.
    #[serde(rename = "type", default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub pull_policy: PullPolicy,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub hub: HubConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DockerConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Registry namespace every image lives under, e.g. `harbor.example.com/vm`.
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_size_probe")]
    pub size_probe: String,
    /// Request timeout, 0 means none.
    #[serde(default)]
    pub timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HubConfig {
    #[serde(default)]
    pub addr: String,
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub timeout_secs: u64,
}

fn default_backend() -> String {
    BackendType::Docker.as_str().to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_size_probe() -> String {
    "qemu-img".to_string()
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/var/lib/vmimage")
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: default_backend(),
            pull_policy: PullPolicy::default(),
            docker: DockerConfig::default(),
            hub: HubConfig::default(),
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        DockerConfig {
            endpoint: default_endpoint(),
            prefix: String::new(),
            username: String::new(),
            password: String::new(),
            size_probe: default_size_probe(),
            timeout_secs: 0,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            addr: String::new(),
            base_dir: default_base_dir(),
            username: String::new(),
            password: String::new(),
            timeout_secs: 0,
        }
    }
}

impl Config {
    /// Reads a JSON config file and refines it.
    pub fn load(path: &Path) -> Result<Config> {
        let mut config = Config::read(path)?;
        config.refine()?;
        Ok(config)
    }

    /// Reads a JSON config file as is.
    pub fn read(path: &Path) -> Result<Config> {
        debug!("Load config from {}", path.to_string_lossy());
        let file = File::open(path)
            .map_err(|err| VmImageError::config(format!("open {} failed: {}", path.to_string_lossy(), err)))?;
        serde_json::from_reader::<_, Config>(file)
            .map_err(|err| VmImageError::config(format!("parse {} failed: {}", path.to_string_lossy(), err)))
    }

    /// `$HOME/.vmimage/config.json`
    pub fn default_path() -> Option<PathBuf> {
        home_dir().map(|dir| dir.join(".vmimage").join("config.json"))
    }

    pub fn backend_type(&self) -> Result<BackendType> {
        self.backend.parse::<BackendType>()
    }

    /// Expands `${VAR}` credentials and validates the default backend's section.
    pub fn refine(&mut self) -> Result<()> {
        for value in [
            &mut self.docker.username,
            &mut self.docker.password,
            &mut self.hub.username,
            &mut self.hub.password,
        ] {
            *value = value_or_env(value)?;
        }
        self.check(self.backend_type()?)
    }

    /// Checks that the section of `ty` has what its manager needs.
    pub fn check(&self, ty: BackendType) -> Result<()> {
        match ty {
            BackendType::Docker => {
                if self.docker.username.is_empty() || self.docker.password.is_empty() {
                    return Err(VmImageError::config("docker's username or password should not be empty"));
                }
            }
            BackendType::Hub => {
                if self.hub.username.is_empty() || self.hub.password.is_empty() {
                    return Err(VmImageError::config("image hub's username or password should not be empty"));
                }
                if self.hub.addr.is_empty() {
                    return Err(VmImageError::config("image hub's address shouldn't be empty"));
                }
            }
            BackendType::Mock => {}
        }
        Ok(())
    }
}

impl DockerConfig {
    pub fn registry_auth(&self) -> RegistryAuth {
        RegistryAuth {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        timeout(self.timeout_secs)
    }
}

impl HubConfig {
    pub fn timeout(&self) -> Option<Duration> {
        timeout(self.timeout_secs)
    }
}

fn timeout(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

/// `${NAME}` is replaced by the environment variable `NAME`, anything else is
/// taken literally.
pub fn value_or_env(param: &str) -> Result<String> {
    let value = if param.starts_with("${") && param.ends_with('}') {
        let name = &param[2..param.len() - 1];
        env::var(name).map_err(|_| VmImageError::config(format!("environment variable {} is not set", name)))?
    } else {
        param.to_string()
    };
    Ok(value)
}
