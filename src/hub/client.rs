use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::redirect::Policy;
use tempfile::NamedTempFile;

use crate::error::VmImageError;
use crate::hub::{HubApi, HubImage};
use crate::image::{parse_name, storage_key};
use crate::pack::Source;
use crate::util::file::PathExt;
use crate::util::sha::{bytes_sha256, file_sha256};

const API_PREFIX: &str = "/api/v1/image";
/// Stands in for the owner of images that have none.
const ANONYMOUS_OWNER: &str = "_";

#[derive(Clone)]
pub struct HubAuth {
    pub username: String,
    pub password: String,
}

/// Hub client that keeps pulled and imported images under `base_dir` as
/// `<cache key>.img` plus a `<cache key>.json` metadata record.
pub struct HubHttpClient {
    addr: String,
    base_dir: PathBuf,
    auth: HubAuth,
    client: Client,
}

impl HubHttpClient {
    pub fn new(addr: &str, base_dir: &Path, auth: HubAuth, timeout: Option<Duration>) -> crate::Result<HubHttpClient> {
        std::fs::create_dir_all(base_dir)?;
        let client = reqwest::blocking::ClientBuilder::new()
            .timeout(timeout)
            .gzip(true)
            .connect_timeout(Duration::from_secs(10))
            .deflate(true)
            .redirect(Policy::default())
            .build()
            .map_err(|err| VmImageError::config(format!("build hub client failed: {}", err)))?;
        Ok(HubHttpClient {
            addr: addr.trim_end_matches('/').to_string(),
            base_dir: base_dir.to_path_buf(),
            auth,
            client,
        })
    }

    fn payload_path(&self, fullname: &str) -> PathBuf {
        self.base_dir.join(format!("{}.img", cache_key(fullname)))
    }

    fn meta_path(&self, fullname: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", cache_key(fullname)))
    }

    /// `{addr}/api/v1/image/{owner}/{name}/{action}?tag={tag}`
    fn request(&self, method: reqwest::Method, fullname: &str, action: &str) -> Result<RequestBuilder> {
        let (owner, name, tag) = parse_name(fullname)?;
        let owner = if owner.is_empty() { ANONYMOUS_OWNER.to_string() } else { owner };
        let url = format!("{}{}/{}/{}/{}", self.addr, API_PREFIX, owner, name, action);
        Ok(self
            .client
            .request(method, url)
            .basic_auth(&self.auth.username, Some(&self.auth.password))
            .query(&[("tag", tag)]))
    }

    fn execute(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build()?;
        debug!("hub {} {}", request.method(), request.url());
        let response = self.client.execute(request)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(anyhow!("Request to image hub failed,status_code:{} ,body:{}", status.as_str(), body.trim()))
    }

    fn read_meta(&self, meta_path: &Path) -> Result<HubImage> {
        let file = File::open(meta_path)?;
        let mut hub_image = serde_json::from_reader::<_, HubImage>(file)
            .with_context(|| format!("bad image metadata {}", meta_path.to_string_lossy()))?;
        hub_image.local_path = Some(self.payload_path(&hub_image.fullname()));
        Ok(hub_image)
    }

    fn write_meta(&self, hub_image: &HubImage) -> Result<()> {
        let file = File::create(self.meta_path(&hub_image.fullname()))?;
        serde_json::to_writer_pretty(file, hub_image)?;
        Ok(())
    }

    /// Moves a completed transfer into the cache and records its metadata.
    fn store(&self, temp: NamedTempFile, mut hub_image: HubImage) -> Result<HubImage> {
        let fullname = hub_image.fullname();
        let sha256 = file_sha256(temp.path())?;
        let digest = format!("sha256:{}", sha256);
        if !hub_image.digest.is_empty() && hub_image.digest != digest {
            return Err(anyhow!("digest mismatch for {}: expect {}, got {}", fullname, hub_image.digest, digest));
        }
        let dest = self.payload_path(&fullname);
        temp.persist(&dest)?;
        hub_image.digest = digest;
        hub_image.size = dest.metadata()?.len();
        hub_image.local_path = Some(dest);
        self.write_meta(&hub_image)?;
        Ok(hub_image)
    }
}

/// File stem of a cached image: the readable storage key plus the sha256 of
/// the full name. `storage_key` alone maps `a/b-c:d` and `a/b:c-d` to the same
/// stem.
pub fn cache_key(fullname: &str) -> String {
    format!("{}.{}", storage_key(fullname), bytes_sha256(fullname.as_bytes()))
}

impl HubApi for HubHttpClient {
    fn addr(&self) -> &str {
        &self.addr
    }

    fn list_local(&self) -> Result<Vec<HubImage>> {
        let mut images = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let hub_image = match self.read_meta(&path) {
                Ok(hub_image) => hub_image,
                Err(err) => {
                    warn!("Skip {}: {:#}", path.to_string_lossy(), err);
                    continue;
                }
            };
            if hub_image.local_path.as_ref().map_or(false, |p| p.is_file()) {
                images.push(hub_image);
            }
        }
        Ok(images)
    }

    fn local_info(&self, fullname: &str) -> Result<Option<HubImage>> {
        let meta_path = self.meta_path(fullname);
        if !meta_path.is_file() || !self.payload_path(fullname).is_file() {
            return Ok(None);
        }
        Ok(Some(self.read_meta(&meta_path)?))
    }

    fn get_info(&self, fullname: &str) -> Result<HubImage> {
        let builder = self.request(reqwest::Method::GET, fullname, "info")?;
        let mut hub_image = self.execute(builder)?.json::<HubImage>()?;
        hub_image.local_path = None;
        Ok(hub_image)
    }

    fn import(&self, fullname: &str, source: &str) -> Result<HubImage> {
        let (username, name, tag) = parse_name(fullname)?;
        let mut temp = NamedTempFile::new_in(&self.base_dir)?;
        match Source::detect(source) {
            Source::Remote(url) => {
                info!("Copy {} from {}", fullname, url);
                let mut response = self.execute(self.client.get(url))?;
                io::copy(&mut response, temp.as_file_mut())?;
            }
            Source::Local(path) => {
                info!("Copy {} from {}", fullname, path.to_string_lossy());
                let mut file = File::open(&path).with_context(|| format!("open {}", path.to_string_lossy()))?;
                io::copy(&mut file, temp.as_file_mut())?;
            }
        }
        let hub_image = HubImage {
            username,
            name,
            tag,
            ..Default::default()
        };
        self.store(temp, hub_image)
    }

    fn download(&self, fullname: &str) -> Result<HubImage> {
        let hub_image = self.get_info(fullname)?;
        let builder = self.request(reqwest::Method::GET, fullname, "download")?;
        let mut response = self.execute(builder)?;
        let mut temp = NamedTempFile::new_in(&self.base_dir)?;
        let size = io::copy(&mut response, temp.as_file_mut())?;
        info!("Downloaded {} ({} bytes)", fullname, size);
        self.store(temp, hub_image)
    }

    fn push(&self, hub_image: &HubImage, force: bool) -> Result<()> {
        let fullname = hub_image.fullname();
        let path = hub_image.local_path.clone().unwrap_or_else(|| self.payload_path(&fullname));
        let file = File::open(&path).with_context(|| format!("{} is not present locally", fullname))?;
        let builder = self
            .request(reqwest::Method::POST, &fullname, "upload")?
            .query(&[("force", force.to_string()), ("digest", hub_image.digest.clone())])
            .header("Content-Type", "application/octet-stream")
            .body(file);
        let _ = self.execute(builder)?.text()?;
        info!("Pushed {}", fullname);
        Ok(())
    }

    fn remove_local(&self, fullname: &str) -> Result<()> {
        self.payload_path(fullname).remove()?;
        self.meta_path(fullname).remove()?;
        Ok(())
    }
}
