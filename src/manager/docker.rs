use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use reqwest::blocking::Client;

use crate::config::DockerConfig;
use crate::digest::http_client;
use crate::error::{BackendContext, Result};
use crate::image::{DigestState, Image, PullPolicy};
use crate::manager::{BackendType, Manager};
use crate::pack::{backend_image_name, prepare, PAYLOAD_FILE};
use crate::runtime::docker::DockerRuntime;
use crate::runtime::{RegistryAuth, RuntimeClient, DIGEST_LABEL};
use crate::util::io::check_progress;
use crate::util::size::{QemuImgProbe, SizeProbe};
use crate::ImageStream;

const LIBRARY_PREFIX: &str = "library/";

/// Manager storing images in a container runtime.
pub struct DockerManager {
    prefix: String,
    auth: RegistryAuth,
    runtime: Arc<dyn RuntimeClient>,
    probe: Arc<dyn SizeProbe>,
    http: Client,
}

impl DockerManager {
    pub fn new(cfg: &DockerConfig) -> Result<DockerManager> {
        let runtime = DockerRuntime::new(&cfg.endpoint, cfg.timeout())?;
        let probe = QemuImgProbe::new(&cfg.size_probe);
        DockerManager::with_clients(cfg, Arc::new(runtime), Arc::new(probe))
    }

    pub fn with_clients(cfg: &DockerConfig, runtime: Arc<dyn RuntimeClient>, probe: Arc<dyn SizeProbe>) -> Result<DockerManager> {
        let http = http_client(cfg.timeout().unwrap_or(Duration::from_secs(30)))?;
        Ok(DockerManager {
            prefix: cfg.prefix.trim_end_matches('/').to_string(),
            auth: cfg.registry_auth(),
            runtime,
            probe,
            http,
        })
    }

    /// Name of `img` inside the runtime.
    pub fn backend_name(&self, img: &Image) -> String {
        backend_image_name(&self.prefix, &img.owner, &img.fullname())
    }

    /// Inspects the pulled image and reads the payload's location, size and digest.
    pub fn load_metadata(&self, img: &mut Image) -> Result<()> {
        let name = self.backend_name(img);
        let inspect = self.runtime.inspect(&name).backend_ctx("inspect", &name)?;
        let upper_dir = inspect
            .upper_dir()
            .ok_or_else(|| anyhow::anyhow!("image has no writable layer directory"))
            .backend_ctx("inspect", &name)?;
        let local_path = upper_dir.join(PAYLOAD_FILE);
        let size = self.probe.probe(&local_path).backend_ctx("probe size", &name)?;
        debug!("{} at {} ({:?})", name, local_path.to_string_lossy(), size);
        img.local_path = Some(local_path);
        img.actual_size = size.actual;
        img.virtual_size = size.virtual_size;
        img.digest = DigestState::from_label(inspect.label(DIGEST_LABEL));
        Ok(())
    }

    /// Turns a runtime repo tag back into an image name, if it lives under `prefix`.
    fn strip_repo_tag<'a>(prefix: &str, repo_tag: &'a str) -> Option<&'a str> {
        let rest = if prefix.is_empty() {
            repo_tag
        } else {
            let rest = repo_tag.strip_prefix(prefix)?;
            if !rest.is_empty() && !rest.starts_with('/') && !prefix.ends_with('/') {
                return None;
            }
            rest
        };
        let rest = rest.trim_start_matches('/');
        Some(rest.strip_prefix(LIBRARY_PREFIX).unwrap_or(rest))
    }
}

impl Manager for DockerManager {
    fn backend(&self) -> BackendType {
        BackendType::Docker
    }

    fn list_local_images(&self, owner: &str) -> Result<Vec<Image>> {
        let summaries = self.runtime.list_images().backend_ctx("list", &self.prefix)?;
        let prefix = [self.prefix.as_str(), owner]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<&str>>()
            .join("/");
        let mut images = Vec::new();
        for repo_tag in summaries.iter().flat_map(|summary| summary.repo_tags.iter().flatten()) {
            let fullname = match DockerManager::strip_repo_tag(&prefix, repo_tag) {
                Some(fullname) => fullname,
                None => continue,
            };
            let fullname = if owner.is_empty() || fullname.contains('/') {
                fullname.to_string()
            } else {
                format!("{}/{}", owner, fullname)
            };
            match Image::new(&fullname) {
                Ok(img) => images.push(img),
                Err(err) => debug!("Skip {}: {}", repo_tag, err),
            }
        }
        Ok(images)
    }

    fn load_image(&self, name: &str) -> Result<Image> {
        let mut img = self.new_image(name)?;
        let mut stream = self.pull(&mut img, PullPolicy::default())?;
        check_progress(&mut stream, "pull", &self.backend_name(&img))?;
        self.load_metadata(&mut img)?;
        Ok(img)
    }

    fn prepare(&self, source: &str, image: &Image) -> Result<ImageStream> {
        prepare(self.runtime.as_ref(), &self.http, source, &self.backend_name(image))
    }

    fn pull(&self, image: &mut Image, _policy: PullPolicy) -> Result<ImageStream> {
        let name = self.backend_name(image);
        info!("Pull {}", name);
        self.runtime.pull(&name, &self.auth).backend_ctx("pull", &name)
    }

    fn push(&self, image: &Image, force: bool) -> Result<ImageStream> {
        let name = self.backend_name(image);
        info!("Push {}", name);
        self.runtime.push(&name, &self.auth, force).backend_ctx("push", &name)
    }

    fn remove_local(&self, image: &Image) -> Result<()> {
        let name = self.backend_name(image);
        info!("Remove {}", name);
        self.runtime.remove(&name, true, true).backend_ctx("remove", &name)
    }

    fn check_health(&self) -> Result<()> {
        self.runtime.ping().backend_ctx("ping", "docker")
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use anyhow::anyhow;

    use super::*;
    use crate::error::VmImageError;
    use crate::runtime::{BuildContext, GraphDriver, ImageInspect, ImageSummary, InspectConfig};
    use crate::util::size::ImageSize;

    #[derive(Default)]
    struct FakeRuntime {
        pull_output: Option<&'static str>,
        repo_tags: Vec<&'static str>,
        labels: Vec<(&'static str, &'static str)>,
        upper_dir: Option<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRuntime {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call)
        }
    }

    impl RuntimeClient for FakeRuntime {
        fn list_images(&self) -> anyhow::Result<Vec<ImageSummary>> {
            Ok(vec![
                ImageSummary {
                    id: "sha256:1".to_string(),
                    repo_tags: Some(self.repo_tags.iter().map(|tag| tag.to_string()).collect()),
                    size: 0,
                },
                ImageSummary {
                    id: "sha256:dangling".to_string(),
                    repo_tags: None,
                    size: 0,
                },
            ])
        }

        fn build(&self, context: BuildContext) -> anyhow::Result<ImageStream> {
            self.record(format!("build {}", context.tag));
            Ok(Box::new(Cursor::new(Vec::new())))
        }

        fn pull(&self, reference: &str, auth: &RegistryAuth) -> anyhow::Result<ImageStream> {
            self.record(format!("pull {} {}", reference, auth.username));
            match self.pull_output {
                Some(output) => Ok(Box::new(Cursor::new(output.as_bytes().to_vec()))),
                None => Ok(Box::new(Cursor::new(b"{\"status\":\"Downloading\"}\n".repeat(64)))),
            }
        }

        fn push(&self, reference: &str, _auth: &RegistryAuth, all_tags: bool) -> anyhow::Result<ImageStream> {
            self.record(format!("push {} {}", reference, all_tags));
            Ok(Box::new(Cursor::new(Vec::new())))
        }

        fn inspect(&self, reference: &str) -> anyhow::Result<ImageInspect> {
            self.record(format!("inspect {}", reference));
            let labels = self.labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
            Ok(ImageInspect {
                id: "sha256:1".to_string(),
                graph_driver: GraphDriver {
                    name: "overlay2".to_string(),
                    data: self.upper_dir.map(|dir| [("UpperDir".to_string(), dir.to_string())].into_iter().collect()),
                },
                config: Some(InspectConfig { labels: Some(labels) }),
            })
        }

        fn remove(&self, reference: &str, force: bool, prune_children: bool) -> anyhow::Result<()> {
            self.record(format!("remove {} {} {}", reference, force, prune_children));
            if !force {
                return Err(anyhow!("conflict: image is being used by running container"));
            }
            Ok(())
        }

        fn ping(&self) -> anyhow::Result<()> {
            Err(anyhow!("connection refused"))
        }
    }

    struct FixedProbe;

    impl SizeProbe for FixedProbe {
        fn probe(&self, _path: &Path) -> anyhow::Result<ImageSize> {
            Ok(ImageSize {
                actual: 100,
                virtual_size: 1000,
            })
        }
    }

    fn config() -> DockerConfig {
        DockerConfig {
            prefix: "harbor.io/vm".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            ..Default::default()
        }
    }

    fn manager(runtime: Arc<FakeRuntime>) -> DockerManager {
        DockerManager::with_clients(&config(), runtime, Arc::new(FixedProbe)).unwrap()
    }

    #[test]
    fn backend_names() {
        let mgr = manager(Arc::new(FakeRuntime::default()));
        assert_eq!(mgr.backend_name(&Image::new("ubuntu").unwrap()), "harbor.io/vm/library/ubuntu:latest");
        assert_eq!(mgr.backend_name(&Image::new("alice/ubuntu:20.04").unwrap()), "harbor.io/vm/alice/ubuntu:20.04");
    }

    #[test]
    fn list_strips_prefix_and_library() {
        let runtime = Arc::new(FakeRuntime {
            repo_tags: vec![
                "harbor.io/vm/library/ubuntu:latest",
                "harbor.io/vm/alice/win10:v2",
                "harbor.io/vm/bob/centos:7",
                "harbor.io/vmx/alice/other:1",
                "docker.io/library/nginx:latest",
                "harbor.io/vm/a/b/c:1",
            ],
            ..Default::default()
        });
        let mgr = manager(runtime);

        let all = mgr.list_local_images("").unwrap().iter().map(|img| img.fullname()).collect::<Vec<String>>();
        assert_eq!(all, vec!["ubuntu:latest", "alice/win10:v2", "bob/centos:7"]);

        let alice = mgr.list_local_images("alice").unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].owner, "alice");
        assert_eq!(alice[0].fullname(), "alice/win10:v2");
    }

    #[test]
    fn load_image_pulls_and_reads_metadata() {
        let runtime = Arc::new(FakeRuntime {
            labels: vec![("SHA256", "sha256:cafe")],
            upper_dir: Some("/var/lib/docker/overlay2/abc/diff"),
            ..Default::default()
        });
        let mgr = manager(runtime.clone());

        let img = mgr.load_image("alice/ubuntu:20.04").unwrap();
        assert_eq!(img.local_path, Some(PathBuf::from("/var/lib/docker/overlay2/abc/diff/vm.img")));
        assert_eq!(img.actual_size, 100);
        assert_eq!(img.virtual_size, 1000);
        assert_eq!(img.digest.value(), Some("sha256:cafe"));
        assert_eq!(
            runtime.calls(),
            vec!["pull harbor.io/vm/alice/ubuntu:20.04 user", "inspect harbor.io/vm/alice/ubuntu:20.04"]
        );
    }

    #[test]
    fn load_image_fails_on_error_in_pull_output() {
        let runtime = Arc::new(FakeRuntime {
            pull_output: Some(
                "{\"status\":\"Pulling from vm/alice/ubuntu\"}\n{\"error\":\"manifest for harbor.io/vm/alice/ubuntu:20.04 not found\"}\n",
            ),
            upper_dir: Some("/u"),
            ..Default::default()
        });
        let mgr = manager(runtime.clone());

        let err = mgr.load_image("alice/ubuntu:20.04").unwrap_err();
        assert!(matches!(err, VmImageError::Backend { op: "pull", .. }), "{:?}", err);
        assert!(err.to_string().contains("not found"), "{}", err);
        assert_eq!(runtime.calls(), vec!["pull harbor.io/vm/alice/ubuntu:20.04 user"]);
    }

    #[test]
    fn metadata_without_label_leaves_digest_unknown() {
        let runtime = Arc::new(FakeRuntime {
            upper_dir: Some("/u"),
            ..Default::default()
        });
        let img = manager(runtime).load_image("ubuntu").unwrap();
        assert_eq!(img.digest, DigestState::Unknown);
    }

    #[test]
    fn metadata_without_upper_dir_is_a_backend_error() {
        let mgr = manager(Arc::new(FakeRuntime::default()));
        let err = mgr.load_image("ubuntu").unwrap_err();
        assert!(matches!(err, VmImageError::Backend { op: "inspect", .. }), "{:?}", err);
    }

    #[test]
    fn remove_local_forces_and_prunes() {
        let runtime = Arc::new(FakeRuntime::default());
        let mgr = manager(runtime.clone());
        mgr.remove_local(&Image::new("alice/ubuntu:20.04").unwrap()).unwrap();
        assert_eq!(runtime.calls(), vec!["remove harbor.io/vm/alice/ubuntu:20.04 true true"]);
    }

    #[test]
    fn push_force_means_all_tags() {
        let runtime = Arc::new(FakeRuntime::default());
        let mgr = manager(runtime.clone());
        let img = Image::new("ubuntu:22.04").unwrap();
        mgr.push(&img, true).unwrap();
        mgr.push(&img, false).unwrap();
        assert_eq!(
            runtime.calls(),
            vec!["push harbor.io/vm/library/ubuntu:22.04 true", "push harbor.io/vm/library/ubuntu:22.04 false"]
        );
    }

    #[test]
    fn prepare_tags_with_backend_name() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("ubuntu.img");
        std::fs::write(&source, b"disk").unwrap();
        let runtime = Arc::new(FakeRuntime::default());
        let mgr = manager(runtime.clone());
        mgr.prepare(&source.to_string_lossy(), &Image::new("ubuntu").unwrap()).unwrap();
        assert_eq!(runtime.calls(), vec!["build harbor.io/vm/library/ubuntu:latest"]);
    }

    #[test]
    fn health_wraps_runtime_error() {
        let mgr = manager(Arc::new(FakeRuntime::default()));
        assert!(matches!(mgr.check_health(), Err(VmImageError::Backend { op: "ping", .. })));
    }
}
