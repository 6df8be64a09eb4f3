use std::io::{self, Cursor, Read};
use std::time::Duration;

use anyhow::{anyhow, Result};
use bollard::auth::DockerCredentials;
use bollard::image::{BuildImageOptions, CreateImageOptions, ListImagesOptions, PushImageOptions, RemoveImageOptions};
use bollard::{Docker, API_DEFAULT_VERSION};
use bytes::Bytes;
use futures::{pin_mut, Stream, StreamExt};
use log::{debug, warn};
use serde::Serialize;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::error::VmImageError;
use crate::runtime::{
    split_reference, BuildContext, GraphDriver, ImageInspect, ImageSummary, InspectConfig, RegistryAuth, RuntimeClient,
};
use crate::ImageStream;

/// Request timeout when none is configured. Builds upload the whole disk image
/// before the daemon answers.
const UNLIMITED_TIMEOUT_SECS: u64 = 24 * 60 * 60;
const BODY_CHUNK_SIZE: usize = 1024 * 1024;
/// Progress lines buffered ahead of the reader.
const PROGRESS_BUFFER: usize = 64;

/// Docker Engine client. Calls block on a runtime owned by the client.
pub struct DockerRuntime {
    docker: Docker,
    rt: Runtime,
}

impl DockerRuntime {
    /// `endpoint` is `unix:///path/to/docker.sock`, `tcp://host:port` or
    /// `http://host:port`. Empty means the local defaults (`DOCKER_HOST` or the
    /// standard socket).
    pub fn new(endpoint: &str, timeout: Option<Duration>) -> crate::Result<DockerRuntime> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("vmimage-docker")
            .enable_all()
            .build()?;
        let timeout = timeout.map_or(UNLIMITED_TIMEOUT_SECS, |timeout| timeout.as_secs().max(1));
        let docker = {
            let _guard = rt.enter();
            connect(endpoint, timeout)?
        };
        Ok(DockerRuntime { docker, rt })
    }

    /// Forwards a daemon progress stream as JSON lines readable from blocking code.
    fn progress<F>(&self, forward: F) -> ImageStream
    where
        F: FnOnce(Docker, mpsc::Sender<Vec<u8>>) -> futures::future::BoxFuture<'static, ()>,
    {
        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
        self.rt.spawn(forward(self.docker.clone(), tx));
        Box::new(ProgressReader {
            rx,
            line: Cursor::new(Vec::new()),
        })
    }

    /// Turns a blocking reader into a request body fed from the blocking pool.
    fn body(&self, mut archive: Box<dyn Read + Send>) -> hyper::Body {
        let (mut sender, body) = hyper::Body::channel();
        let handle = self.rt.handle().clone();
        self.rt.spawn_blocking(move || {
            let mut buf = vec![0u8; BODY_CHUNK_SIZE];
            loop {
                match archive.read(&mut buf) {
                    Ok(0) => break,
                    Ok(size) => {
                        if handle.block_on(sender.send_data(Bytes::copy_from_slice(&buf[..size]))).is_err() {
                            debug!("Build request closed before the context was sent");
                            break;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!("Read build context failed: {}", err);
                        sender.abort();
                        break;
                    }
                }
            }
        });
        body
    }
}

fn connect(endpoint: &str, timeout: u64) -> crate::Result<Docker> {
    let endpoint = endpoint.trim_end_matches('/');
    let result = if endpoint.is_empty() {
        Docker::connect_with_local_defaults()
    } else if endpoint.starts_with("unix://") {
        Docker::connect_with_unix(endpoint, timeout, API_DEFAULT_VERSION)
    } else if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") {
        Docker::connect_with_http(endpoint, timeout, API_DEFAULT_VERSION)
    } else {
        return Err(VmImageError::config(format!("invalid docker endpoint: {}", endpoint)));
    };
    result.map_err(|err| VmImageError::config(format!("connect docker {} failed: {}", endpoint, err)))
}

fn credentials(auth: &RegistryAuth) -> Option<DockerCredentials> {
    if auth.is_empty() {
        return None;
    }
    Some(DockerCredentials {
        username: Some(auth.username.clone()),
        password: Some(auth.password.clone()),
        ..Default::default()
    })
}

/// Serialises every stream item as one JSON line. Stream errors become
/// `{"error": ...}` lines so readers see them the same way as daemon-reported ones.
async fn forward<S, T>(stream: S, tx: mpsc::Sender<Vec<u8>>)
where
    S: Stream<Item = Result<T, bollard::errors::Error>>,
    T: Serialize,
{
    pin_mut!(stream);
    while let Some(item) = stream.next().await {
        let line = match item {
            Ok(info) => serde_json::to_vec(&info),
            Err(err) => serde_json::to_vec(&serde_json::json!({ "error": err.to_string() })),
        };
        let mut line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("Encode progress failed: {}", err);
                continue;
            }
        };
        line.push(b'\n');
        if tx.send(line).await.is_err() {
            debug!("Progress reader dropped");
            break;
        }
    }
}

struct ProgressReader {
    rx: mpsc::Receiver<Vec<u8>>,
    line: Cursor<Vec<u8>>,
}

impl Read for ProgressReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let size = self.line.read(buf)?;
            if size > 0 || buf.is_empty() {
                return Ok(size);
            }
            match self.rx.blocking_recv() {
                Some(line) => self.line = Cursor::new(line),
                None => return Ok(0),
            }
        }
    }
}

impl RuntimeClient for DockerRuntime {
    fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };
        let summaries = self.rt.block_on(self.docker.list_images(Some(options)))?;
        Ok(summaries
            .into_iter()
            .map(|summary| ImageSummary {
                id: summary.id,
                repo_tags: Some(summary.repo_tags),
                size: summary.size,
            })
            .collect())
    }

    fn build(&self, context: BuildContext) -> Result<ImageStream> {
        debug!("docker build {} -f {}", context.tag, context.dockerfile);
        let options = BuildImageOptions {
            dockerfile: context.dockerfile,
            t: context.tag,
            rm: true,
            ..Default::default()
        };
        let body = self.body(context.archive);
        Ok(self.progress(move |docker, tx| {
            Box::pin(async move {
                let stream = docker.build_image(options, None, Some(body));
                forward(stream, tx).await;
            })
        }))
    }

    fn pull(&self, reference: &str, auth: &RegistryAuth) -> Result<ImageStream> {
        let (repo, tag) = split_reference(reference);
        debug!("docker pull {}", reference);
        let options = CreateImageOptions {
            from_image: repo.to_string(),
            tag: tag.unwrap_or("latest").to_string(),
            ..Default::default()
        };
        let credentials = credentials(auth);
        Ok(self.progress(move |docker, tx| {
            Box::pin(async move {
                let stream = docker.create_image(Some(options), None, credentials);
                forward(stream, tx).await;
            })
        }))
    }

    fn push(&self, reference: &str, auth: &RegistryAuth, all_tags: bool) -> Result<ImageStream> {
        let (repo, tag) = split_reference(reference);
        debug!("docker push {} (all tags: {})", reference, all_tags);
        let repo = repo.to_string();
        let options = match (all_tags, tag) {
            (false, Some(tag)) => Some(PushImageOptions { tag: tag.to_string() }),
            _ => None,
        };
        let credentials = credentials(auth);
        Ok(self.progress(move |docker, tx| {
            Box::pin(async move {
                let stream = docker.push_image(&repo, options, credentials);
                forward(stream, tx).await;
            })
        }))
    }

    fn inspect(&self, reference: &str) -> Result<ImageInspect> {
        let inspect = self.rt.block_on(self.docker.inspect_image(reference))?;
        Ok(ImageInspect {
            id: inspect.id.unwrap_or_default(),
            graph_driver: inspect
                .graph_driver
                .map(|driver| GraphDriver {
                    name: driver.name,
                    data: Some(driver.data),
                })
                .unwrap_or_default(),
            config: inspect.config.map(|config| InspectConfig { labels: config.labels }),
        })
    }

    fn remove(&self, reference: &str, force: bool, prune_children: bool) -> Result<()> {
        let options = RemoveImageOptions {
            force,
            noprune: !prune_children,
        };
        let deleted = self.rt.block_on(self.docker.remove_image(reference, Some(options), None))?;
        debug!("docker rmi {}: {} layer(s)", reference, deleted.len());
        Ok(())
    }

    fn ping(&self) -> Result<()> {
        let pong = self.rt.block_on(self.docker.ping())?;
        if pong.trim() != "OK" {
            return Err(anyhow!("unexpected ping answer: {}", pong));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::util::io::check_progress;

    fn client(server: &MockServer) -> DockerRuntime {
        DockerRuntime::new(&server.uri(), Some(Duration::from_secs(5))).unwrap()
    }

    #[test]
    fn endpoint_forms() {
        assert!(DockerRuntime::new("unix:///var/run/docker.sock", None).is_ok());
        assert!(DockerRuntime::new("tcp://127.0.0.1:2375", None).is_ok());
        assert!(matches!(DockerRuntime::new("docker", None), Err(VmImageError::Config(_))));
        assert!(matches!(DockerRuntime::new("ftp://docker:21", None), Err(VmImageError::Config(_))));
    }

    #[test]
    fn build_error_inside_stream() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path_regex(r"^/v[0-9.]+/build$"))
                .and(query_param("t", "reg/library/ubuntu:latest"))
                .and(query_param("dockerfile", "Dockerfile.vmimage-abc"))
                .respond_with(ResponseTemplate::new(200).set_body_string(concat!(
                    "{\"stream\":\"Step 1/3 : FROM scratch\"}\n",
                    "{\"errorDetail\":{\"message\":\"ADD failed: file not found\"},\"error\":\"ADD failed: file not found\"}\n",
                )))
                .expect(1)
                .mount(&server)
                .await;
            server
        });
        let docker = client(&server);
        let context = BuildContext {
            archive: Box::new(Cursor::new(vec![0u8; 1024])),
            dockerfile: "Dockerfile.vmimage-abc".to_string(),
            tag: "reg/library/ubuntu:latest".to_string(),
        };
        let mut stream = docker.build(context).unwrap();
        let err = check_progress(&mut stream, "build", "ubuntu:latest").unwrap_err();
        assert!(err.to_string().contains("ADD failed: file not found"), "{}", err);
        rt.block_on(async move { server.verify().await });
    }

    #[test]
    fn pull_streams_progress() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path_regex(r"^/v[0-9.]+/images/create$"))
                .and(query_param("fromImage", "reg:5000/library/ubuntu"))
                .and(query_param("tag", "latest"))
                .respond_with(ResponseTemplate::new(200).set_body_string(concat!(
                    "{\"status\":\"Pulling from library/ubuntu\",\"id\":\"latest\"}\n",
                    "{\"status\":\"Status: Downloaded newer image\"}\n",
                )))
                .expect(1)
                .mount(&server)
                .await;
            server
        });
        let auth = RegistryAuth {
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        let mut stream = client(&server).pull("reg:5000/library/ubuntu:latest", &auth).unwrap();
        assert_eq!(check_progress(&mut stream, "pull", "ubuntu:latest").unwrap(), 2);
        rt.block_on(async move { server.verify().await });
    }

    #[test]
    fn failed_status_becomes_error_line() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path_regex(r"^/v[0-9.]+/images/create$"))
                .respond_with(ResponseTemplate::new(404).set_body_string("{\"message\":\"pull access denied\"}"))
                .mount(&server)
                .await;
            server
        });
        let mut stream = client(&server).pull("ghost:latest", &RegistryAuth::default()).unwrap();
        let err = check_progress(&mut stream, "pull", "ghost:latest").unwrap_err();
        assert!(err.to_string().contains("pull access denied"), "{}", err);
        rt.block_on(async move { drop(server) });
    }

    #[test]
    fn inspect_and_remove() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path_regex(r"^/v[0-9.]+/images/reg/alice/ubuntu:20.04/json$"))
                .respond_with(ResponseTemplate::new(200).set_body_string(
                    r#"{"Id":"sha256:1","GraphDriver":{"Name":"overlay2","Data":{"UpperDir":"/u"}},"Config":{"Labels":{"SHA256":"sha256:2"}}}"#,
                ))
                .mount(&server)
                .await;
            Mock::given(method("DELETE"))
                .and(path_regex(r"^/v[0-9.]+/images/reg/alice/ubuntu:20.04$"))
                .and(query_param("force", "true"))
                .and(query_param("noprune", "false"))
                .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
                .expect(1)
                .mount(&server)
                .await;
            server
        });
        let docker = client(&server);
        let inspect = docker.inspect("reg/alice/ubuntu:20.04").unwrap();
        assert_eq!(inspect.id, "sha256:1");
        assert_eq!(inspect.upper_dir().unwrap().to_string_lossy(), "/u");
        assert_eq!(inspect.label("SHA256").map(|s| s.as_str()), Some("sha256:2"));
        docker.remove("reg/alice/ubuntu:20.04", true, true).unwrap();
        rt.block_on(async move { server.verify().await });
    }

    #[test]
    fn error_status_carries_message() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path_regex(r"^/v[0-9.]+/images/missing:latest/json$"))
                .respond_with(ResponseTemplate::new(404).set_body_string("{\"message\":\"No such image\"}"))
                .mount(&server)
                .await;
            server
        });
        let err = client(&server).inspect("missing:latest").unwrap_err();
        assert!(err.to_string().contains("No such image"), "{}", err);
        rt.block_on(async move { drop(server) });
    }
}
