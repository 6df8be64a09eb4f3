//! Packaging pipeline: wraps a raw disk image (local file or URL) into a
//! single-layer container image built by the runtime.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use pipe::{PipeReader, PipeWriter};
use reqwest::blocking::Client;
use tar::Builder;
use tempfile::TempDir;
use url::Url;

use crate::digest::{file_digest, remote_sidecar_digest};
use crate::error::{BackendContext, Result, VmImageError};
use crate::runtime::{BuildContext, RuntimeClient, DIGEST_LABEL};
use crate::util::file::PathExt;
use crate::util::random::random_str;
use crate::ImageStream;

/// Fixed path of the payload inside the built image.
pub const PAYLOAD_FILE: &str = "vm.img";
/// Reserved name prefix of the generated recipe file.
pub const RECIPE_PREFIX: &str = "Dockerfile.vmimage";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Remote(Url),
    Local(PathBuf),
}

impl Source {
    /// Anything that parses as an absolute URL with a host is remote, everything
    /// else is a local path.
    pub fn detect(source: &str) -> Source {
        match Url::parse(source) {
            Ok(url) if !url.scheme().is_empty() && url.host_str().map_or(false, |h| !h.is_empty()) => Source::Remote(url),
            _ => Source::Local(PathBuf::from(source)),
        }
    }
}

/// The three-line recipe wrapping the payload.
pub fn recipe(digest: &str, payload: &str) -> String {
    format!("FROM scratch\nLABEL {}={}\nADD {} /{}", DIGEST_LABEL, digest, payload, PAYLOAD_FILE)
}

/// `prefix/[library/]fullname`. Empty segments are skipped.
pub fn backend_image_name(prefix: &str, owner: &str, fullname: &str) -> String {
    let library = if owner.is_empty() { "library" } else { "" };
    [prefix, library, fullname]
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<&str>>()
        .join("/")
}

/// Removes the recipe file when dropped, whatever way `prepare` exits.
struct RecipeFile {
    path: PathBuf,
}

impl RecipeFile {
    fn create(dir: &Path, body: &str) -> Result<RecipeFile> {
        let path = dir.join(format!("{}-{}", RECIPE_PREFIX, random_str(10)));
        std::fs::write(&path, body)?;
        Ok(RecipeFile { path })
    }

    fn name(&self) -> String {
        self.path.file_name().map(|name| name.to_string_lossy().to_string()).unwrap_or_default()
    }
}

impl Drop for RecipeFile {
    fn drop(&mut self) {
        self.path.remove_quietly();
    }
}

/// Builds the runtime image `tag` out of `source`.
///
/// Remote sources are not downloaded here: the recipe points the runtime at the
/// URL and the digest is read from the `.sha256sum` sidecar next to it. The
/// returned stream carries the build output, build failures included.
pub fn prepare(runtime: &dyn RuntimeClient, http: &Client, source: &str, tag: &str) -> Result<ImageStream> {
    prepare_in(runtime, http, source, tag, &std::env::temp_dir())
}

/// `prepare` with remote working directories created under `temp_root`.
pub fn prepare_in(runtime: &dyn RuntimeClient, http: &Client, source: &str, tag: &str, temp_root: &Path) -> Result<ImageStream> {
    match Source::detect(source) {
        Source::Remote(url) => {
            let temp_dir = tempfile::Builder::new().prefix("image-prepare-").tempdir_in(temp_root)?;
            let digest = remote_sidecar_digest(http, url.as_str())?;
            let work_dir = temp_dir.path().to_path_buf();
            build(runtime, &work_dir, &digest, url.as_str(), None, tag, Some(temp_dir))
        }
        Source::Local(path) => {
            let base_name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .ok_or_else(|| VmImageError::invalid_input(format!("not a file: {}", source)))?;
            let base_dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let digest = file_digest(&path)?;
            build(runtime, &base_dir, &digest, &base_name, Some(&base_name), tag, None)
        }
    }
}

fn build(
    runtime: &dyn RuntimeClient, work_dir: &Path, digest: &str, payload: &str, payload_file: Option<&str>, tag: &str,
    temp_dir: Option<TempDir>,
) -> Result<ImageStream> {
    let recipe_file = RecipeFile::create(work_dir, &recipe(digest, payload))?;
    let recipe_name = recipe_file.name();
    let mut entries = Vec::with_capacity(2);
    if let Some(payload_file) = payload_file {
        entries.push(payload_file);
    }
    entries.push(recipe_name.as_str());
    let archive = ContextArchive::spawn(work_dir, &entries, (recipe_file, temp_dir))?;
    info!("Build {} from {} (digest {})", tag, payload, digest);
    let context = BuildContext {
        archive: Box::new(archive),
        dockerfile: recipe_name.clone(),
        tag: tag.to_string(),
    };
    runtime.build(context).backend_ctx("build", tag)
}

/// Uncompressed tar of a build context, written by a worker thread into a pipe.
///
/// Reading it to the end reports a failure of the writer as an error. Whatever
/// the archive has to keep alive (recipe file, temp dir) is dropped by the
/// writer once it is done.
pub struct ContextArchive {
    pipe: PipeReader,
    writer: Option<JoinHandle<io::Result<()>>>,
}

impl ContextArchive {
    /// Streams exactly `entries` (relative to `dir`). Headers are taken from the
    /// files as they are.
    pub fn spawn<K: Send + 'static>(dir: &Path, entries: &[&str], keep: K) -> Result<ContextArchive> {
        let paths = entries
            .iter()
            .map(|entry| -> Result<(PathBuf, String)> {
                let path = dir.join(entry);
                std::fs::metadata(&path)?;
                Ok((path, entry.to_string()))
            })
            .collect::<Result<Vec<(PathBuf, String)>>>()?;
        let (reader, writer) = pipe::pipe();
        let writer = thread::Builder::new().name("build-context".to_string()).spawn(move || {
            let result = write_archive(writer, &paths);
            if let Err(err) = &result {
                warn!("Write build context failed: {}", err);
            }
            drop(keep);
            result
        })?;
        Ok(ContextArchive {
            pipe: reader,
            writer: Some(writer),
        })
    }
}

fn write_archive(writer: PipeWriter, paths: &[(PathBuf, String)]) -> io::Result<()> {
    let mut builder = Builder::new(writer);
    for (path, name) in paths {
        debug!("Add {} to build context", name);
        builder.append_path_with_name(path, name)?;
    }
    builder.into_inner()?;
    Ok(())
}

impl Read for ContextArchive {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.pipe.read(buf)?;
        if size == 0 && !buf.is_empty() {
            if let Some(writer) = self.writer.take() {
                writer
                    .join()
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "build context writer panicked"))??;
            }
        }
        Ok(size)
    }
}
