use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::redirect::Policy;

use crate::error::{Result, VmImageError};
use crate::util::sha::file_sha256;

pub const DIGEST_PREFIX: &str = "sha256:";
pub const IMAGE_SUFFIX: &str = ".img";
pub const SIDECAR_SUFFIX: &str = ".sha256sum";

/// `sha256:<hex>` of a local file.
pub fn file_digest(path: &Path) -> Result<String> {
    let sha256 = file_sha256(path)?;
    Ok(format!("{}{}", DIGEST_PREFIX, sha256))
}

/// URL of the checksum file published next to a remote image.
pub fn sidecar_url(url: &str) -> Result<String> {
    let stem = url
        .strip_suffix(IMAGE_SUFFIX)
        .ok_or_else(|| VmImageError::invalid_input(format!("invalid url: {}", url)))?;
    Ok(format!("{}{}", stem, SIDECAR_SUFFIX))
}

/// Reads the digest of a remote image from its `.sha256sum` sidecar instead of
/// downloading the image itself.
pub fn remote_sidecar_digest(client: &Client, url: &str) -> Result<String> {
    let sidecar = sidecar_url(url)?;
    info!("Fetch digest from {}", sidecar);
    let response = client
        .get(&sidecar)
        .send()
        .and_then(|response| response.error_for_status())
        .map_err(|err| VmImageError::network(format!("GET {} failed: {}", sidecar, err)))?;
    let body = response
        .text()
        .map_err(|err| VmImageError::network(format!("read {} failed: {}", sidecar, err)))?;
    let digest = body.trim().to_string();
    debug!("Sidecar digest of {}: {}", url, digest);
    Ok(digest)
}

/// Blocking client used for sidecar requests.
pub fn http_client(conn_timeout: Duration) -> Result<Client> {
    reqwest::blocking::ClientBuilder::new()
        .timeout(conn_timeout)
        .gzip(true)
        .connect_timeout(Duration::from_secs(10))
        .deflate(true)
        .redirect(Policy::default())
        .build()
        .map_err(|err| VmImageError::config(format!("build http client failed: {}", err)))
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn file_digest_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.img");
        let b = dir.path().join("b.img");
        std::fs::write(&a, b"raw disk bytes").unwrap();
        std::fs::write(&b, b"raw disk bytes").unwrap();
        let digest = file_digest(&a).unwrap();
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), "sha256:".len() + 64);
        assert_eq!(digest, file_digest(&b).unwrap());

        std::fs::write(&b, b"raw disk byteS").unwrap();
        assert_ne!(digest, file_digest(&b).unwrap());
    }

    #[test]
    fn file_digest_of_missing_file() {
        let err = file_digest(Path::new("/nonexistent/vm.img")).unwrap_err();
        assert!(matches!(err, VmImageError::Io(_)));
    }

    #[test]
    fn sidecar_url_replaces_suffix() {
        assert_eq!(
            sidecar_url("https://host/images/ubuntu.img").unwrap(),
            "https://host/images/ubuntu.sha256sum"
        );
        assert!(matches!(sidecar_url("https://host/ubuntu.qcow2"), Err(VmImageError::InvalidInput(_))));
    }

    #[test]
    fn remote_digest_from_sidecar() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/img.sha256sum"))
                .respond_with(ResponseTemplate::new(200).set_body_string("sha256:abcdef\n"))
                .mount(&server)
                .await;
            server
        });
        let client = http_client(Duration::from_secs(5)).unwrap();
        let digest = remote_sidecar_digest(&client, &format!("{}/img.img", server.uri())).unwrap();
        assert_eq!(digest, "sha256:abcdef");
        rt.block_on(async move { drop(server) });
    }

    #[test]
    fn missing_sidecar_is_a_network_error() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        let client = http_client(Duration::from_secs(5)).unwrap();
        let err = remote_sidecar_digest(&client, &format!("{}/img.img", server.uri())).unwrap_err();
        assert!(matches!(err, VmImageError::Network(_)), "{:?}", err);
        rt.block_on(async move { drop(server) });
    }
}
