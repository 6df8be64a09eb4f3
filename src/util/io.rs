use std::io::{BufRead, BufReader, Read};

use log::debug;
use serde::Deserialize;

use crate::error::{Result, VmImageError};

/// One line of the daemon's JSON progress output. Only the failure fields matter.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressLine {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_detail: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Reads a progress stream to EOF and fails on the first line reporting an
/// error. Build, pull and push failures arrive this way after a successful
/// response status. Returns the number of lines read.
pub fn check_progress<R: Read + ?Sized>(stream: &mut R, op: &'static str, name: &str) -> Result<u64> {
    let mut count = 0;
    for line in BufReader::new(stream).lines() {
        let line = line.map_err(|err| VmImageError::backend(op, name, err))?;
        count += 1;
        let progress = match serde_json::from_str::<ProgressLine>(&line) {
            Ok(progress) => progress,
            Err(_) => continue,
        };
        if let Some(message) = progress.error.or_else(|| progress.error_detail.and_then(|detail| detail.message)) {
            return Err(VmImageError::backend(op, name, message));
        }
        debug!("{} {}: {}", op, name, line.trim());
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn reads_to_eof() {
        let mut data = &b"{\"status\":\"Pulling fs layer\"}\nplain text\n\n{\"stream\":\"Step 1/3\"}\n"[..];
        assert_eq!(check_progress(&mut data, "pull", "ubuntu:latest").unwrap(), 4);
        assert!(data.is_empty());
    }

    #[test]
    fn error_line_fails() {
        let mut data = &br#"{"stream":"Step 1/3 : FROM scratch"}
{"errorDetail":{"message":"ADD failed: file not found"},"error":"ADD failed: file not found"}
"#[..];
        let err = check_progress(&mut data, "build", "alice/ubuntu:20.04").unwrap_err();
        assert!(matches!(err, VmImageError::Backend { op: "build", .. }), "{:?}", err);
        assert_eq!(err.to_string(), "build alice/ubuntu:20.04 failed: ADD failed: file not found");

        let mut data = &br#"{"errorDetail":{"message":"denied"}}"#[..];
        assert!(check_progress(&mut data, "push", "x:1").unwrap_err().to_string().ends_with("denied"));
    }

    #[test]
    fn read_failure_is_backend_error() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            }
        }
        assert!(matches!(check_progress(&mut Broken, "pull", "x:1"), Err(VmImageError::Backend { op: "pull", .. })));
    }
}
