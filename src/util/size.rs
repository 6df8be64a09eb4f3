use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use log::debug;
use serde::Deserialize;

/// Byte sizes of a disk image file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageSize {
    /// Bytes the file occupies on disk.
    pub actual: u64,
    /// Size of the virtual disk the guest sees.
    pub virtual_size: u64,
}

pub trait SizeProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<ImageSize>;
}

/// Runs `qemu-img info --output=json` on the file.
pub struct QemuImgProbe {
    program: PathBuf,
}

impl QemuImgProbe {
    pub fn new(program: impl Into<PathBuf>) -> QemuImgProbe {
        QemuImgProbe { program: program.into() }
    }
}

impl Default for QemuImgProbe {
    fn default() -> Self {
        QemuImgProbe::new("qemu-img")
    }
}

impl SizeProbe for QemuImgProbe {
    fn probe(&self, path: &Path) -> Result<ImageSize> {
        debug!("{} info {}", self.program.to_string_lossy(), path.to_string_lossy());
        let output = Command::new(&self.program)
            .arg("info")
            .arg("--output=json")
            .arg(path)
            .output()
            .with_context(|| format!("failed to run {}", self.program.to_string_lossy()))?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} info exited with {}: {}",
                self.program.to_string_lossy(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        parse_size_report(&output.stdout)
    }
}

#[derive(Deserialize)]
struct SizeReport {
    #[serde(rename = "actual-size")]
    actual_size: Option<f64>,
    #[serde(rename = "virtual-size")]
    virtual_size: f64,
}

/// Parses the JSON document printed by `qemu-img info --output=json`.
pub fn parse_size_report(json: &[u8]) -> Result<ImageSize> {
    let report = serde_json::from_slice::<SizeReport>(json).context("output is not json")?;
    Ok(ImageSize {
        actual: report.actual_size.unwrap_or(0.0) as u64,
        virtual_size: report.virtual_size as u64,
    })
}
