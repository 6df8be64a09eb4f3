use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use ubyte::ToByteUnit;
use vmimage::config::cmd::{ListArgs, NameArgs};
use vmimage::{Image, Manager};

use crate::subcmd::report;

pub struct ShowCommand {}

impl ShowCommand {
    pub fn list(mgr: Arc<dyn Manager>, args: &ListArgs) -> bool {
        report("List", list(mgr.as_ref(), &args.owner))
    }

    pub fn load(mgr: Arc<dyn Manager>, args: &NameArgs) -> bool {
        report("Load", load(mgr.as_ref(), &args.name))
    }

    pub fn health(mgr: Arc<dyn Manager>) -> bool {
        let result = mgr
            .check_health()
            .map(|_| format!("\nBackend {} is reachable\n", mgr.backend().to_string().green()))
            .map_err(anyhow::Error::from);
        report("Health check", result)
    }
}

fn list(mgr: &dyn Manager, owner: &str) -> Result<String> {
    let images = mgr.list_local_images(owner)?;
    let mut out = format!("\n{} image(s) on {}\n", images.len(), mgr.backend());
    for img in images {
        out.push_str(&format!("  {}\n", img.fullname()));
    }
    Ok(out)
}

fn load(mgr: &dyn Manager, name: &str) -> Result<String> {
    let img = mgr.load_image(name)?;
    Ok(details(&img))
}

/// Multi-line description of a resolved image.
pub fn details(img: &Image) -> String {
    let local_path = img
        .filepath()
        .map(|path| path.to_string_lossy().to_string())
        .unwrap_or_else(|| "NOT PRESENT".to_string());
    let rows = [
        ("IMAGE", img.fullname()),
        ("DIGEST", img.digest.value().unwrap_or("UNKNOWN").to_string()),
        ("ACTUAL_SIZE", img.actual_size.bytes().to_string()),
        ("VIRTUAL_SIZE", img.virtual_size.bytes().to_string()),
        ("DISTRO", img.distro().to_string()),
        ("LOCAL_PATH", local_path),
    ];
    let mut out = String::from("\n");
    for (name, value) in rows {
        out.push_str(&format!("{:14}: {}\n", name, value));
    }
    out
}
