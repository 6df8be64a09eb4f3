use std::sync::Arc;

use anyhow::Result;
use log::debug;
use vmimage::config::cmd::{NameArgs, PrepareArgs, PullArgs, PushArgs};
use vmimage::util::io::check_progress;
use vmimage::{Manager, PullPolicy};

use crate::subcmd::report;
use crate::subcmd::show::details;

pub struct TransferCommand {}

impl TransferCommand {
    pub fn prepare(mgr: Arc<dyn Manager>, args: &PrepareArgs) -> bool {
        report("Prepare", prepare(mgr.as_ref(), args))
    }

    pub fn pull(mgr: Arc<dyn Manager>, args: &PullArgs, default_policy: PullPolicy) -> bool {
        report("Pull", pull(mgr.as_ref(), args, default_policy))
    }

    pub fn push(mgr: Arc<dyn Manager>, args: &PushArgs) -> bool {
        report("Push", push(mgr.as_ref(), args))
    }

    pub fn remove(mgr: Arc<dyn Manager>, args: &NameArgs) -> bool {
        report("Remove", remove(mgr.as_ref(), &args.name))
    }
}

fn prepare(mgr: &dyn Manager, args: &PrepareArgs) -> Result<String> {
    let img = mgr.new_image(&args.name)?;
    let mut stream = mgr.prepare(&args.source, &img)?;
    let lines = check_progress(&mut stream, "build", &img.fullname())?;
    debug!("Build output: {} lines", lines);
    Ok(format!("\nImage:\n{}\n", img.fullname()))
}

fn pull(mgr: &dyn Manager, args: &PullArgs, default_policy: PullPolicy) -> Result<String> {
    let policy = args.policy.unwrap_or(default_policy);
    let mut img = mgr.new_image(&args.name)?;
    let mut stream = mgr.pull(&mut img, policy)?;
    check_progress(&mut stream, "pull", &img.fullname())?;
    Ok(details(&img))
}

fn push(mgr: &dyn Manager, args: &PushArgs) -> Result<String> {
    let img = mgr.new_image(&args.name)?;
    let img = mgr
        .list_local_images(&img.owner)?
        .into_iter()
        .find(|local| local.fullname() == img.fullname())
        .unwrap_or(img);
    let mut stream = mgr.push(&img, args.force)?;
    check_progress(&mut stream, "push", &img.fullname())?;
    Ok(format!("\nImage:\n{}\n", img.fullname()))
}

fn remove(mgr: &dyn Manager, name: &str) -> Result<String> {
    let img = mgr.new_image(name)?;
    mgr.remove_local(&img)?;
    Ok(format!("\nRemoved:\n{}\n", img.fullname()))
}
