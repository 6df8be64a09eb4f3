use std::process::exit;

use anyhow::{anyhow, Result};
use clap::Parser;
use log::debug;
use vmimage::config::cmd::{CmdArgs, SubCommand};
use vmimage::config::Config;
use vmimage::Factory;

use crate::subcmd::show::ShowCommand;
use crate::subcmd::transfer::TransferCommand;

mod init;
mod subcmd;

fn main() -> Result<()> {
    init::log_init();
    let args = CmdArgs::parse();
    let config = load_config(&args)?;
    let pull_policy = config.pull_policy;
    let factory = Factory::new(config)?;
    let mgr = factory.default_manager()?;
    debug!("Use {} backend", mgr.backend());
    let ok = match &args.command {
        SubCommand::Ls(ls_args) => ShowCommand::list(mgr, ls_args),
        SubCommand::Load(name_args) => ShowCommand::load(mgr, name_args),
        SubCommand::Prepare(prepare_args) => TransferCommand::prepare(mgr, prepare_args),
        SubCommand::Pull(pull_args) => TransferCommand::pull(mgr, pull_args, pull_policy),
        SubCommand::Push(push_args) => TransferCommand::push(mgr, push_args),
        SubCommand::Rm(name_args) => TransferCommand::remove(mgr, name_args),
        SubCommand::Health => ShowCommand::health(mgr),
    };
    if !ok {
        exit(1);
    }
    Ok(())
}

/// Config file from `--config` or the default location, with `--backend` applied.
/// Refining is left to the factory.
fn load_config(args: &CmdArgs) -> Result<Config> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_path().ok_or_else(|| anyhow!("can not find the home directory"))?,
    };
    let mut config = Config::read(&path)?;
    if let Some(backend) = &args.backend {
        config.backend = backend.clone();
    }
    Ok(config)
}
