use std::path::PathBuf;

use clap::Parser;

use crate::image::PullPolicy;

#[derive(Parser)]
#[clap(about = "Manage VM images stored in container images or an image hub", version)]
pub struct CmdArgs {
    /// [OPTION] Config file. Default: $HOME/.vmimage/config.json
    #[clap(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// [OPTION] Backend to use instead of the configured one. Support 'docker', 'hub' and 'mock'.
    #[clap(long, short, global = true)]
    pub backend: Option<String>,

    #[clap(subcommand)]
    pub command: SubCommand,
}

#[derive(clap::Subcommand)]
pub enum SubCommand {
    /// List local images
    Ls(ListArgs),
    /// Pull an image and show its metadata
    Load(NameArgs),
    /// Package a local file or an URL as an image
    Prepare(PrepareArgs),
    /// Pull an image
    Pull(PullArgs),
    /// Push an image
    Push(PushArgs),
    /// Remove the local copy of an image
    Rm(NameArgs),
    /// Check that the backend is reachable
    Health,
}

#[derive(clap::Args)]
pub struct ListArgs {
    /// [OPTION] Only show images of this owner
    #[clap(long, short, default_value = "")]
    pub owner: String,
}

#[derive(clap::Args)]
pub struct NameArgs {
    /// Image name. Example:'alice/ubuntu:20.04','ubuntu'
    pub name: String,
}

#[derive(clap::Args)]
pub struct PrepareArgs {
    /// Local image file or an URL ending with '.img'
    pub source: String,

    /// Image name. Example:'alice/ubuntu:20.04'
    pub name: String,
}

#[derive(clap::Args)]
pub struct PullArgs {
    /// Image name. Example:'alice/ubuntu:20.04','ubuntu'
    pub name: String,

    /// [OPTION] Pull policy: 'always', 'ifnotpresent' or 'never'. Default comes from the config file.
    #[clap(long, short)]
    pub policy: Option<PullPolicy>,
}

#[derive(clap::Args)]
pub struct PushArgs {
    /// Image name. Example:'alice/ubuntu:20.04'
    pub name: String,

    /// [OPTION] Overwrite the remote image
    #[clap(long, short)]
    pub force: bool,
}
