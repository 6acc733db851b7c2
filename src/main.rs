use std::{error::Error, path::PathBuf};

use clap::Parser;

use submirror::{
    cli::args::{CliArgs, Command},
    config::SubmirrorConfig,
    Submirror, UpdateOptions,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = CliArgs::parse();
    let config = SubmirrorConfig::load()?;

    let mut submirror = Submirror::builder().max_recurse_depth(cli_args.max_depth);
    if let Some(mirror_directory) = cli_args
        .mirror_directory
        .map(PathBuf::from)
        .or(config.mirror_dir)
    {
        submirror = submirror.mirror_directory(mirror_directory);
    }
    if let Some(workers) = cli_args.workers.or(config.workers) {
        submirror = submirror.workers(workers);
    }
    if let Some(queue_length) = cli_args.queue_length.or(config.queue_length) {
        submirror = submirror.queue_length(queue_length);
    }
    let submirror = submirror.try_build()?;

    match cli_args.cmd {
        Command::UpdateSubmodules {
            repository_path,
            recurse,
            dissociate,
            depth,
            filter,
        } => submirror.update_submodules(UpdateOptions {
            repository_path: repository_path.into(),
            recurse,
            dissociate,
            depth,
            filter,
        }),
        Command::ClearMirrors => submirror.clear_mirrors(),
    }
}
