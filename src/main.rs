use clap::Parser;
use pijulfetch::{
    cli::{
        args::{CliArgs, Command},
        command_handlers,
    },
    config::PijulfetchConfig,
    Pijulfetch,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(error) = run() {
        log::error!("{:#}", error);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli_args = CliArgs::parse();
    let config = PijulfetchConfig::load()?;

    let mut builder = Pijulfetch::builder();
    if let Some(path) = cli_args.cache_directory.or(config.cache_dir) {
        builder = builder.cache_directory(path);
    }
    if let Some(path) = cli_args.store_directory.or(config.store_dir) {
        builder = builder.store_directory(path);
    }
    if let Some(mode) = config.probe_mode {
        builder = builder.probe_mode(mode);
    }
    let pijulfetch = builder.try_build()?;

    match cli_args.command {
        Command::Resolve {
            url,
            channel,
            state,
            name,
        } => command_handlers::do_resolve(
            &pijulfetch,
            &url,
            channel.as_deref(),
            state.as_deref(),
            name.as_deref(),
        ),
        Command::Lock {
            url,
            channel,
            state,
            name,
        } => command_handlers::do_lock(
            &pijulfetch,
            &url,
            channel.as_deref(),
            state.as_deref(),
            name.as_deref(),
        ),
        Command::ClearCache => command_handlers::do_clear_cache(&pijulfetch),
    }
}
