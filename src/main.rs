use anyhow::Result;
use clap::Parser;

mod cli;
mod discovery;
mod link;
mod negotiation;
mod port;
mod proto;
mod queue;
mod session;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match args.cmd {
        cli::Cmd::List => link::list(),
        cli::Cmd::Watch(opts) => link::watch(opts),
        cli::Cmd::Probe(opts) => link::probe(opts),
        cli::Cmd::Options(opts) => link::options(opts),
        cli::Cmd::Set(opts) => link::set(opts),
        cli::Cmd::Reboot(opts) => link::reboot(opts),
    }
}
