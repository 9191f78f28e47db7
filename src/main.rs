use clap::Parser;
use env_logger::Env;

use viqa_features::cli::SubCommandExtend;
use viqa_features::config::{Opts, SubCommand};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();
    match &opts.subcmd {
        SubCommand::Extract(config) => config.run(&opts),
        SubCommand::Inspect(config) => config.run(&opts),
    }
}
