mod cli;
mod ipc;
mod paths;
mod run;
mod status;
mod watcher;

use anyhow::Result;

fn main() -> Result<()> {
    let args = cli::parse();
    run::run(args)
}
