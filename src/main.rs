mod catalog;
mod cli;
mod config;
mod error;
mod http;
mod install;
mod resource;
mod source;
mod tasks;

use anyhow::Result;

fn main() -> Result<()> {
    cli::run()
}
