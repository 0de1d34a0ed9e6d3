use anyhow::{bail, Context, Result};
use std::env;

use summary_information::{lambda_handler, summarize_source, Config};

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let config = Config::from_env();

    match args.get(1).map(String::as_str) {
        None | Some("run") => run(&config)?,
        Some("summarize") => run_summarize(&config)?,
        Some(other) => bail!("unknown command '{}' (usage: {} [run|summarize])", other, args[0]),
    }

    Ok(())
}

/// Full run: account, load, summarize, persist, notify
fn run(config: &Config) -> Result<()> {
    let response = lambda_handler(config, None, None).context("Summary run failed")?;

    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}

/// Dry run: print the summary without storing or sending anything
fn run_summarize(config: &Config) -> Result<()> {
    let summary = summarize_source(config).context("Failed to summarize transactions")?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
