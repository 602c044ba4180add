pub mod args;
pub mod problem;
pub mod run;
pub mod util;

use std::path::PathBuf;

use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Error,
    bail,
};
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

use crate::problem::Problem;

fn main() -> Result<(), Error> {
    let _ = dotenv();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Run(args) => run::run(&args)?,
        Command::DumpExampleProblem { output, format } => {
            let problem = Problem::example();
            let problem = match format.as_str() {
                "toml" => toml::to_string_pretty(&problem)?,
                "json" => serde_json::to_string_pretty(&problem)?,
                _ => bail!("Invalid format: {format}"),
            };
            if let Some(output) = &output {
                std::fs::write(output, &problem)?;
            }
            else {
                println!("{problem}");
            }
        }
    }

    Ok(())
}

#[derive(Debug, Parser)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Runs a problem file.
    Run(args::RunArgs),
    /// Writes a small dipole problem that can be used as a starting point.
    DumpExampleProblem {
        #[clap(short, long)]
        output: Option<PathBuf>,
        #[clap(short, long, default_value = "toml")]
        format: String,
    },
}
