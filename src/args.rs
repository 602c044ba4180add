use std::path::PathBuf;

#[derive(Clone, Debug, clap::Parser)]
pub struct RunArgs {
    /// Problem file (TOML).
    pub problem: PathBuf,

    /// Number of slab worker threads. Overrides the problem file.
    #[clap(short, long)]
    pub threads: Option<usize>,

    /// Total number of steps. Overrides the problem file.
    #[clap(short, long)]
    pub steps: Option<u64>,

    /// Steps per batch. Probes are sampled after every batch.
    #[clap(short, long)]
    pub batch: Option<u64>,

    /// Write the probe series as JSON to this file instead of stdout.
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Use the single threaded engine.
    #[clap(long)]
    pub sequential: bool,
}
