use std::path::PathBuf;

use clap::Parser;

use runmon_harness::script::Step;

#[derive(Parser, Debug)]
#[command(
    name = "runmon-harness",
    about = "Drive an interactive child process: send lines, expect tagged output, stop cleanly",
    version
)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (default: search upward for .runmon/harness.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Seconds each expect step may wait (default from config)
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Interaction step, run in order: expect:<pattern>, send:<text>, signal:<sig>
    #[arg(long = "step", value_name = "STEP")]
    pub steps: Vec<Step>,

    /// Program and arguments, joined into one shell command line
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}
