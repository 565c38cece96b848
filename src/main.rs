mod cli;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use cli::Cli;
use runmon_harness::script::run_steps;
use runmon_harness::{ControllerConfig, ProcessController, install_interrupt_cleanup};

/// Map a normalized child exit code onto a process exit status.
fn process_exit_status(code: i32) -> i32 {
    if code < 0 { 128 - code } else { code }
}

fn load_config(cli: &Cli) -> Result<ControllerConfig> {
    if let Some(path) = &cli.config {
        let config = ControllerConfig::from_file(path)?;
        info!("loaded config from {}", path.display());
        return Ok(config);
    }

    let cwd =
        std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = ControllerConfig::load(&cwd)?;
    match config_path {
        Some(ref p) => info!("loaded config from {}", p.display()),
        None => info!("no .runmon/harness.toml found, using defaults"),
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "runmon_harness=info",
        1 => "runmon_harness=debug",
        _ => "runmon_harness=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;
    let timeout = match cli.timeout {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .with_context(|| format!("invalid --timeout value: {secs}"))?,
        None => config.default_expect_timeout(),
    };

    if let Err(e) = install_interrupt_cleanup() {
        warn!(error = %e, "could not install Ctrl-C cleanup handler");
    }

    let (program, args) = cli
        .command
        .split_first()
        .context("missing command to run")?;

    let mut controller = ProcessController::new(config);
    controller.spawn(program, args)?;

    let outcome = run_steps(&mut controller, &cli.steps, timeout).await;
    controller
        .stop()
        .await
        .context("failed to stop child process")?;

    print!("{}", controller.stdout());
    eprint!("{}", controller.stderr());

    let outcome = outcome.context("interaction failed")?;
    if let Some(step) = outcome.failed {
        error!(
            step = %step,
            completed = outcome.completed,
            "expectation not met within {:?}",
            timeout
        );
        std::process::exit(1);
    }

    let code = controller.exit_code()?;
    info!(exit_code = code, "child stopped");
    std::process::exit(process_exit_status(code));
}
