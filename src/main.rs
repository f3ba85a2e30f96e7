//! remesh-batch - Distributed Batch Runner for Mesh Remeshing
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use remesh_batch::catalog::Catalog;
use remesh_batch::config::{parse_extensions, BatchConfig, CliArgs, Command};
use remesh_batch::cost;
use remesh_batch::report::{print_category_report, print_header, print_summary, ProgressReporter};
use remesh_batch::runner::BatchCoordinator;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    if let Some(command) = args.command.clone() {
        return match command {
            Command::Sample {
                input_root,
                every,
                state_dir,
                extensions,
            } => run_sample(input_root, every, state_dir, extensions),
        };
    }

    let config = BatchConfig::from_args(args).context("Invalid configuration")?;

    if config.show_progress {
        print_header(
            &config.input_root.display().to_string(),
            &config.output_root.display().to_string(),
            config.rank,
            config.world_size,
            config.worker_count,
        );
    }

    let coordinator = BatchCoordinator::new(config.clone());

    // Graceful shutdown: stop admitting jobs, drain in-flight, flush state
    let shutdown_flag = coordinator.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, draining in-flight jobs...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let progress = if config.show_progress {
        Some(ProgressReporter::new())
    } else {
        None
    };

    if let Some(ref p) = progress {
        p.set_status("Building catalog...");
    }

    let result = coordinator.run(progress.as_ref()).context("Run failed")?;

    if let Some(ref p) = progress {
        if result.interrupted {
            p.finish("Interrupted");
        } else if result.nothing_to_do() {
            p.finish("Nothing to do");
        } else {
            p.finish("Done");
        }
    }

    print_summary(&result);

    // An interrupted run exits cleanly: rerunning the same command resumes.
    // Job failures are reported in the summary (and retried on the next
    // pass), not turned into a process failure.
    if result.interrupted {
        info!("Run was interrupted; re-invoke the same command to resume");
    }
    if result.failed > 0 {
        info!(
            failed = result.failed,
            "Run finished with failures; they will be retried on the next pass"
        );
    }

    Ok(())
}

/// The `sample` subcommand: per-category catalog statistics
fn run_sample(
    input_root: std::path::PathBuf,
    every: usize,
    state_dir: std::path::PathBuf,
    extensions: String,
) -> Result<()> {
    let exts = parse_extensions(&extensions).context("Invalid extension list")?;
    let cache_path = state_dir.join("relative_file_list.txt");

    let catalog =
        Catalog::load(&cache_path, &input_root, &exts, &[]).context("Cannot build catalog")?;

    let stats = cost::category_report(&catalog, &input_root, every);
    print_category_report(&stats);

    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("remesh_batch=debug,warn")
    } else {
        EnvFilter::new("remesh_batch=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
