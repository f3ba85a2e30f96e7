//! Progress reporting and run summaries
//!
//! Real-time progress display using an indicatif bar plus console-styled
//! header and end-of-run summary.

use crate::runner::RunResult;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporter for one batch run
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a reporter; the bar starts as a spinner until `begin` is
    /// called with the dispatched job count.
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Switch to a bar of known length once dispatch starts
    pub fn begin(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("Invalid progress template")
                .progress_chars("##-"),
        );
        self.bar.set_position(0);
    }

    /// Update the display with current outcome counts
    pub fn update(&self, completed: u64, failed: u64) {
        self.bar.set_position(completed + failed);
        if failed > 0 {
            self.bar
                .set_message(format!("ok: {} failed: {}", completed, failed));
        } else {
            self.bar.set_message(format!("ok: {}", completed));
        }
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a header at the start of the run
pub fn print_header(
    input_root: &str,
    output_root: &str,
    rank: usize,
    world_size: usize,
    workers: usize,
) {
    println!();
    println!(
        "{} {}",
        style("remesh-batch").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Input:").bold(), input_root);
    println!("  {} {}", style("Output:").bold(), output_root);
    println!(
        "  {} {}/{}",
        style("Rank:").bold(),
        rank,
        world_size
    );
    println!("  {} {}", style("Workers:").bold(), workers);
    println!();
}

/// Print a summary of the run results
pub fn print_summary(result: &RunResult) {
    let skipped =
        result.skipped_completed + result.skipped_output_exists + result.skipped_exhausted;

    println!();
    if result.interrupted {
        println!("{}", style("Run Interrupted (resumable)").yellow().bold());
    } else {
        println!("{}", style("Run Complete").green().bold());
    }
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {}",
        style("Shard:").bold(),
        format_number(result.shard_size as u64)
    );
    println!(
        "  {} {}",
        style("Completed:").bold(),
        format_number(result.completed)
    );
    if result.failed > 0 {
        println!(
            "  {} {}",
            style("Failed:").yellow().bold(),
            format_number(result.failed)
        );
    }
    if skipped > 0 {
        println!(
            "  {} {} ({} done, {} output exists, {} gave up)",
            style("Skipped:").bold(),
            format_number(skipped as u64),
            format_number(result.skipped_completed as u64),
            format_number(result.skipped_output_exists as u64),
            format_number(result.skipped_exhausted as u64),
        );
    }
    let secs = result.duration.as_secs_f64();
    let rate = if secs > 0.0 {
        (result.completed + result.failed) as f64 / secs
    } else {
        0.0
    };
    println!(
        "  {} {:.1}s ({:.2} jobs/sec)",
        style("Duration:").bold(),
        secs,
        rate
    );
    println!();
}

/// Print the per-category size report for the sample subcommand
pub fn print_category_report(stats: &[crate::cost::CategoryStat]) {
    println!();
    println!("{}", style("Catalog Sample").cyan().bold());
    println!("{}", style("─".repeat(62)).dim());

    let mut total_jobs = 0u64;
    let mut weighted_bytes = 0u64;

    for stat in stats {
        total_jobs += stat.job_count as u64;
        weighted_bytes += stat.mean_bytes * stat.job_count as u64;

        println!(
            "  {:<28} {:>9} jobs  {:>4} sampled  {:>10}",
            stat.category,
            format_number(stat.job_count as u64),
            stat.sampled,
            if stat.sampled > 0 {
                format_size(stat.mean_bytes, BINARY)
            } else {
                "-".to_string()
            }
        );
    }

    println!("{}", style("─".repeat(62)).dim());
    if total_jobs > 0 {
        println!(
            "  {} {} jobs, weighted mean {}",
            style("Total:").bold(),
            format_number(total_jobs),
            format_size(weighted_bytes / total_jobs, BINARY)
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }
}
