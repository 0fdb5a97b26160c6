//! Shared output helpers for CLI commands.

use std::time::Duration;

use console::style;

use pubnotice::models::{RunOutcome, RunReport};

/// Format a duration as `1h 02m 03s`, dropping leading zero units.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Print the end-of-run summary.
pub fn print_report(report: &RunReport) {
    let stats = &report.stats;

    println!();
    match &report.outcome {
        RunOutcome::Completed => println!(
            "{} {} run complete",
            style("✓").green(),
            style(&report.source).bold()
        ),
        RunOutcome::Aborted { reason } => println!(
            "{} {} run stopped early: {}",
            style("!").yellow(),
            style(&report.source).bold(),
            reason
        ),
        RunOutcome::SearchFailed { reason } => println!(
            "{} {} search failed: {}",
            style("✗").red(),
            style(&report.source).bold(),
            reason
        ),
    }

    println!("  {:<18} {}", "Attempted:", stats.attempted());
    println!("  {:<18} {}", "Extracted:", style(stats.extracted()).green());
    println!("  {:<18} {}", "Challenges solved:", stats.solved());
    println!("  {:<18} {}", "Skipped:", style(stats.skipped()).yellow());
    println!("  {:<18} {}", "Failed:", style(stats.failed()).red());
    println!("  {:<18} {}", "Pages:", stats.pages_completed());
    if stats.recoveries() > 0 {
        println!("  {:<18} {}", "Recoveries:", stats.recoveries());
    }

    let extraction = &report.extraction;
    if extraction.total > 0 {
        println!(
            "  {:<18} {:.1}% ({} AI, {} pattern fallbacks)",
            "AI success rate:",
            extraction.success_rate(),
            extraction.llm_successes,
            extraction.pattern_fallbacks
        );
    }

    println!(
        "  {:<18} ${:.3} ({} solves ${:.3}, {} AI calls ${:.3})",
        "Estimated cost:",
        report.total_cost(),
        stats.solver_calls(),
        report.solver_cost(),
        extraction.llm_calls,
        report.llm_cost()
    );
    println!(
        "  {:<18} {} (paced {})",
        "Elapsed:",
        format_duration(report.elapsed),
        format_duration(report.time_paced)
    );

    match &report.output {
        Some(path) => println!(
            "  {:<18} {} ({} rows)",
            "Output:",
            style(path.display()).cyan(),
            report.rows_written
        ),
        None => println!("  {:<18} {}", "Output:", style("none").dim()),
    }
}
