//! Connection diagnostics.

use anyhow::Result;
use colored::{ColoredString, Colorize};

use friday_core::health::{CheckResult, CheckStatus, HealthChecker, HealthReport};
use friday_core::Config;

pub async fn execute(json: bool, config: &Config) -> Result<()> {
    let checker = HealthChecker::new(config.clone())?;
    let report = checker.run().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.is_healthy() {
        std::process::exit(1);
    }
    Ok(())
}

pub fn print_report(report: &HealthReport) {
    let rule = "=".repeat(60);
    println!();
    println!("{}", rule);
    println!("{}", "FRIDAY - HEALTH CHECK RESULTS".bold());
    println!("{}", rule);

    println!();
    println!("Overall Status: {}", status_label(report.overall_status));
    println!("Message: {}", report.message);

    for check in &report.checks {
        print_check(check);
    }

    println!();
    println!("{}", rule);
}

fn print_check(check: &CheckResult) {
    println!();
    let title = check.name.to_uppercase().replace('_', " ");
    if check.critical {
        println!("{}", title.cyan());
    } else {
        println!("{} {}", title.cyan(), "(optional)".dimmed());
    }
    println!("  Status: {} {}", marker(check.status), check.status);
    println!("  Message: {}", check.message);

    if !check.details.is_empty() {
        println!("  Details:");
        for (key, value) in &check.details {
            match value.as_str() {
                Some(text) => println!("    {}: {}", key, text),
                None => println!("    {}: {}", key, value),
            }
        }
    }
}

fn marker(status: CheckStatus) -> ColoredString {
    match status {
        CheckStatus::Success => "✓".green(),
        CheckStatus::Warning => "○".yellow(),
        CheckStatus::Error => "✗".red(),
    }
}

fn status_label(status: CheckStatus) -> ColoredString {
    let label = status.to_string().to_uppercase();
    match status {
        CheckStatus::Success => label.green().bold(),
        CheckStatus::Warning => label.yellow().bold(),
        CheckStatus::Error => label.red().bold(),
    }
}
