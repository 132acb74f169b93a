//! One-shot tool invocation.

use anyhow::Result;
use colored::Colorize;

use friday_core::Config;

pub async fn execute(tool: &str, args: Option<&str>, config: &Config) -> Result<()> {
    let arguments = super::parse_arguments(args)?;
    let bridge = super::open_bridge(config).await?;

    let outcome = bridge.invoke(tool, arguments).await;
    bridge.close().await?;
    let outcome = outcome?;

    if outcome.is_error {
        eprintln!("{} {}", "✗".red(), outcome.text);
        std::process::exit(1);
    }

    println!("{}", outcome.text);
    tracing::debug!(
        tool = %outcome.tool,
        attempts = outcome.attempts,
        elapsed_ms = outcome.duration.as_millis() as u64,
        "Tool call finished"
    );
    Ok(())
}
