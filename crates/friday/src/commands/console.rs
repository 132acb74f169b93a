//! Interactive text console.
//!
//! Drives a full session without a speech back end: typed lines become user
//! transcripts, `/call` issues tool calls the way the voice model would, and
//! replies and tool results are printed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use friday_core::health::HealthChecker;
use friday_core::orchestrator::{ModelSettings, Speaker, ToolCallResult};
use friday_core::registry::ToolSpec;
use friday_core::tools::LocalTools;
use friday_core::{CapabilityRegistry, Config, RealtimeModel, Session, SessionEvent, SessionOptions, ToolBridge};

const HELP: &str = "Commands: /tools, /call <tool> [json], /context, /health, /history, /quit";

/// Prints what a speech model would have said
struct ConsoleModel {
    agent_name: String,
}

#[async_trait]
impl RealtimeModel for ConsoleModel {
    async fn configure(&self, _persona: &str, settings: &ModelSettings) -> friday_core::Result<()> {
        println!("{}", settings_line(settings).dimmed());
        Ok(())
    }

    async fn update_tools(&self, tools: Vec<ToolSpec>) -> friday_core::Result<()> {
        println!("{}", format!("{} tools available", tools.len()).dimmed());
        Ok(())
    }

    async fn generate_reply(&self, instructions: &str) -> friday_core::Result<()> {
        let line = opening_line(instructions).unwrap_or("How can I help?");
        println!("{} {}", format!("{}:", self.agent_name).magenta().bold(), line);
        Ok(())
    }

    async fn submit_tool_result(&self, result: ToolCallResult) -> friday_core::Result<()> {
        let marker = if result.is_error { "✗".red() } else { "✓".green() };
        println!("{} {} {}", marker, result.name.bold(), result.output);
        Ok(())
    }
}

fn settings_line(settings: &ModelSettings) -> String {
    let on_off = |enabled: bool| if enabled { "on" } else { "off" };
    format!(
        "voice {}, temperature {:.1}, replies up to {} tokens, video {}, noise cancellation {}",
        settings.voice,
        settings.temperature,
        settings.max_response_length,
        on_off(settings.enable_video),
        on_off(settings.enable_noise_cancellation),
    )
}

/// The quoted greeting the instructions ask the agent to open with
fn opening_line(instructions: &str) -> Option<&str> {
    let start = instructions.find("saying: \"")? + "saying: \"".len();
    let rest = &instructions[start..];
    rest.find('"').map(|end| &rest[..end])
}

#[derive(Debug, PartialEq)]
enum ConsoleInput<'a> {
    Say(&'a str),
    Tools,
    Call { tool: &'a str, args: Option<&'a str> },
    Context,
    Health,
    History,
    Quit,
    Help,
    Empty,
}

fn parse_input(line: &str) -> ConsoleInput<'_> {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleInput::Empty;
    }
    if !line.starts_with('/') {
        return ConsoleInput::Say(line);
    }

    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    match command {
        "/tools" => ConsoleInput::Tools,
        "/call" if !rest.is_empty() => {
            let (tool, args) = match rest.split_once(char::is_whitespace) {
                Some((tool, args)) => (tool, Some(args.trim())),
                None => (rest, None),
            };
            ConsoleInput::Call { tool, args }
        }
        "/context" => ConsoleInput::Context,
        "/health" => ConsoleInput::Health,
        "/history" => ConsoleInput::History,
        "/quit" | "/exit" => ConsoleInput::Quit,
        _ => ConsoleInput::Help,
    }
}

pub async fn execute(config: &Config) -> Result<()> {
    let missing = config.missing_required();
    if !missing.is_empty() {
        anyhow::bail!("Missing required environment variables: {}", missing.join(", "));
    }

    let registry = Arc::new(CapabilityRegistry::new());
    let bridge = Arc::new(ToolBridge::from_config(&config.home_assistant, registry)?);
    let options = SessionOptions::from_config(config);
    let model = Arc::new(ConsoleModel {
        agent_name: options.agent_name.clone(),
    });
    let session = Session::new(Arc::clone(&bridge), model, options)
        .with_local_tools(Arc::new(LocalTools::new()?));

    println!("{}", format!("Friday console - session {}", session.id()).bold());
    println!("{}", "No speech model is attached: typed lines are recorded as transcripts.".dimmed());
    println!("{}", HELP.dimmed());
    println!();

    session.start().await.context("Session failed to start")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let calls = AtomicU64::new(0);

    loop {
        print!("{} ", ">".cyan());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_input(&line) {
            ConsoleInput::Empty => {}
            ConsoleInput::Say(text) => {
                session.handle(SessionEvent::UserTranscript(text.to_string())).await?;
            }
            ConsoleInput::Tools => {
                super::tools::print_capabilities(&bridge.registry().list().await);
            }
            ConsoleInput::Call { tool, args } => {
                let arguments = match super::parse_arguments(args) {
                    Ok(arguments) => arguments,
                    Err(e) => {
                        println!("{} {}", "✗".red(), e);
                        continue;
                    }
                };
                let call_id = format!("console-{}", calls.fetch_add(1, Ordering::Relaxed) + 1);
                session
                    .handle(SessionEvent::ToolCall {
                        call_id,
                        name: tool.to_string(),
                        arguments,
                    })
                    .await?;
            }
            ConsoleInput::Context => match bridge.live_context().await {
                Ok(context) => print_context(&context),
                Err(e) => println!("{} {}", "✗".red(), e),
            },
            ConsoleInput::Health => {
                let checker = HealthChecker::new(config.clone())?;
                super::health::print_report(&checker.run().await);
            }
            ConsoleInput::History => {
                for turn in session.history().await {
                    let speaker = match turn.speaker {
                        Speaker::User => "you".cyan(),
                        Speaker::Agent => config.agent.name.magenta(),
                    };
                    println!("{} {}: {}", turn.at.format("%H:%M:%S").to_string().dimmed(), speaker, turn.text);
                }
            }
            ConsoleInput::Help => println!("{}", HELP),
            ConsoleInput::Quit => break,
        }
    }

    session.handle(SessionEvent::Close).await?;
    let stats = session.stats().await;
    println!();
    println!(
        "{}",
        format!(
            "Session closed: {} turns, {} tool calls, {} failures",
            stats.turns, stats.tool_calls, stats.failures
        )
        .dimmed()
    );
    Ok(())
}

fn print_context(context: &friday_core::context::LiveContext) {
    if context.is_empty() {
        println!("{}", "No entities exposed".yellow());
        return;
    }

    for area in context.areas() {
        println!("{}", area.cyan());
        for entity in context.in_area(&area) {
            let state = entity.state.as_deref().unwrap_or("unknown");
            println!("  {} ({}): {}", entity.name(), entity.domain, state);
        }
    }

    let unassigned: Vec<_> = context.entities.iter().filter(|e| e.areas.is_empty()).collect();
    if !unassigned.is_empty() {
        println!("{}", "No area".cyan());
        for entity in unassigned {
            let state = entity.state.as_deref().unwrap_or("unknown");
            println!("  {} ({}): {}", entity.name(), entity.domain, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opening_line() {
        let instructions = friday_core::prompts::session_instructions("Friday", None);
        assert_eq!(opening_line(&instructions), Some("Good day sir, Friday at your service."));
        assert_eq!(opening_line("Speak briefly."), None);
    }

    #[test]
    fn test_settings_line() {
        let line = settings_line(&ModelSettings::default());
        assert_eq!(
            line,
            "voice default, temperature 0.7, replies up to 1000 tokens, video off, noise cancellation on"
        );
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("  "), ConsoleInput::Empty);
        assert_eq!(parse_input("turn on the lights"), ConsoleInput::Say("turn on the lights"));
        assert_eq!(parse_input("/tools"), ConsoleInput::Tools);
        assert_eq!(
            parse_input("/call HassTurnOn {\"name\": \"Kitchen\"}"),
            ConsoleInput::Call {
                tool: "HassTurnOn",
                args: Some("{\"name\": \"Kitchen\"}")
            }
        );
        assert_eq!(
            parse_input("/call GetLiveContext"),
            ConsoleInput::Call {
                tool: "GetLiveContext",
                args: None
            }
        );
        assert_eq!(parse_input("/call"), ConsoleInput::Help);
        assert_eq!(parse_input("/exit"), ConsoleInput::Quit);
        assert_eq!(parse_input("/dance"), ConsoleInput::Help);
    }
}
