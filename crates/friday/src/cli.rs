//! CLI argument definitions using clap derive macros.

use clap::{Parser, Subcommand};

/// Friday voice assistant
///
/// Home Assistant tools for a realtime voice agent, over MCP.
#[derive(Parser, Debug)]
#[command(name = "friday")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log at debug level regardless of LOG_LEVEL
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive text console driving a session
    Console,

    /// Run the connection diagnostics
    Health {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Connect and list the available tools
    Tools {
        /// Print the capabilities as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate and invoke a single tool
    Call {
        /// Tool name
        tool: String,

        /// Arguments as a JSON object
        #[arg(short, long)]
        args: Option<String>,
    },

    /// Serve the registered tools as an MCP server over stdio
    Serve,

    /// Print a LiveKit join token for the agent
    Token {
        /// Room to join
        #[arg(short, long)]
        room: String,

        /// Participant identity
        #[arg(short, long)]
        identity: Option<String>,
    },

    /// Show version information
    Version,
}
