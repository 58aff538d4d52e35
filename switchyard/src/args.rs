use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Switchyard inference gateway
#[derive(Debug, Parser)]
#[command(name = "switchyard", about = "Run prompts against any configured LLM provider")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "switchyard.toml", env = "SWITCHYARD_CONFIG")]
    pub config: PathBuf,

    /// Override the configured log filter
    #[arg(long, env = "SWITCHYARD_LOG")]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send one prompt and print the reply
    Prompt {
        /// Catalog model entry, or `provider/model`
        #[arg(short, long)]
        model: String,

        /// Print the reply as it streams in
        #[arg(long)]
        stream: bool,

        /// System prompt sent ahead of the query
        #[arg(long)]
        system: Option<String>,

        /// Maximum output tokens
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Prompt text
        query: String,
    },
    /// Print the context window selected from a JSON history file
    Window {
        /// Catalog model entry whose limits apply
        #[arg(short, long)]
        model: String,

        /// Input tokens available for history
        #[arg(long)]
        budget: u32,

        /// Output tokens reserved for the reply
        #[arg(long, default_value_t = 0)]
        reserve: u32,

        /// System prompt to prepend
        #[arg(long, default_value = "")]
        system: String,

        /// JSON array of messages, oldest first
        history: PathBuf,
    },
}
