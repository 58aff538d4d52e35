#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use args::{Args, Command};
use clap::Parser;
use futures_util::StreamExt;
use switchyard_config::Config;
use switchyard_llm::{Inference, Message, PreparedParams, PromptRequest, StreamEvent};
use switchyard_usage::UsageRecorder;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    switchyard_telemetry::init(&config.logging, args.log.as_deref())?;

    tracing::debug!(config_path = %args.config.display(), "starting switchyard");

    let usage = UsageRecorder::new();
    let inference = Inference::from_config(&config, Arc::new(usage.clone()))?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_interrupt(cancel.clone()));

    match args.command {
        Command::Prompt {
            model,
            stream,
            system,
            max_tokens,
            query,
        } => {
            let mut params = PreparedParams::new(model, system.into_iter().map(Message::system).collect());
            params.max_tokens = max_tokens;

            let request = PromptRequest {
                params,
                query: Some(query),
                cancel,
                ..PromptRequest::default()
            };

            if stream {
                stream_prompt(&inference, request).await?;
            } else {
                let result = inference.prompt(request).await?;
                println!("{}", result.content);
                for tool in &result.tools {
                    println!("tool call {} {}({})", tool.id, tool.name, tool.arguments);
                }
            }
        }
        Command::Window {
            model,
            budget,
            reserve,
            system,
            history,
        } => {
            let history = read_history(&history)?;
            let window = inference.build_context_window(&model, &system, &history, budget, reserve)?;
            println!("{}", serde_json::to_string_pretty(&window)?);
        }
    }

    usage.flush().await;
    for (source, totals) in usage.totals() {
        tracing::info!(
            source = %source,
            input_tokens = totals.input_tokens,
            output_tokens = totals.output_tokens,
            cost = totals.cost,
            "usage"
        );
    }

    Ok(())
}

/// Print a streaming reply as it arrives
async fn stream_prompt(inference: &Inference, request: PromptRequest) -> anyhow::Result<()> {
    let mut events = inference.prompt_stream(request);
    let mut stdout = std::io::stdout();

    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Requested { provider, model } => {
                tracing::debug!(provider = %provider, model = %model, "streaming");
            }
            StreamEvent::Content(text) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            StreamEvent::Thinking(text) => eprint!("{text}"),
            StreamEvent::Interrupted(reason) => {
                tracing::warn!(finish_reason = %reason, "{}", reason.explanation());
            }
            StreamEvent::Error(error) => {
                writeln!(stdout)?;
                anyhow::bail!("{error}");
            }
            StreamEvent::Abort => {
                writeln!(stdout)?;
                eprintln!("cancelled");
            }
            StreamEvent::End { tools, .. } => {
                writeln!(stdout)?;
                for tool in &tools {
                    println!("tool call {} {}({})", tool.id, tool.name, tool.arguments);
                }
            }
            StreamEvent::Data(_) | StreamEvent::ToolInfo(_) => {}
        }
    }

    Ok(())
}

fn read_history(path: &Path) -> anyhow::Result<Vec<Message>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read history file {}: {e}", path.display()))?;
    serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("failed to parse history file {}: {e}", path.display()))
}

/// Cancel `token` on `SIGINT`
async fn cancel_on_interrupt(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        return;
    }

    tracing::info!("interrupt received, cancelling");
    token.cancel();
}
