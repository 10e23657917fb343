//! # conduit
//!
//! Command-line front end: run a shell command or any registered tool with
//! live output, Ctrl-C cancellation and a JSON result on stdout.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conduit::{ToolRegistry, execute_tool};
use conduit_core::{
    AbortSignal, AgentId, SessionId, ToolCall, ToolCallId, ToolContext, UpdateReceiver,
    update_channel,
};
use conduit_settings::ConduitSettings;
use conduit_telemetry::{TelemetryConfig, init_telemetry};
use serde_json::{Value, json};

/// Conduit tool runner.
#[derive(Parser, Debug)]
#[command(name = "conduit", about = "Run Conduit tools from the command line")]
struct Cli {
    /// Settings file (defaults to `~/.conduit/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a shell command through the `bash` tool.
    Exec {
        /// The command line.
        command: String,
        /// Timeout in seconds (0 disables).
        #[arg(long)]
        timeout: Option<u64>,
        /// Working directory.
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
    /// Invoke a registered tool with JSON arguments.
    Call {
        /// Tool name.
        name: String,
        /// JSON arguments.
        #[arg(default_value = "{}")]
        arguments: String,
        /// Working directory.
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
    /// Print the registered tool definitions.
    Tools,
}

fn load_settings(path: Option<&PathBuf>) -> Result<Arc<ConduitSettings>> {
    match path {
        Some(path) => {
            let settings = conduit_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?;
            conduit_settings::init_settings(settings);
            Ok(conduit_settings::get_settings())
        }
        None => Ok(conduit_settings::get_settings()),
    }
}

fn resolve_cwd(cwd: Option<PathBuf>) -> Result<PathBuf> {
    match cwd {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().context("Failed to read current directory"),
    }
}

/// Echo the growing text of partial results to stderr.
async fn stream_updates(mut rx: UpdateReceiver) {
    let mut shown = String::new();
    while let Some(update) = rx.recv().await {
        let text = update.text_content();
        if let Some(fresh) = text.strip_prefix(shown.as_str()) {
            eprint!("{fresh}");
        }
        shown = text;
    }
    if !shown.is_empty() && !shown.ends_with('\n') {
        eprintln!();
    }
}

async fn run_call(
    registry: &ToolRegistry,
    name: &str,
    arguments: Value,
    cwd: PathBuf,
) -> Result<ExitCode> {
    let signal = AbortSignal::new();
    let (tx, rx) = update_channel();
    let ctx = ToolContext::new(
        ToolCallId::new(),
        SessionId::new(),
        AgentId::from_raw("cli"),
        cwd,
    )
    .with_signal(signal.clone())
    .with_updates(tx);
    let call = ToolCall {
        id: ctx.call_id.clone(),
        name: name.to_string(),
        arguments,
    };

    let abort = signal.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, aborting tool call");
            abort.abort();
        }
    });
    let printer = tokio::spawn(stream_updates(rx));

    let result = execute_tool(registry, &call, &ctx).await;
    drop(ctx);
    let _ = printer.await;
    interrupt.abort();

    match result {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            let code = result
                .detail("exit_code")
                .and_then(Value::as_i64)
                .map_or(0, |c| u8::try_from(c).unwrap_or(1));
            Ok(ExitCode::from(code))
        }
        Err(e) => {
            eprintln!("error: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let settings = load_settings(cli.settings.as_ref())?;
    let _ = init_telemetry(&TelemetryConfig::from_settings(&settings.logging));
    let registry = conduit::bootstrap::default_registry(&settings);

    match cli.command {
        Command::Tools => {
            println!("{}", serde_json::to_string_pretty(&registry.definitions())?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Exec {
            command,
            timeout,
            cwd,
        } => {
            let mut arguments = json!({ "command": command });
            if let Some(timeout) = timeout {
                arguments["timeout"] = json!(timeout);
            }
            run_call(&registry, "bash", arguments, resolve_cwd(cwd)?).await
        }
        Command::Call {
            name,
            arguments,
            cwd,
        } => {
            let arguments: Value =
                serde_json::from_str(&arguments).context("Arguments must be a JSON object")?;
            run_call(&registry, &name, arguments, resolve_cwd(cwd)?).await
        }
    }
}
