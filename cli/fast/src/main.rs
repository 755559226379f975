//! fast CLI

mod presentation;

use anyhow::Context;
use clap::Parser;
use console::style;
use fast_core::{config, loader, FastPaths, LoadError, SessionLog, SessionWriter, SystemClipboard};
use fast_flow::{Ambient, EngineSettings, FlowEngine, FlowError, FlowIo, FlowPlan};
use fast_gemini::{ClientConfig, EchoGenerator, GeminiClient};
use fast_mcp::{load_server_configs, McpManager};
use fast_protocol::{FlowDefinition, Generator, ToolProvider};
use presentation::{present, Terminal};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status after Ctrl+C
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "fast")]
#[command(about = "Run declarative AI flows")]
#[command(version)]
struct Cli {
    /// Flow name, looked up in ./flows and ~/fast-flows/flows. Lists flows when omitted.
    #[arg(value_name = "FLOW")]
    flow: Option<String>,

    /// Text available to the flow as {{input}}
    #[arg(value_name = "INPUT", trailing_var_arg = true)]
    input: Vec<String>,

    /// More logging (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Do not write a session log
    #[arg(long)]
    no_log: bool,

    /// Do not copy the final result to the clipboard
    #[arg(long)]
    no_clipboard: bool,

    /// Tool calls allowed per step
    #[arg(long, default_value_t = fast_flow::engine::DEFAULT_MAX_TOOL_ROUNDS)]
    max_tool_rounds: u32,

    /// Timeout in seconds for a single tool call
    #[arg(long, default_value = "120")]
    tool_timeout: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("✗").red().bold(), e);
            1
        }
    };
    // A prompt may still be blocked on stdin; exit without waiting for it.
    std::process::exit(code);
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let paths = FastPaths::discover()?;

    let Some(flow_name) = cli.flow.clone() else {
        print_flows(&paths);
        return Ok(0);
    };

    let (path, flow) = match loader::load_flow(&paths, &flow_name).await {
        Ok(found) => found,
        Err(LoadError::NotFound { name, searched }) => {
            println!("{}", style(format!("Flow '{name}' not found.")).yellow());
            for candidate in searched {
                println!("  {}", style(candidate.display()).dim());
            }
            print_flows(&paths);
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };
    info!("Loaded flow from {}", path.display());

    let plan = match FlowPlan::build(&flow) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("{} {}", style("Invalid flow:").red().bold(), e);
            return Ok(1);
        }
    };

    let generator = build_generator(&paths)?;
    let mcp_configs = load_server_configs(&paths.mcp_configs(), flow.mcp_servers.as_deref())?;
    let mcp = McpManager::start(&mcp_configs).await;
    let tools: Arc<dyn ToolProvider> = Arc::new(mcp.registry());
    let servers = mcp.servers();
    if !servers.is_empty() {
        println!("{} {}", style("MCP servers:").dim(), style(servers.join(", ")).dim());
    }

    let clipboard = SystemClipboard::default();
    let clipboard_text = clipboard.read().await;
    let input = cli.input.join(" ");

    let engine = FlowEngine::new(generator, tools).with_settings(EngineSettings {
        max_tool_rounds: cli.max_tool_rounds,
        tool_timeout: Duration::from_secs(cli.tool_timeout),
        ..EngineSettings::default()
    });

    println!(
        "{}",
        style(format!("⚡ Running {} ({} steps)", flow_name, plan.steps.len()))
            .bold()
            .cyan()
    );
    let last_step = plan.last_step_id().map(str::to_string);
    let terminal = Terminal::new(plan.steps.iter().map(|s| s.step.id.as_str()));
    let (io, presentation) = FlowIo::channel();
    let presenter = tokio::spawn(present(presentation, terminal));

    let outcome = tokio::select! {
        outcome = engine.run(plan, Ambient::new(clipboard_text.clone(), input.clone()), io) => outcome,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n{}", style("Interrupted").yellow());
            mcp.shutdown().await;
            return Ok(EXIT_INTERRUPTED);
        }
    };

    let run = match outcome {
        Ok(run) => run,
        Err(e) => {
            // Let the spinners settle unless a prompt is still waiting on stdin.
            if let Ok(Ok(terminal)) = tokio::time::timeout(Duration::from_millis(250), presenter).await {
                terminal.clear();
            }
            report_failure(&e);
            mcp.shutdown().await;
            return Ok(1);
        }
    };

    // The engine has hung up, so the presenter drains and returns.
    if let Ok(terminal) = presenter.await {
        terminal.clear();
    }
    mcp.shutdown().await;

    let result = last_step
        .as_deref()
        .and_then(|id| run.result(id))
        .unwrap_or_default()
        .to_string();

    if !cli.no_clipboard {
        match clipboard.write(&result).await {
            Ok(()) => info!("Copied final result to clipboard"),
            Err(e) => warn!("{}", e),
        }
    }
    if !cli.no_log {
        if let Err(e) = write_session_log(&paths, &flow_name, &input, &clipboard_text, &flow, &run).await {
            warn!("Session log not written: {:#}", e);
        }
    }

    println!("\n{}", style("📝 Result:").bold().green());
    println!("{result}");
    Ok(0)
}

fn build_generator(paths: &FastPaths) -> anyhow::Result<Arc<dyn Generator>> {
    if config::mock_enabled() {
        info!("{} is set; using the echo generator", config::MOCK_ENV);
        return Ok(Arc::new(EchoGenerator));
    }
    let api_key = config::resolve_api_key(paths)?;
    let client = GeminiClient::new(ClientConfig::new(api_key)).context("Failed to create Gemini client")?;
    Ok(Arc::new(client))
}

async fn write_session_log(
    paths: &FastPaths,
    flow_name: &str,
    input: &str,
    clipboard: &str,
    flow: &FlowDefinition,
    run: &fast_flow::FlowRun,
) -> anyhow::Result<()> {
    let log = SessionLog::new(flow_name, input, clipboard, flow, run);
    let written = SessionWriter::new(paths.logs()).write(&log).await?;
    println!("{} {}", style("Session log:").dim(), style(written.display()).dim());
    Ok(())
}

/// The step error's message already carries its cause.
fn report_failure(error: &FlowError) {
    eprintln!("\n{} {}", style("✗").red().bold(), error);
    if let Some(step_id) = error.step_id() {
        info!("Flow stopped at step '{}'", step_id);
    }
}

fn print_flows(paths: &FastPaths) {
    let flows = loader::list_flows(paths);
    if flows.is_empty() {
        println!(
            "No flows found in {} or {}",
            paths.local_flows.display(),
            paths.user_flows().display()
        );
        return;
    }
    println!("{}", style("Available flows").bold());
    for entry in flows {
        println!("  {:<24} {}", entry.name, style(format!("({})", entry.source)).dim());
    }
}
