mod workflow;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crewtrace_core::config::AppConfig;
use crewtrace_core::event::EventBus;
use crewtrace_core::CrewError;
use crewtrace_process::{order, SwarmOutput};
use crewtrace_replay::{EventRecord, Recorder, WorkflowRecording};
use crewtrace_trace::DecisionTracer;

use workflow::{DryRunExecutor, WorkflowFile};

#[derive(Parser)]
#[command(name = "crewtrace", version, about = "Trace, record and replay multi-agent task runs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "crewtrace.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the execution order of a workflow's tasks
    Order {
        workflow: PathBuf,
    },
    /// Dry-run a workflow and record it
    Run {
        workflow: PathBuf,
        /// Directory to write the recording to (overrides `recording.auto_save`)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Correlation id for the run
        #[arg(long)]
        correlation_id: Option<String>,
        /// Skip the decision explanation
        #[arg(long)]
        quiet: bool,
    },
    /// Show a recording's summary and timeline
    Inspect {
        recording: PathBuf,
        /// Only show events for this task
        #[arg(long)]
        task: Option<String>,
        /// Only show failure events
        #[arg(long)]
        failures: bool,
    },
    /// Republish a recording's events on a fresh event bus
    Replay {
        recording: PathBuf,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Order { workflow } => print_order(&workflow),
        Commands::Run {
            workflow,
            output,
            correlation_id,
            quiet,
        } => run_workflow(&config, &workflow, output, correlation_id, quiet).await,
        Commands::Inspect {
            recording,
            task,
            failures,
        } => inspect(&recording, task.as_deref(), failures),
        Commands::Replay { recording } => replay(&config, &recording),
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn print_order(path: &Path) -> anyhow::Result<()> {
    let workflow = WorkflowFile::load(path)?;
    let ids = order(&workflow.tasks())?;
    println!("{} ({}):", workflow.display_name(), workflow.process);
    for (i, id) in ids.iter().enumerate() {
        println!("  {}. {}", i + 1, id);
    }
    Ok(())
}

async fn run_workflow(
    config: &AppConfig,
    path: &Path,
    output_dir: Option<PathBuf>,
    correlation_id: Option<String>,
    quiet: bool,
) -> anyhow::Result<()> {
    let workflow = WorkflowFile::load(path)?;
    let bus = Arc::new(EventBus::new(config.events.capacity));
    let tracer = Arc::new(DecisionTracer::from_config(&config.tracing));

    let executor = Arc::new(DryRunExecutor::new(&workflow, bus.clone()));
    let mut swarm = workflow.build_swarm(executor, bus.clone(), tracer.clone())?;
    if let Some(id) = correlation_id {
        swarm = swarm.with_correlation_id(id);
    }

    let mut recorder = Recorder::from_config(&bus, config)
        .with_configuration("workflow", serde_json::json!(workflow.display_name()))
        .with_configuration("process", serde_json::json!(workflow.process.to_string()))
        .with_configuration("agents", serde_json::json!(workflow.agents.len()))
        .with_configuration("tasks", serde_json::json!(workflow.tasks.len()));
    let save_dir = output_dir.or_else(|| config.recording.auto_save.then(|| config.recording_dir()));
    if let Some(ref dir) = save_dir {
        recorder = recorder.save_to(dir.clone(), config.recording.pretty);
    }

    info!(workflow = %workflow.display_name(), process = %workflow.process, "Starting run");
    let result = swarm.kickoff().await;

    // Configuration errors are reported before anything is published.
    if let Err(ref e) = result {
        if e.is_configuration() {
            return Err(anyhow::anyhow!("{}", e));
        }
    }

    let recording = recorder.finish()?;
    if let Some(ref dir) = save_dir {
        println!(
            "Recording: {}",
            dir.join(format!("{}.json", recording.correlation_id)).display()
        );
    }

    match result {
        Ok(output) => {
            print_output(&output);
            if !quiet {
                if let Some(explanation) = tracer.explain_workflow(&output.correlation_id) {
                    println!("\n{}", explanation);
                }
            }
            tracer.cleanup(&output.correlation_id);
            Ok(())
        }
        Err(e) => {
            report_failure(&e);
            tracer.cleanup(&recording.correlation_id);
            Err(e.into())
        }
    }
}

fn print_output(output: &SwarmOutput) {
    println!("Run {} ({} ms)", output.correlation_id, output.duration_ms);
    for task in &output.tasks_output {
        println!("  [{}] {} -> {}", task.status, task.task_id, task.agent_role);
    }
    let usage = &output.usage;
    println!(
        "Tasks: {} total, {} delegated, {} manager, {} skipped; tokens: {}",
        usage.total_tasks,
        usage.delegated_tasks,
        usage.manager_tasks,
        usage.skipped_tasks,
        usage.token_usage.total()
    );
    println!("\n{}", output.raw);
}

fn report_failure(error: &CrewError) {
    let partial = error.partial_outputs();
    if !partial.is_empty() {
        let ids: Vec<&str> = partial.iter().map(|o| o.task_id.as_str()).collect();
        warn!(completed = %ids.join(", "), "Run failed after partial progress");
    }
    eprintln!("Root cause: {}", error.root_cause());
}

fn inspect(path: &Path, task: Option<&str>, failures_only: bool) -> anyhow::Result<()> {
    let recording = WorkflowRecording::load(path)?;
    let summary = &recording.summary;

    println!("Recording {}", recording.correlation_id);
    if let Some(ref swarm_id) = recording.swarm_id {
        println!("  swarm:    {}", swarm_id);
    }
    println!("  status:   {}", recording.status);
    println!(
        "  window:   {} .. {} ({} ms)",
        recording.start_time.format("%Y-%m-%d %H:%M:%S%.3f"),
        recording.end_time.format("%H:%M:%S%.3f"),
        recording.duration_ms
    );
    println!(
        "  events:   {} ({} errors), agents: {}, tasks: {}, tools: {}",
        summary.total_events, summary.error_count, summary.unique_agents, summary.unique_tasks, summary.unique_tools
    );
    println!(
        "  tokens:   {} in / {} out",
        summary.total_input_tokens, summary.total_output_tokens
    );
    for (key, value) in &recording.configuration {
        println!("  {}: {}", key, value);
    }

    let records: Vec<&EventRecord> = match (task, failures_only) {
        (Some(id), _) => recording
            .timeline_for_task(id)
            .into_iter()
            .filter(|r| !failures_only || r.is_failure())
            .collect(),
        (None, true) => recording.failures(),
        (None, false) => recording.timeline.iter().collect(),
    };

    println!();
    for record in records {
        print_record(record);
    }
    Ok(())
}

fn print_record(record: &EventRecord) {
    let subject = record
        .task_id
        .as_deref()
        .or(record.tool_name.as_deref())
        .unwrap_or("-");
    let duration = record
        .duration_ms
        .map(|d| format!(" ({} ms)", d))
        .unwrap_or_default();
    println!(
        "+{:>7} ms  {:<20} {:<22} {}{}",
        record.elapsed_ms, record.event_type, subject, record.message, duration
    );
}

fn replay(config: &AppConfig, path: &Path) -> anyhow::Result<()> {
    let recording = WorkflowRecording::load(path)?;
    let bus = EventBus::new(config.events.capacity.max(recording.timeline.len()));
    let replayed = Recorder::new(&bus).for_correlation(&recording.correlation_id);

    let published = recording.replay_into(&bus);
    let rebuilt = replayed.finish()?;
    for record in &rebuilt.timeline {
        print_record(record);
    }

    if rebuilt.timeline == recording.timeline {
        println!("\nReplayed {} events; timeline matches the recording.", published);
    } else {
        warn!(
            published,
            recorded = recording.timeline.len(),
            "Replayed timeline differs from the recording"
        );
    }
    Ok(())
}
