//! Ensemble CLI - run a team of specialist agents on one task
//!
//! Usage:
//!   ensemble init [path]         Write the default .ensemble/config.toml
//!   ensemble roster              List the available specialists
//!   ensemble run <task>          Run the team until the task is solved

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ensemble_agent::{roster, ApprovalPolicy, ChatWorker, Participant, ScriptedWorker, Specialist};
use ensemble_core::{EnsembleConfig, Event, RunConfig, RunStatus};
use ensemble_orchestrator::{ActivityLogger, Orchestrator, RunOutcome, SubscriptionMode};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "ensemble")]
#[command(author, version, about = "Multi-agent coordination with stall recovery")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    Init {
        /// Repository path (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// List the available specialists
    Roster,

    /// Run the team on a task
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Task description
    task: String,

    /// Print whole messages only, no streamed chunks
    #[arg(long)]
    summary: bool,

    /// Use scripted workers instead of the chat API
    #[arg(long)]
    dry_run: bool,

    /// Restrict the team to these specialists (repeatable)
    #[arg(long, value_name = "KEY")]
    only: Vec<String>,

    /// Specialist that writes the final result
    #[arg(long, value_name = "KEY")]
    synthesizer: Option<String>,

    /// Append a transcript to .ensemble/activity.md
    #[arg(long)]
    activity_log: bool,

    /// Maximum number of rounds
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Consecutive rounds without progress before a reset
    #[arg(long)]
    stall_limit: Option<usize>,

    /// Resets allowed before giving up
    #[arg(long)]
    reset_limit: Option<usize>,

    /// Rounds kept verbatim in prompts
    #[arg(long)]
    horizon: Option<usize>,

    /// Seconds a single turn may take
    #[arg(long)]
    round_timeout_secs: Option<u64>,
}

impl RunArgs {
    fn apply_overrides(&self, run: &mut RunConfig) {
        if let Some(v) = self.max_rounds {
            run.round_limit = v;
        }
        if let Some(v) = self.stall_limit {
            run.stall_limit = v;
        }
        if let Some(v) = self.reset_limit {
            run.reset_limit = v;
        }
        if let Some(v) = self.horizon {
            run.context_horizon = v;
        }
        if let Some(v) = self.round_timeout_secs {
            run.per_round_timeout_secs = v;
        }
        if let Some(key) = &self.synthesizer {
            run.synthesizer = Some(key.to_lowercase());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { path } => cmd_init(&path),
        Commands::Roster => cmd_roster(),
        Commands::Run(args) => {
            let outcome = cmd_run(args).await?;
            if !outcome.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn cmd_init(path: &Path) -> Result<()> {
    info!("Initializing Ensemble in {:?}", path);
    EnsembleConfig::write_default(path).context("Failed to write default config")?;

    println!("Initialized Ensemble in {:?}", path);
    println!("Created:");
    println!("  .ensemble/config.toml");
    println!("\nNext steps:");
    println!("  1. Set the API key variable named in [models] api_key_env");
    println!("  2. Run 'ensemble run \"<task>\"' (add --dry-run to try it offline)");
    Ok(())
}

fn approval_policy(config: &EnsembleConfig) -> ApprovalPolicy {
    if std::env::var_os("APPROVAL_REQUIRED").is_some() {
        ApprovalPolicy::from_env()
    } else {
        ApprovalPolicy::new(config.approval_required)
    }
}

fn cmd_roster() -> Result<()> {
    let config = EnsembleConfig::load_or_default(Path::new("."))?;
    let policy = approval_policy(&config);

    println!("Specialists");
    println!("===========");
    for specialist in roster::roster() {
        println!("  {:<12} {}", specialist.key, specialist.name);
        println!("  {:<12} {}", "", specialist.description);
    }
    println!();
    if policy.approval_required() {
        println!("Approval: side-effecting actions wait for human approval");
    } else {
        println!("Approval: side-effecting actions run directly");
    }
    Ok(())
}

fn team(only: &[String]) -> Result<Vec<&'static Specialist>> {
    if only.is_empty() {
        return Ok(roster::roster().iter().collect());
    }
    only.iter()
        .map(|key| match roster::find(key) {
            Some(specialist) => Ok(specialist),
            None => bail!("Unknown specialist '{}' (see 'ensemble roster')", key),
        })
        .collect()
}

fn build_participants(
    team: &[&'static Specialist],
    config: &EnsembleConfig,
    dry_run: bool,
) -> Result<Vec<Participant>> {
    let policy = approval_policy(config);
    team.iter()
        .map(|specialist| {
            let participant = if dry_run {
                Participant::from_worker(
                    specialist.key,
                    specialist.description,
                    ScriptedWorker::dry_run(specialist, policy),
                )
            } else {
                let worker = ChatWorker::for_specialist(specialist, &config.models, &policy)
                    .with_context(|| format!("Failed to set up {}", specialist.key))?;
                Participant::from_worker(specialist.key, specialist.description, worker)
            };
            Ok(participant)
        })
        .collect()
}

async fn cmd_run(args: RunArgs) -> Result<RunOutcome> {
    let root = Path::new(".");
    let mut config = EnsembleConfig::load_or_default(root)?;
    args.apply_overrides(&mut config.run);

    let team = team(&args.only)?;
    let participants = build_participants(&team, &config, args.dry_run)?;
    let keys: Vec<String> = participants.iter().map(|p| p.key().to_string()).collect();
    info!(team = %keys.join(", "), dry_run = args.dry_run, "starting run");

    let mut orchestrator = Orchestrator::new(config.run.clone());
    for participant in participants {
        orchestrator.register(participant);
    }

    let logger = if args.activity_log {
        let logger = ActivityLogger::new(root.join(".ensemble"));
        println!("Activity log: {}", logger.output_path().display());
        let subscription = orchestrator.subscribe(SubscriptionMode::Summary);
        Some(logger.spawn(args.task.clone(), keys, subscription))
    } else {
        None
    };

    let mut handle = orchestrator.start(args.task.clone());

    let cancel = handle.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let mut renderer = Renderer::new(args.summary);
    while let Some(event) = handle.events.recv().await {
        renderer.render(&event);
    }

    let outcome = handle.outcome().await?;
    if let Some(logger) = logger {
        if let Err(e) = logger.await {
            warn!("activity log task failed: {}", e);
        }
    }

    print_outcome(&outcome);
    Ok(outcome)
}

/// Console rendering of bus events
struct Renderer {
    summary: bool,
    streaming: Option<(usize, String)>,
}

impl Renderer {
    fn new(summary: bool) -> Self {
        Self {
            summary,
            streaming: None,
        }
    }

    fn end_stream(&mut self) {
        if self.streaming.take().is_some() {
            println!();
        }
    }

    fn render(&mut self, event: &Event) {
        match event {
            Event::OrchestratorMessage { round, kind, text } => {
                self.end_stream();
                match round {
                    Some(r) => println!("[{} | round {}] {}", kind, r + 1, text),
                    None => println!("[{}] {}", kind, text),
                }
            }
            Event::AgentDelta {
                round,
                participant,
                chunk,
            } => {
                if self.summary {
                    return;
                }
                let current = (*round, participant.clone());
                if self.streaming.as_ref() != Some(&current) {
                    self.end_stream();
                    print!("{} (round {}): ", participant, round + 1);
                    self.streaming = Some(current);
                }
                print!("{}", chunk);
                let _ = std::io::stdout().flush();
            }
            Event::AgentMessage {
                round,
                participant,
                message,
            } => {
                if self.streaming.take().is_some() {
                    println!();
                } else {
                    println!("{} (round {}): {}", participant, round + 1, message.text.trim());
                }
            }
            Event::FinalResult { message } => {
                self.end_stream();
                println!("\n=== Final result ({}) ===\n{}", message.author, message.text.trim());
            }
            Event::Failure {
                status,
                reason,
                rounds,
            } => {
                self.end_stream();
                println!("\n=== Run {} after {} rounds ===\n{}", status, rounds, reason);
            }
            Event::Cancelled { reason, rounds } => {
                self.end_stream();
                println!("\n=== Run cancelled after {} rounds ===\n{}", rounds, reason);
            }
        }
    }
}

fn print_outcome(outcome: &RunOutcome) {
    let history: Vec<String> = outcome
        .status_history
        .iter()
        .map(RunStatus::to_string)
        .collect();
    println!();
    println!("Status:  {}", outcome.status);
    println!("Rounds:  {}", outcome.rounds.len());
    println!("Resets:  {}", outcome.reset_count);
    println!("History: {}", history.join(" -> "));
}
