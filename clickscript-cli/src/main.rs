//! clickscript CLI
//!
//! Usage:
//!   clickscript record login.json            # record until Ctrl is tapped twice
//!   clickscript run login.json --data people.csv
//!   clickscript show login.json
//!   clickscript check login.json
//!   clickscript chords

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use tokio_stream::StreamExt;
use tracing::{info, warn};

use clickscript::platforms::{screen_search, RdevSink};
use clickscript::storage::script_name;
use clickscript::{
    load_script, player, ChannelOperator, ChordTable, Configuration, DataSource, Engine, Script,
    Session, TemplateDir, TerminateReason,
};
use clickscript_recorder::ScriptRecorder;

mod check;
mod dialog;

#[derive(Parser)]
#[command(name = "clickscript")]
#[command(about = "Record and replay desktop GUI scripts")]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[clap(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Script file (JSON)
    script: PathBuf,

    /// CSV file whose columns feed the field commands
    #[clap(long)]
    data: Option<PathBuf>,

    /// Configuration file (JSON)
    #[clap(long, env = "CLICKSCRIPT_CONFIG")]
    config: Option<PathBuf>,

    /// Append recoverable errors to this file
    #[clap(long)]
    error_log: Option<PathBuf>,

    /// Start immediately instead of after the configured delay
    #[clap(long)]
    no_delay: bool,

    /// Log the commands without touching the mouse, keyboard or screen
    #[clap(long)]
    dry_run: bool,
}

#[derive(Parser, Debug)]
struct RecordArgs {
    /// Where to save the recording
    output: PathBuf,

    /// Configuration file (JSON)
    #[clap(long, env = "CLICKSCRIPT_CONFIG")]
    config: Option<PathBuf>,

    /// Continue the script already in `output`
    #[clap(long)]
    append: bool,

    /// Do not save element templates for clicks
    #[clap(long)]
    no_templates: bool,
}

#[derive(Parser, Debug)]
struct ScriptArgs {
    script: PathBuf,

    /// Configuration file (JSON), for the elements directory
    #[clap(long, env = "CLICKSCRIPT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a script
    Run(RunArgs),
    /// Record a new script
    Record(RecordArgs),
    /// Print the commands of a script
    Show(ScriptArgs),
    /// Check labels, blocks, loops and templates of a script
    Check(ScriptArgs),
    /// List the recognized key chords
    Chords,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run(args) => run_script(args).await,
        Commands::Record(args) => record_script(args).await,
        Commands::Show(args) => show_script(&args),
        Commands::Check(args) => check_script(&args),
        Commands::Chords => {
            show_chords();
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    let default = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<Configuration> {
    match path {
        Some(path) => Configuration::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display())),
        None => Ok(Configuration::default()),
    }
}

async fn run_script(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(path) = args.error_log {
        config.error_log = Some(path);
    }
    if args.no_delay {
        config.start_delay = 0.0;
    }

    let program = load_script(&args.script)
        .with_context(|| format!("Failed to load script {}", args.script.display()))?;
    let name = script_name(&args.script);
    let script = Script::from_program(name.clone(), &program);

    let (operator, mut dialogs) = ChannelOperator::channel();
    let mut engine = Engine::new(script, config.clone()).with_operator(operator);
    if args.dry_run {
        info!("Dry run: no input is sent and clicks are not verified");
    } else {
        engine = engine
            .with_sink(RdevSink::new())
            .with_locator(screen_search(&config.elements_dir));
    }
    if let Some(path) = &args.data {
        let data = DataSource::from_csv(path)
            .with_context(|| format!("Failed to load data {}", path.display()))?;
        engine = engine.with_data(data);
    }

    let session = Session::new();
    println!(
        "{} {} starts in {:.1}s, Ctrl-C to stop",
        "▶".green(),
        name.bold(),
        config.start_delay
    );
    let handle = player::spawn(engine, &session, config.start_delay())?;
    let stop = handle.stop_signal();

    loop {
        tokio::select! {
            pending = dialogs.next() => match pending {
                Some(pending) => {
                    let choice = tokio::task::spawn_blocking({
                        let request = pending.request.clone();
                        move || dialog::prompt(&request)
                    })
                    .await
                    .context("Dialog prompt failed")?;
                    pending.respond(choice);
                }
                // The engine is gone, so the run is over.
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping playback");
                stop.stop();
            }
        }
    }

    let report = tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("Playback worker failed")??;

    println!();
    let summary = format!("{} step(s), {} recovered error(s)", report.steps, report.faults.len());
    match &report.reason {
        TerminateReason::Finished | TerminateReason::StopCommand => {
            println!("{} {} finished: {}", "✓".green(), name, summary);
            Ok(())
        }
        TerminateReason::Cancelled => {
            println!("{} {} cancelled: {}", "■".yellow(), name, summary);
            Ok(())
        }
        TerminateReason::PolicyStop { index, message }
        | TerminateReason::OperatorStop { index, message } => {
            println!("{} {} stopped at #{}: {}", "✗".red(), name, index, message);
            anyhow::bail!("script stopped at command #{index}")
        }
        TerminateReason::Failed(message) => anyhow::bail!("script failed: {message}"),
    }
}

async fn record_script(args: RecordArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut recorder = ScriptRecorder::new(config, Session::new());
    if args.append && args.output.exists() {
        let program = load_script(&args.output)
            .with_context(|| format!("Failed to load script {}", args.output.display()))?;
        recorder = recorder.with_program(program);
        // New commands go after the last one.
        recorder.edit(|program| program.set_cursor(program.len().checked_sub(1)))?;
    }
    if args.no_templates {
        recorder = recorder.without_templates();
    }

    let mut stream = recorder.event_stream();
    let printer = tokio::spawn(async move {
        while let Some(recorded) = stream.next().await {
            println!("{:>4}  {}", recorded.index, recorded.command);
        }
    });

    recorder.start().await?;
    println!(
        "{} Recording, tap Ctrl twice (or press Ctrl-C here) to stop",
        "●".red()
    );

    let mut finished = recorder.finished();
    tokio::select! {
        _ = finished.wait_for(|done| *done) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    let stopped = recorder.stop().await;
    printer.abort();
    stopped?;

    recorder.save(&args.output)?;
    let count = recorder.program()?.len();
    println!(
        "{} Saved {} command(s) to {}",
        "✓".green(),
        count,
        args.output.display()
    );
    Ok(())
}

fn show_script(args: &ScriptArgs) -> Result<()> {
    let program = load_script(&args.script)
        .with_context(|| format!("Failed to load script {}", args.script.display()))?;
    for (index, command) in program.commands().iter().enumerate() {
        let line = format!("{index:>4}  {command}");
        if command.label_name().is_some() {
            println!("{}", line.bold());
        } else {
            println!("{line}");
        }
    }
    Ok(())
}

fn check_script(args: &ScriptArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let program = load_script(&args.script)
        .with_context(|| format!("Failed to load script {}", args.script.display()))?;
    let report = check::check_program(&program, &TemplateDir::new(&config.elements_dir));
    report.display();
    if !report.is_valid() {
        anyhow::bail!("{} problem(s) found", report.errors.len());
    }
    Ok(())
}

fn show_chords() {
    for chord in ChordTable::builtin().chords() {
        println!("{:<14} {}", chord.name.bold(), chord.events.join(", "));
    }
}
