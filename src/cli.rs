use crate::client::{split_args, FileClient, HttpRunClient};
use crate::config::{self, Overrides};
use crate::lifecycle;
use crate::model::{FileKind, LogDelta, MonitorConfig, MonitorEvent, Run, RunState, StopReason};
use crate::orchestrator::{unix_now, RunMonitor};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERRORED: i32 = 2;
pub const EXIT_CANCELLED: i32 = 130;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    /// Raw script output, written without an added newline.
    Log(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        // Unlocked handles: tracing writes to stderr from other threads.
        let mut out = std::io::LineWriter::new(std::io::stdout());
        let mut err = std::io::LineWriter::new(std::io::stderr());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Log(chunk) => {
                    let _ = write!(out, "{}", chunk);
                    let _ = out.flush();
                }
                OutputLine::Stderr(msg) => {
                    let _ = out.flush();
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "pirun",
    version,
    about = "Run scripts on a PiRun executor and follow them until they finish"
)]
pub struct Cli {
    /// Config file (JSON); defaults to <config dir>/pirun/config.json when present
    #[arg(long, global = true, env = "PIRUN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base URL of the executor, e.g. http://raspberrypi.local:8080
    #[arg(long, global = true, env = "PIRUN_BASE_URL")]
    pub base_url: Option<String>,

    /// Time between status polls
    #[arg(long, global = true, env = "PIRUN_POLL_INTERVAL")]
    pub poll_interval: Option<humantime::Duration>,

    /// Per-request timeout
    #[arg(long, global = true, env = "PIRUN_REQUEST_TIMEOUT")]
    pub request_timeout: Option<humantime::Duration>,

    /// Ask the executor for only the last N KiB of the log
    #[arg(long, global = true, env = "PIRUN_LOG_TAIL_KB")]
    pub log_tail_kb: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Submit a script and follow it until it finishes (Ctrl-C stops following)
    Run(RunArgs),
    /// Browse and edit project files on the executor
    Files {
        #[command(subcommand)]
        action: FilesCommand,
    },
    /// Check that the executor is reachable
    Health,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Script path, relative to the executor's project root
    pub path: String,

    /// Arguments passed to the script
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,

    /// Extra arguments as one whitespace-separated string
    #[arg(long = "args", value_name = "RAW", allow_hyphen_values = true)]
    pub raw_args: Option<String>,

    /// Print the final run as JSON instead of streaming the log
    #[arg(long)]
    pub json: bool,

    /// Suppress status lines and the summary
    #[arg(long)]
    pub quiet: bool,
}

impl RunArgs {
    fn script_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(raw) = self.raw_args.as_deref() {
            args.extend(split_args(raw));
        }
        args
    }
}

#[derive(Debug, Subcommand, Clone)]
pub enum FilesCommand {
    /// List a directory (the project root by default)
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
    /// Print a file
    Cat { path: String },
    /// Write a file from --from or stdin
    Put {
        path: String,
        #[arg(long, value_name = "FILE")]
        from: Option<PathBuf>,
    },
    /// Delete a file
    Rm { path: String },
}

/// Run the parsed command and return the process exit code.
pub async fn run(args: Cli) -> Result<i32> {
    let cfg = build_config(&args)?;
    match args.command {
        Command::Run(run_args) => run_script(cfg, run_args).await,
        Command::Files { action } => run_files(cfg, action).await,
        Command::Health => run_health(cfg).await,
    }
}

/// Build a `MonitorConfig` from the config file and CLI arguments.
pub fn build_config(args: &Cli) -> Result<MonitorConfig> {
    config::load(
        args.config.as_deref(),
        Overrides {
            base_url: args.base_url.clone(),
            poll_interval: args.poll_interval.map(Duration::from),
            request_timeout: args.request_timeout.map(Duration::from),
            log_tail_kb: args.log_tail_kb,
        },
    )
}

/// Process exit code for a run that stopped for `reason`.
fn exit_code_for(reason: StopReason, run: Option<&Run>) -> i32 {
    match reason {
        StopReason::Finished(RunState::Succeeded) => EXIT_SUCCESS,
        StopReason::Finished(RunState::Failed) => run
            .and_then(|r| r.exit_code)
            .filter(|code| (1..=255).contains(code))
            .unwrap_or(EXIT_FAILED),
        StopReason::Finished(_) => EXIT_ERRORED,
        StopReason::Cancelled | StopReason::Superseded => EXIT_CANCELLED,
    }
}

async fn run_script(cfg: MonitorConfig, args: RunArgs) -> Result<i32> {
    let client = Arc::new(HttpRunClient::new(&cfg)?);
    let mut monitor = RunMonitor::new(client, cfg.poll_interval);
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<MonitorEvent>();
    monitor.on_update(move |ev| {
        let _ = evt_tx.send(ev.clone());
    });

    let (out_tx, out_handle) = spawn_output_writer();
    let status = |msg: String| {
        if !args.quiet {
            let _ = out_tx.send(OutputLine::Stderr(msg));
        }
    };

    let script_args = args.script_args();
    monitor
        .submit(&args.path, &script_args)
        .await
        .with_context(|| format!("failed to start {}", args.path.trim()))?;

    let mut shown_log = String::new();
    let mut last_state = None;
    let mut interrupted = false;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let reason = loop {
        tokio::select! {
            ev = evt_rx.recv() => {
                let Some(ev) = ev else { break StopReason::Cancelled };
                match ev {
                    MonitorEvent::Submitted(run) => {
                        status(format!("Submitted {} as run {}", run.path, run.id));
                    }
                    MonitorEvent::Updated(run) => {
                        if !args.json {
                            match lifecycle::reconcile_log(&shown_log, &run.log) {
                                LogDelta::Unchanged => {}
                                LogDelta::Append(text) => {
                                    let _ = out_tx.send(OutputLine::Log(text.to_string()));
                                }
                                LogDelta::Reset(text) => {
                                    if !shown_log.is_empty() {
                                        status("--- log restarted ---".to_string());
                                    }
                                    let _ = out_tx.send(OutputLine::Log(text.to_string()));
                                }
                            }
                        }
                        shown_log.clone_from(&run.log);
                        if last_state != Some(run.state) {
                            last_state = Some(run.state);
                            status(crate::text_summary::progress_line(&run, unix_now()));
                        }
                    }
                    MonitorEvent::Info(info) => {
                        let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
                    }
                    MonitorEvent::Stopped(reason) => break reason,
                }
            }
            res = &mut ctrl_c, if !interrupted => {
                res.context("failed to listen for Ctrl-C")?;
                interrupted = true;
                monitor.cancel();
            }
        }
    };

    let run = monitor.current_run();
    if let Some(run) = run.as_ref() {
        if args.json {
            let out = serde_json::to_string_pretty(run)?;
            let _ = out_tx.send(OutputLine::Stdout(out));
        } else if !args.quiet {
            if !shown_log.is_empty() && !shown_log.ends_with('\n') {
                let _ = out_tx.send(OutputLine::Log("\n".to_string()));
            }
            let summary = crate::text_summary::build_text_summary(run, unix_now());
            for line in summary.lines {
                let _ = out_tx.send(OutputLine::Stderr(line));
            }
        }
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(exit_code_for(reason, run.as_ref()))
}

async fn run_files(cfg: MonitorConfig, action: FilesCommand) -> Result<i32> {
    let files = FileClient::new(&cfg)?;
    let (out_tx, out_handle) = spawn_output_writer();

    match action {
        FilesCommand::Ls { path } => {
            let entries = files
                .list(&path)
                .await
                .with_context(|| format!("failed to list {path:?}"))?;
            for entry in entries {
                let line = match entry.kind {
                    FileKind::Dir => format!("{:>10}  {}/", "-", entry.name),
                    FileKind::File => format!("{:>10}  {}", entry.size, entry.name),
                };
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
        }
        FilesCommand::Cat { path } => {
            let content = files
                .read(&path)
                .await
                .with_context(|| format!("failed to read {path}"))?;
            let _ = out_tx.send(OutputLine::Log(content));
        }
        FilesCommand::Put { path, from } => {
            let content = match from {
                Some(src) => tokio::fs::read_to_string(&src)
                    .await
                    .with_context(|| format!("failed to read {}", src.display()))?,
                None => {
                    let mut buf = String::new();
                    tokio::io::stdin()
                        .read_to_string(&mut buf)
                        .await
                        .context("failed to read stdin")?;
                    buf
                }
            };
            let saved = files
                .write(&path, &content)
                .await
                .with_context(|| format!("failed to write {path}"))?;
            if !saved {
                anyhow::bail!("executor did not save {path}");
            }
            let _ = out_tx.send(OutputLine::Stderr(format!(
                "Saved {path} ({} bytes)",
                content.len()
            )));
        }
        FilesCommand::Rm { path } => {
            let deleted = files
                .delete(&path)
                .await
                .with_context(|| format!("failed to delete {path}"))?;
            if !deleted {
                anyhow::bail!("executor did not delete {path}");
            }
            let _ = out_tx.send(OutputLine::Stderr(format!("Deleted {path}")));
        }
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(EXIT_SUCCESS)
}

async fn run_health(cfg: MonitorConfig) -> Result<i32> {
    let client = HttpRunClient::new(&cfg)?;
    let ok = client
        .health()
        .await
        .with_context(|| format!("executor at {} is unreachable", cfg.base_url))?;
    if ok {
        println!("{}: ok", cfg.base_url);
        Ok(EXIT_SUCCESS)
    } else {
        println!("{}: unhealthy", cfg.base_url);
        Ok(EXIT_FAILED)
    }
}
