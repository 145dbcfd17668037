//! Proctor CLI - Command-line interface for Proctor Flux
//!
//! Commands:
//! - score: Score streaming observations into per-frame results
//! - replay: Score a recorded session and print its summary
//! - violation: Record or count integrity violations in a log file
//! - config: Print the effective scorer configuration
//! - doctor: Diagnose configuration and log file health

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use proctor_flux::pipeline::{parse_observations_ndjson, replay_session};
use proctor_flux::session::{ProctorSession, SessionKey};
use proctor_flux::sink::{JsonlSink, ResultSink};
use proctor_flux::types::{FrameEvent, Producer, TimedObservation, ViolationCounts, ViolationType};
use proctor_flux::violations::{JsonlViolationLog, ViolationTracker};
use proctor_flux::{
    AttentionScorer, GazeStatePolicy, ProctorError, ScorerConfig, PROCTOR_VERSION, PRODUCER_NAME,
};

/// Proctor - Attention scoring and session integrity summaries
#[derive(Parser)]
#[command(name = "proctor")]
#[command(author = "Synheart AI Inc")]
#[command(version = PROCTOR_VERSION)]
#[command(about = "Score proctoring observations and summarize sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score timestamped observations (NDJSON) into per-frame results (NDJSON)
    Score {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Exam session identifier
        #[arg(long)]
        session_id: String,

        /// Student roll number
        #[arg(long)]
        roll_no: String,

        /// Also append every result to this event log
        #[arg(long)]
        events_log: Option<PathBuf>,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Replay a recorded session and print its summary
    Replay {
        /// Observations file (NDJSON, use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Exam session identifier
        #[arg(long)]
        session_id: String,

        /// Student roll number
        #[arg(long)]
        roll_no: String,

        /// Violation log to count violations from
        #[arg(long)]
        violations: Option<PathBuf>,

        /// Session start (RFC 3339); defaults to the first observation
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Session end (RFC 3339); defaults to the last observation
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        /// Include every scored frame in the output
        #[arg(long)]
        frames: bool,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Record or count integrity violations
    Violation {
        #[command(subcommand)]
        action: ViolationAction,
    },

    /// Print the effective scorer configuration
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Diagnose configuration and log file health
    Doctor {
        /// Check a violation log file
        #[arg(long)]
        violations: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Subcommand)]
enum ViolationAction {
    /// Append a violation to the log
    Record {
        /// Violation log file
        #[arg(long)]
        log: PathBuf,

        #[arg(long)]
        session_id: String,

        #[arg(long)]
        roll_no: String,

        /// Violation type (mouse_out, tab_switch, or any other label)
        #[arg(long = "type")]
        violation_type: String,

        /// Time of the violation (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Print violation counts for a student
    Count {
        /// Violation log file
        #[arg(long)]
        log: PathBuf,

        #[arg(long)]
        session_id: String,

        #[arg(long)]
        roll_no: String,
    },
}

/// Scorer configuration sources; flags override the file or environment
#[derive(Args)]
struct ConfigArgs {
    /// Load configuration from a JSON file instead of the environment
    #[arg(long = "config")]
    config_file: Option<PathBuf>,

    /// Head yaw threshold in degrees
    #[arg(long)]
    yaw_threshold: Option<f64>,

    /// Head pitch threshold in degrees
    #[arg(long)]
    pitch_threshold: Option<f64>,

    /// Seconds of off-center gaze before the gaze penalty applies
    #[arg(long)]
    gaze_duration: Option<f64>,

    /// EMA smoothing factor in (0, 1]
    #[arg(long)]
    alpha: Option<f64>,

    /// How a sustained gaze penalty affects the reported state
    #[arg(long)]
    gaze_state_policy: Option<PolicyArg>,
}

impl ConfigArgs {
    fn resolve(&self) -> Result<ScorerConfig, ProctorError> {
        let mut config = match &self.config_file {
            Some(path) => ScorerConfig::from_json(&fs::read_to_string(path)?)?,
            None => ScorerConfig::from_env()?,
        };

        if let Some(v) = self.yaw_threshold {
            config.yaw_threshold = v;
        }
        if let Some(v) = self.pitch_threshold {
            config.pitch_threshold = v;
        }
        if let Some(v) = self.gaze_duration {
            config.gaze_duration_threshold = v;
        }
        if let Some(v) = self.alpha {
            config.smoothing_alpha = v;
        }
        if let Some(policy) = &self.gaze_state_policy {
            config.gaze_state_policy = policy.into();
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Clone, ValueEnum)]
enum PolicyArg {
    /// Gaze penalty lowers the score only
    ScoreOnly,
    /// A focused frame becomes distracted when the gaze penalty applies
    PromoteFocused,
}

impl From<&PolicyArg> for GazeStatePolicy {
    fn from(arg: &PolicyArg) -> Self {
        match arg {
            PolicyArg::ScoreOnly => GazeStatePolicy::ScoreOnly,
            PolicyArg::PromoteFocused => GazeStatePolicy::PromoteFocused,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Single-line JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), ProctorCliError> {
    match cli.command {
        Commands::Score {
            input,
            session_id,
            roll_no,
            events_log,
            config,
        } => cmd_score(
            &input,
            &session_id,
            &roll_no,
            events_log.as_deref(),
            config.resolve()?,
        ),

        Commands::Replay {
            input,
            session_id,
            roll_no,
            violations,
            start,
            end,
            frames,
            output_format,
            config,
        } => cmd_replay(
            &input,
            &session_id,
            &roll_no,
            violations.as_deref(),
            start,
            end,
            frames,
            &output_format,
            config.resolve()?,
        ),

        Commands::Violation { action } => match action {
            ViolationAction::Record {
                log,
                session_id,
                roll_no,
                violation_type,
                at,
            } => cmd_violation_record(&log, &session_id, &roll_no, &violation_type, at),
            ViolationAction::Count {
                log,
                session_id,
                roll_no,
            } => cmd_violation_count(&log, &session_id, &roll_no),
        },

        Commands::Config { config } => {
            println!("{}", config.resolve()?.to_json()?);
            Ok(())
        }

        Commands::Doctor {
            violations,
            json,
            config,
        } => cmd_doctor(&config, violations.as_deref(), json),
    }
}

fn cmd_score(
    input: &Path,
    session_id: &str,
    roll_no: &str,
    events_log: Option<&Path>,
    config: ScorerConfig,
) -> Result<(), ProctorCliError> {
    let scorer = AttentionScorer::new(config)?;
    let stdout = JsonlSink::new(io::stdout());
    let event_log = events_log.map(JsonlSink::<File>::append_to).transpose()?;

    let producer = Producer::new();
    let mut session: Option<ProctorSession> = None;
    let mut scored = 0usize;

    for (index, line) in open_input(input)?.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let timed: TimedObservation = serde_json::from_str(trimmed).map_err(|e| {
            ProctorCliError::ParseError(format!("observation on line {}: {}", index + 1, e))
        })?;

        let session = session.get_or_insert_with(|| {
            ProctorSession::start(SessionKey::new(session_id, roll_no), timed.timestamp)
        });
        let event = FrameEvent {
            producer: producer.clone(),
            session_id: session_id.to_string(),
            roll_no: roll_no.to_string(),
            frame: session.observe(&scorer, &timed.observation, timed.timestamp),
        };

        stdout.emit(&event)?;
        if let Some(log) = &event_log {
            log.emit(&event)?;
        }
        scored += 1;
    }

    info!(session_id, roll_no, scored, "scoring finished");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_replay(
    input: &Path,
    session_id: &str,
    roll_no: &str,
    violations: Option<&Path>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    include_frames: bool,
    output_format: &OutputFormat,
    config: ScorerConfig,
) -> Result<(), ProctorCliError> {
    let mut input_data = String::new();
    open_input(input)?.read_to_string(&mut input_data)?;
    let observations = parse_observations_ndjson(&input_data)?;

    let first = observations.first().map(|o| o.timestamp);
    let last = observations.last().map(|o| o.timestamp);
    let start = start.or(first).ok_or(ProctorCliError::MissingWindow)?;
    let end = end.or(last).ok_or(ProctorCliError::MissingWindow)?;

    let counts = match violations {
        Some(path) => ViolationTracker::open_jsonl(path)?.counts(session_id, roll_no)?,
        None => ViolationCounts::default(),
    };

    let replay = replay_session(config, session_id, roll_no, &observations, &counts, start, end)?;

    let output = if include_frames {
        serde_json::to_value(&replay)?
    } else {
        serde_json::to_value(&replay.summary)?
    };
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&output)?),
        OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(&output)?),
    }
    Ok(())
}

fn cmd_violation_record(
    log: &Path,
    session_id: &str,
    roll_no: &str,
    violation_type: &str,
    at: Option<DateTime<Utc>>,
) -> Result<(), ProctorCliError> {
    let violation_type = ViolationType::from(violation_type);
    if violation_type.as_str().is_empty() {
        return Err(ProctorCliError::ParseError(
            "violation type must not be empty".to_string(),
        ));
    }

    let tracker = ViolationTracker::open_jsonl(log)?;
    let record = tracker.record(
        session_id,
        roll_no,
        violation_type,
        at.unwrap_or_else(Utc::now),
    )?;
    println!("{}", serde_json::to_string(&record)?);
    Ok(())
}

fn cmd_violation_count(log: &Path, session_id: &str, roll_no: &str) -> Result<(), ProctorCliError> {
    let counts = ViolationTracker::open_jsonl(log)?.counts(session_id, roll_no)?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}

fn cmd_doctor(
    config: &ConfigArgs,
    violations: Option<&Path>,
    json: bool,
) -> Result<(), ProctorCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "proctor_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Proctor Flux version {}", PROCTOR_VERSION),
    });

    checks.push(match config.resolve() {
        Ok(c) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "yaw {}°, pitch {}°, gaze {}s, alpha {}, policy {}",
                c.yaw_threshold,
                c.pitch_threshold,
                c.gaze_duration_threshold,
                c.smoothing_alpha,
                c.gaze_state_policy
            ),
        },
        Err(e) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    });

    if let Some(path) = violations {
        let check = if !path.exists() {
            DoctorCheck {
                name: "violation_log".to_string(),
                status: CheckStatus::Warning,
                message: "Violation log does not exist yet".to_string(),
            }
        } else {
            match JsonlViolationLog::open(path) {
                Ok(log) => DoctorCheck {
                    name: "violation_log".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Violation log readable ({} records)", log.len()),
                },
                Err(e) => DoctorCheck {
                    name: "violation_log".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot load violation log: {}", e),
                },
            }
        };
        checks.push(check);
    }

    checks.push(DoctorCheck {
        name: "stdin".to_string(),
        status: CheckStatus::Ok,
        message: if atty::is(atty::Stream::Stdin) {
            "stdin is a TTY (interactive mode)".to_string()
        } else {
            "stdin is a pipe (streaming mode ready)".to_string()
        },
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: PROCTOR_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Proctor Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");
        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    if report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error))
    {
        Err(ProctorCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn open_input(input: &Path) -> Result<Box<dyn BufRead>, ProctorCliError> {
    if input.to_string_lossy() == "-" {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        Ok(Box::new(BufReader::new(File::open(input)?)))
    }
}

// Error types

#[derive(Debug)]
enum ProctorCliError {
    Io(io::Error),
    Proctor(ProctorError),
    Json(serde_json::Error),
    MissingWindow,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for ProctorCliError {
    fn from(e: io::Error) -> Self {
        ProctorCliError::Io(e)
    }
}

impl From<ProctorError> for ProctorCliError {
    fn from(e: ProctorError) -> Self {
        ProctorCliError::Proctor(e)
    }
}

impl From<serde_json::Error> for ProctorCliError {
    fn from(e: serde_json::Error) -> Self {
        ProctorCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<ProctorCliError> for CliError {
    fn from(e: ProctorCliError) -> Self {
        match e {
            ProctorCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            ProctorCliError::Proctor(ProctorError::InvalidConfig(msg)) => CliError {
                code: "INVALID_CONFIG".to_string(),
                message: msg,
                hint: Some("Run 'proctor config' to inspect the effective values".to_string()),
            },
            ProctorCliError::Proctor(e) => CliError {
                code: "PROCTOR_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Ensure observations match the expected schema".to_string()),
            },
            ProctorCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            ProctorCliError::MissingWindow => CliError {
                code: "NO_SESSION_WINDOW".to_string(),
                message: "No observations to infer the session window from".to_string(),
                hint: Some("Pass --start and --end".to_string()),
            },
            ProctorCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            ProctorCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
