//! Cohort CLI - Command-line interface for Synheart Cohort
//!
//! Commands:
//! - generate: Simulate a cohort and write feature rows with both label vectors
//! - evaluate: Simulate, sweep regularization, and print the cross-distribution report
//! - audit: Print the leakage audit of the extracted features
//! - config: Print the default configuration

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use synheart_cohort::config::{EvaluatorConfig, NoiseMode, SimulationConfig, SweepBudget};
use synheart_cohort::leakage::{audit, audit_archetypes, audit_labels, LeakageReport};
use synheart_cohort::{
    simulate, Archetype, CohortEncoder, CrossDistributionEvaluator, LogisticRegression, SimError,
    COHORT_VERSION,
};

/// Cohort - Synthetic engagement cohorts with controllable label noise
#[derive(Parser)]
#[command(name = "cohort")]
#[command(author = "Synheart AI Inc")]
#[command(version = COHORT_VERSION)]
#[command(about = "Simulate behavior cohorts and evaluate label-noise generalization", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a cohort and write its feature rows
    Generate {
        #[command(flatten)]
        sim: SimArgs,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        format: OutputFormat,

        /// Write the dataset summary to this file
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Run the regularization sweep and cross-distribution matrix
    Evaluate {
        #[command(flatten)]
        sim: SimArgs,

        /// Evaluate one class against the rest (e.g. dropout)
        #[arg(long)]
        binary: Option<String>,

        /// Comma-separated regularization candidates
        #[arg(long, value_delimiter = ',')]
        candidates: Option<Vec<f64>>,

        /// Stop the sweep after this many candidates
        #[arg(long)]
        max_candidates: Option<usize>,

        /// Stop starting new candidates after this many milliseconds
        #[arg(long)]
        max_duration_ms: Option<u64>,

        /// Stratified folds for the cross-validated F1 (0 disables)
        #[arg(long)]
        cv_folds: Option<usize>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Audit feature columns for leakage
    Audit {
        #[command(flatten)]
        sim: SimArgs,

        /// Target to correlate features against: archetype, archetypes (ordinal
        /// plus every indicator), archetype:<name>, label or label:<name>
        #[arg(long, default_value = "archetypes", value_parser = parse_audit_target)]
        target: AuditTarget,
    },

    /// Print the default configuration as JSON
    Config {
        /// Print the evaluator configuration instead of the simulation one
        #[arg(long)]
        evaluator: bool,
    },
}

#[derive(Args)]
struct SimArgs {
    /// Load simulation configuration from a JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of entities
    #[arg(long)]
    entities: Option<usize>,

    /// Days per entity
    #[arg(long)]
    days: Option<usize>,

    /// Label-noise probability
    #[arg(long)]
    noise: Option<f64>,

    /// How flipped labels are drawn
    #[arg(long)]
    noise_mode: Option<NoiseModeArg>,

    /// Run seed
    #[arg(long)]
    seed: Option<u64>,
}

impl SimArgs {
    fn build(&self) -> Result<SimulationConfig, CohortCliError> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::from_json(&fs::read_to_string(path)?)?,
            None => SimulationConfig::default(),
        };
        if let Some(n) = self.entities {
            config = config.with_entities(n);
        }
        if let Some(days) = self.days {
            config = config.with_days(days);
        }
        if let Some(p) = self.noise {
            config = config.with_label_noise(p);
        }
        if let Some(mode) = &self.noise_mode {
            config = config.with_noise_mode(mode.into());
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one entity per line)
    Ndjson,
    /// Single JSON document
    Json,
}

#[derive(Clone, ValueEnum)]
enum NoiseModeArg {
    /// Flip to a different label
    Different,
    /// Redraw from every label, including the clean one
    Any,
}

impl From<&NoiseModeArg> for NoiseMode {
    fn from(mode: &NoiseModeArg) -> Self {
        match mode {
            NoiseModeArg::Different => NoiseMode::DifferentLabel,
            NoiseModeArg::Any => NoiseMode::AnyLabel,
        }
    }
}

#[derive(Clone)]
enum AuditTarget {
    /// Hidden archetype ordinal code
    Archetype,
    /// Ordinal code, then each archetype's one-vs-rest indicator
    Archetypes,
    /// One archetype against the rest
    ArchetypeIndicator(Archetype),
    /// Clean label index
    Label,
    /// One clean label against the rest (e.g. dropout)
    LabelIndicator(String),
}

fn parse_audit_target(value: &str) -> Result<AuditTarget, String> {
    match value.split_once(':') {
        None => match value {
            "archetype" => Ok(AuditTarget::Archetype),
            "archetypes" => Ok(AuditTarget::Archetypes),
            "label" => Ok(AuditTarget::Label),
            other => Err(format!("unknown audit target '{other}'")),
        },
        Some(("archetype", name)) => Archetype::from_name(name)
            .map(AuditTarget::ArchetypeIndicator)
            .ok_or_else(|| format!("unknown archetype '{name}'")),
        Some(("label", name)) if !name.is_empty() => Ok(AuditTarget::LabelIndicator(name.to_string())),
        Some(_) => Err(format!("unknown audit target '{value}'")),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CohortCliError> {
    match cli.command {
        Commands::Generate {
            sim,
            output,
            format,
            summary,
        } => cmd_generate(&sim, &output, format, summary.as_deref()),

        Commands::Evaluate {
            sim,
            binary,
            candidates,
            max_candidates,
            max_duration_ms,
            cv_folds,
            output,
        } => {
            let mut config = EvaluatorConfig {
                seed: sim.seed.unwrap_or(EvaluatorConfig::default().seed),
                budget: SweepBudget {
                    max_candidates,
                    max_duration_ms,
                },
                ..EvaluatorConfig::default()
            };
            if let Some(candidates) = candidates {
                config.regularization_candidates = candidates;
            }
            if let Some(folds) = cv_folds {
                config.cv_folds = folds;
            }
            cmd_evaluate(&sim, config, binary.as_deref(), &output)
        }

        Commands::Audit { sim, target } => cmd_audit(&sim, target),

        Commands::Config { evaluator } => {
            let json = if evaluator {
                serde_json::to_string_pretty(&EvaluatorConfig::default())?
            } else {
                SimulationConfig::default().to_json()?
            };
            println!("{json}");
            Ok(())
        }
    }
}

fn cmd_generate(
    sim: &SimArgs,
    output: &Path,
    format: OutputFormat,
    summary: Option<&Path>,
) -> Result<(), CohortCliError> {
    let cohort = simulate(&sim.build()?)?;
    let encoder = CohortEncoder::new();

    let rendered = match format {
        OutputFormat::Ndjson => encoder.encode_rows_ndjson(&cohort)?,
        OutputFormat::Json => encoder.encode_json(&cohort)? + "\n",
    };
    write_output(output, &rendered)?;

    if let Some(path) = summary {
        fs::write(path, encoder.encode_summary_json(&cohort)? + "\n")?;
    }
    Ok(())
}

fn cmd_evaluate(
    sim: &SimArgs,
    config: EvaluatorConfig,
    binary: Option<&str>,
    output: &Path,
) -> Result<(), CohortCliError> {
    let cohort = simulate(&sim.build()?)?;
    let mut clean = cohort.clean_dataset()?;
    let mut noisy = cohort.noisy_dataset()?;
    if let Some(positive) = binary {
        clean = clean.binarize(positive)?;
        noisy = noisy.binarize(positive)?;
    }

    let factory = LogisticRegression::factory(&config);
    let evaluator = CrossDistributionEvaluator::new(config)?;
    let report = evaluator.evaluate(&clean, &noisy, factory)?;

    let rendered = CohortEncoder::new().encode_report_json(&report)? + "\n";
    write_output(output, &rendered)
}

fn cmd_audit(sim: &SimArgs, target: AuditTarget) -> Result<(), CohortCliError> {
    let cohort = simulate(&sim.build()?)?;
    let clean = cohort.clean_dataset()?;
    let reports: Vec<LeakageReport> = match target {
        AuditTarget::Archetype => vec![audit(&clean, "archetype_ordinal", &cohort.archetype_ordinals())?],
        AuditTarget::Archetypes => audit_archetypes(&cohort)?,
        AuditTarget::ArchetypeIndicator(archetype) => {
            let name = format!("is_{}", archetype.as_str());
            vec![audit(&clean, &name, &cohort.archetype_indicator(archetype))?]
        }
        AuditTarget::Label => vec![audit_labels(&clean)?],
        AuditTarget::LabelIndicator(positive) => vec![audit_labels(&clean.binarize(&positive)?)?],
    };
    println!("{}", CohortEncoder::new().encode_leakage_json(&reports)?);
    Ok(())
}

fn write_output(output: &Path, content: &str) -> Result<(), CohortCliError> {
    if output.to_string_lossy() == "-" {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(content.as_bytes())?;
        handle.flush()?;
    } else {
        fs::write(output, content)?;
    }
    Ok(())
}

// Error types

#[derive(Debug)]
enum CohortCliError {
    Io(io::Error),
    Sim(SimError),
    Json(serde_json::Error),
}

impl From<io::Error> for CohortCliError {
    fn from(e: io::Error) -> Self {
        CohortCliError::Io(e)
    }
}

impl From<SimError> for CohortCliError {
    fn from(e: SimError) -> Self {
        CohortCliError::Sim(e)
    }
}

impl From<serde_json::Error> for CohortCliError {
    fn from(e: serde_json::Error) -> Self {
        CohortCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CohortCliError> for CliError {
    fn from(e: CohortCliError) -> Self {
        match e {
            CohortCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CohortCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            CohortCliError::Sim(e) => {
                let (code, hint) = match &e {
                    SimError::InvalidConfig(_) | SimError::JsonError(_) => (
                        "CONFIG_ERROR",
                        "Run 'cohort config' to see a valid configuration",
                    ),
                    SimError::BudgetExhausted(_) => {
                        ("BUDGET_EXHAUSTED", "Raise --max-candidates or --max-duration-ms")
                    }
                    SimError::MissingClassSupport { .. } => (
                        "MISSING_CLASS",
                        "Increase --entities so every class can be split",
                    ),
                    _ => ("EVALUATION_ERROR", "Check dataset shapes and schemas"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
        }
    }
}
