use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ci_policy_normalizer::{
    load_scan_records, synthesize, PipelineConfig, PolicyNormalizationService, ScanLevel,
    ScanRecord,
};
use clap::{Parser, Subcommand, ValueEnum};
use log::debug;
use serde::Serialize;
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(
    name = "ci-policy",
    version,
    about = "Synthesize and normalize code integrity policies"
)]
struct Cli {
    #[arg(long, short, global = true, help = "Enable debug logging (RUST_LOG takes precedence)")]
    verbose: bool,
    #[arg(long, global = true, help = "Output machine-readable JSON")]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Turn scan records into rule records and print them as JSON
    Synthesize {
        /// JSON array of scan records
        records: PathBuf,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Add rules for scan records to a policy and normalize it
    Build {
        /// Policy XML file, rewritten in place
        policy: PathBuf,
        /// JSON array of scan records
        #[arg(long)]
        records: PathBuf,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Run every normalization sweep in order
    Normalize { policy: PathBuf },
    /// Merge duplicate signers within each scenario
    MergeSigners { policy: PathBuf },
    /// Remove duplicate, stray and unscoped FileAttrib rules
    DedupFileAttribs { policy: PathBuf },
    /// Remove orphan and duplicate Allow rules
    DedupAllowRules { policy: PathBuf },
    /// Remove FileRuleRef nodes pointing at missing rules
    PruneFileRuleRefs { policy: PathBuf },
}

#[derive(clap::Args, Debug)]
struct PipelineArgs {
    /// Most specific rule tier to generate
    #[arg(long, value_enum, env = "CI_POLICY_SCAN_LEVEL")]
    level: Option<LevelArg>,
    /// Emit hash rules for signed files instead of publisher-only rules
    #[arg(long, env = "CI_POLICY_PUBLISHER_TO_HASH")]
    publisher_to_hash: bool,
    /// JSON file holding a pipeline configuration; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LevelArg {
    Hash,
    Publisher,
    FilePublisher,
}

impl From<LevelArg> for ScanLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Hash => ScanLevel::Hash,
            LevelArg::Publisher => ScanLevel::Publisher,
            LevelArg::FilePublisher => ScanLevel::FilePublisher,
        }
    }
}

impl PipelineArgs {
    fn resolve(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load pipeline config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(level) = self.level {
            config.scan_level = level.into();
        }
        if self.publisher_to_hash {
            config.publisher_to_hash = true;
        }
        debug!(
            "resolve: scan level {}, publisher_to_hash {}",
            config.scan_level, config.publisher_to_hash
        );
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut service = PolicyNormalizationService::new();
    match cli.command {
        Commands::Synthesize { records, pipeline } => {
            let config = pipeline.resolve()?;
            let scans = read_records(&records)?;
            let bundle = synthesize(&scans, config.scan_level, config.publisher_to_hash);
            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }
        Commands::Build {
            policy,
            records,
            pipeline,
        } => {
            let config = pipeline.resolve()?;
            let scans = read_records(&records)?;
            let report = service
                .build(&policy, &scans, &config)
                .with_context(|| stage_failure("build", &policy))?;
            emit(cli.json, &report)?;
        }
        Commands::Normalize { policy } => {
            let report = service
                .normalize(&policy)
                .with_context(|| stage_failure("normalize", &policy))?;
            emit(cli.json, &report)?;
        }
        Commands::MergeSigners { policy } => {
            let summary = service
                .merge_signers(&policy)
                .with_context(|| stage_failure("merge-signers", &policy))?;
            emit(cli.json, &summary)?;
        }
        Commands::DedupFileAttribs { policy } => {
            let summary = service
                .dedup_file_attribs(&policy)
                .with_context(|| stage_failure("dedup-file-attribs", &policy))?;
            emit(cli.json, &summary)?;
        }
        Commands::DedupAllowRules { policy } => {
            let summary = service
                .dedup_allow_rules(&policy)
                .with_context(|| stage_failure("dedup-allow-rules", &policy))?;
            emit(cli.json, &summary)?;
        }
        Commands::PruneFileRuleRefs { policy } => {
            let summary = service
                .prune_file_rule_refs(&policy)
                .with_context(|| stage_failure("prune-file-rule-refs", &policy))?;
            emit(cli.json, &summary)?;
        }
    }
    Ok(())
}

fn read_records(path: &Path) -> Result<Vec<ScanRecord>> {
    load_scan_records(path)
        .with_context(|| format!("Failed to read scan records from {}", path.display()))
}

fn stage_failure(command: &str, policy: &Path) -> String {
    format!("{command} failed for {}", policy.display())
}

/// Print a stage summary as pretty JSON, or as indented `key: value` lines.
fn emit<T: Serialize>(json: bool, summary: &T) -> Result<()> {
    let value = serde_json::to_value(summary).context("Failed to serialize summary")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let mut out = String::new();
        render_text(&value, 0, &mut out);
        print!("{out}");
    }
    Ok(())
}

fn render_text(value: &Value, depth: usize, out: &mut String) {
    let Value::Object(fields) = value else {
        out.push_str(&format!("{}{value}\n", "  ".repeat(depth)));
        return;
    };
    for (key, field) in fields {
        let label = key.replace('_', " ");
        if field.is_object() {
            out.push_str(&format!("{}{label}:\n", "  ".repeat(depth)));
            render_text(field, depth + 1, out);
        } else {
            out.push_str(&format!("{}{label}: {field}\n", "  ".repeat(depth)));
        }
    }
}
