//! rx misID CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rx_core::{ChargeHypothesis, Hadron, SignalMode};
use rx_frame::parquet_io::{read_table_parquet, write_table_parquet};
use rx_frame::source::DEFAULT_TEMPLATE;
use rx_frame::{CacheStore, ParquetCache, ParquetSource, TableSource};
use rx_misid::{MisidConfig, PdfMaker, SampleSplitter, YieldSummary};

#[derive(Parser)]
#[command(name = "rx-misid")]
#[command(about = "Data-driven misID background templates")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split one input table into tagging regions for a hadron and charge
    Split {
        /// YAML configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Directory holding the input Parquet files
        #[arg(long)]
        input_dir: PathBuf,

        /// Input file-name template
        #[arg(long, default_value = DEFAULT_TEMPLATE)]
        template: String,

        /// Hadron species (kaon, pion)
        #[arg(long)]
        hadron: Hadron,

        /// Charge hypothesis (plus, minus)
        #[arg(long)]
        charge: ChargeHypothesis,

        /// Output Parquet file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Build the misID density template and write a JSON report
    Pdf {
        /// YAML configuration (must contain a `density` section)
        #[arg(short, long)]
        config: PathBuf,

        /// Sample name; overrides `input.sample`
        #[arg(long)]
        sample: String,

        /// Trigger line; overrides `input.trigger`
        #[arg(long)]
        trigger: String,

        /// q2 bin; overrides `input.q2bin`
        #[arg(long, default_value = "central")]
        q2bin: String,

        /// PID region to extrapolate to
        #[arg(long, value_enum, default_value_t = ModeArg::Signal)]
        mode: ModeArg,

        /// Directory holding the input Parquet files
        #[arg(long)]
        input_dir: PathBuf,

        /// Input file-name template
        #[arg(long, default_value = DEFAULT_TEMPLATE)]
        template: String,

        /// Directory for cached split tables
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Number of grid points in the report
        #[arg(long, default_value = "100")]
        points: usize,

        /// Output file for the report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print per-kind, per-hadron and per-charge yields of a Parquet table
    Summary {
        /// Split or combined Parquet file
        #[arg(short, long)]
        input: PathBuf,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Signal,
    Control,
}

impl From<ModeArg> for SignalMode {
    fn from(m: ModeArg) -> Self {
        SignalMode::from_signal(matches!(m, ModeArg::Signal))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Split { config, input_dir, template, hadron, charge, output } => {
            cmd_split(&config, &input_dir, &template, hadron, charge, &output)
        }
        Commands::Pdf {
            config,
            sample,
            trigger,
            q2bin,
            mode,
            input_dir,
            template,
            cache_dir,
            points,
            output,
        } => cmd_pdf(
            &config,
            &sample,
            &trigger,
            &q2bin,
            mode.into(),
            &input_dir,
            &template,
            cache_dir.as_deref(),
            points,
            output.as_ref(),
        ),
        Commands::Summary { input, json } => cmd_summary(&input, json),
    }
}

fn load_config(path: &Path) -> Result<MisidConfig> {
    let cfg = MisidConfig::load(path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    tracing::info!(sample = %cfg.input.sample, trigger = %cfg.input.trigger, "config loaded");
    Ok(cfg)
}

fn cmd_split(
    config: &Path,
    input_dir: &Path,
    template: &str,
    hadron: Hadron,
    charge: ChargeHypothesis,
    output: &Path,
) -> Result<()> {
    let cfg = Arc::new(load_config(config)?);
    let source = ParquetSource::new(input_dir).with_template(template);
    let splitter = SampleSplitter::new(cfg, hadron, charge)?;

    let table = splitter
        .get_samples(&source)
        .with_context(|| format!("splitting {} failed", splitter.sample()))?;
    write_table_parquet(&table, output)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("{}", YieldSummary::from_table(&table)?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_pdf(
    config: &Path,
    sample: &str,
    trigger: &str,
    q2bin: &str,
    mode: SignalMode,
    input_dir: &Path,
    template: &str,
    cache_dir: Option<&Path>,
    points: usize,
    output: Option<&PathBuf>,
) -> Result<()> {
    if points < 2 {
        anyhow::bail!("points must be >= 2");
    }
    let cfg = load_config(config)?;
    let source: Arc<dyn TableSource> =
        Arc::new(ParquetSource::new(input_dir).with_template(template));
    let mut maker = PdfMaker::new(&cfg, sample, trigger, q2bin, source)?;
    if let Some(dir) = cache_dir {
        let cache: Arc<dyn CacheStore> = Arc::new(ParquetCache::new(dir));
        maker = maker.with_cache(cache);
    }

    let data = maker.get_data(mode).context("misID sample failed")?;
    let (model, weighted) = maker.estimate(&data).context("density estimation failed")?;

    let (low, high) = model.support();
    let step = (high - low) / (points - 1) as f64;
    let xs: Vec<f64> = (0..points).map(|i| low + step * i as f64).collect();
    let ys = model.evaluate_many(&xs);
    let summary = serde_json::to_value(YieldSummary::from_table(&data)?)?;

    let report = serde_json::json!({
        "sample": sample,
        "trigger": trigger,
        "q2bin": q2bin,
        "mode": mode,
        "observable": weighted.observable(),
        "bounds": [low, high],
        "extended": model.is_extended(),
        "bandwidth": model.bandwidth(),
        "entries": weighted.len(),
        "effective_entries": weighted.effective_size(),
        "total_yield": model.total_yield(),
        "integral": model.integral(low, high),
        "summary": summary,
        "grid": { "x": xs, "density": ys },
    });
    write_json(output, report)
}

fn cmd_summary(input: &Path, json: bool) -> Result<()> {
    let table = read_table_parquet(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let summary = YieldSummary::from_table(&table)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{summary}");
    }
    Ok(())
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
