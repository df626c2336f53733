//! Churn Insights — segments streaming-service user records and prints the
//! standing churn analyses.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::sync::Arc;

use anyhow::Context;
use churn_core::config::AppConfig;
use churn_core::RecordSet;
use churn_reporting::{Aggregator, AnalysisCatalog, AnalysisDefinition, ResultTable};
use churn_segmentation::{BucketRule, Bucketizer};
use clap::{Parser, ValueEnum};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "churn-insights")]
#[command(about = "Segment user records and report churn correlations")]
#[command(version)]
struct Cli {
    /// User records as a JSON array or JSON Lines; `-` reads stdin
    #[arg(long, short)]
    input: Option<String>,

    /// Analysis to run (repeatable); runs the whole catalog when omitted
    #[arg(long = "analysis", short = 'a')]
    analyses: Vec<String>,

    /// Output format (overrides config)
    #[arg(long, value_enum, env = "CHURN_INSIGHTS__OUTPUT__FORMAT")]
    format: Option<OutputFormat>,

    /// TOML config file
    #[arg(long, env = "CHURN_INSIGHTS_CONFIG")]
    config: Option<String>,

    /// JSON file with extra bucket rules and analysis definitions
    #[arg(long)]
    definitions: Option<String>,

    /// Skip record validation
    #[arg(long, default_value_t = false)]
    no_validate: bool,

    /// List the available analyses and exit
    #[arg(long, default_value_t = false)]
    list: bool,

    /// Print aggregation counters in Prometheus text format to stderr
    #[arg(long, default_value_t = false)]
    metrics: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Csv,
    Json,
}

#[derive(Debug, Default, Deserialize)]
struct ExtraDefinitions {
    #[serde(default)]
    rules: Vec<BucketRule>,
    #[serde(default)]
    analyses: Vec<AnalysisDefinition>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "churn_insights=info,churn_reporting=info".into()),
        )
        .with_writer(io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let metrics = install_metrics(cli.metrics)?;

    let config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    let format = match cli.format {
        Some(format) => format,
        None => OutputFormat::from_str(&config.output.format, true).unwrap_or_else(|_| {
            warn!(format = %config.output.format, "Unknown output format, using table");
            OutputFormat::Table
        }),
    };

    let bucketizer = Arc::new(Bucketizer::with_standard_rules());
    let catalog = AnalysisCatalog::standard();

    if let Some(path) = &cli.definitions {
        let file = File::open(path).with_context(|| format!("opening definitions {path}"))?;
        let extra: ExtraDefinitions = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing definitions {path}"))?;
        for rule in extra.rules {
            bucketizer.register_rule(rule)?;
        }
        for def in extra.analyses {
            catalog.register(def);
        }
    }

    if cli.list {
        let mut out = io::stdout().lock();
        for def in catalog.list() {
            writeln!(out, "{:<28} {}", def.name, def.description)?;
        }
        return Ok(());
    }

    let input = cli
        .input
        .as_deref()
        .context("--input is required unless --list is given")?;
    let reader: Box<dyn Read> = if input == "-" {
        Box::new(io::stdin().lock())
    } else {
        Box::new(BufReader::new(
            File::open(input).with_context(|| format!("opening records {input}"))?,
        ))
    };

    let validate = config.input.validate && !cli.no_validate;
    let records = RecordSet::from_reader(reader, validate)
        .with_context(|| format!("loading records from {input}"))?;
    if !config.input.allow_empty {
        records.require_non_empty()?;
    }

    info!(
        records = records.len(),
        parallel_threshold = config.analysis.parallel_threshold,
        shard_size = config.analysis.shard_size,
        "Configuration loaded"
    );

    let aggregator = Aggregator::with_config(bucketizer, &config.analysis);
    let tables = if cli.analyses.is_empty() {
        catalog.run_all(&aggregator, records.records())?
    } else {
        catalog.run_many(&cli.analyses, &aggregator, records.records())?
    };

    let rendered = render(&tables, format)?;
    io::stdout().lock().write_all(rendered.as_bytes())?;

    if let Some(handle) = metrics {
        io::stderr().lock().write_all(handle.render().as_bytes())?;
    }
    Ok(())
}

fn install_metrics(enabled: bool) -> anyhow::Result<Option<PrometheusHandle>> {
    if !enabled {
        return Ok(None);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")?;
    info!("Metrics recorder installed");
    Ok(Some(handle))
}

fn render(tables: &[ResultTable], format: OutputFormat) -> anyhow::Result<String> {
    let rendered = match format {
        OutputFormat::Table => tables
            .iter()
            .map(ResultTable::render_text)
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Csv => tables
            .iter()
            .map(|t| format!("# {}\n{}", t.analysis, t.to_csv()))
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Json => {
            let doc: Vec<serde_json::Value> = tables
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "analysis": t.analysis,
                        "rows": t.to_json_value(),
                    })
                })
                .collect();
            let mut json = serde_json::to_string_pretty(&doc)?;
            json.push('\n');
            json
        }
    };
    Ok(rendered)
}
