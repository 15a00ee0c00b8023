use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Once;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use sendcache_core::{ChainReport, DispatchConfig};

mod scenario;
#[cfg(test)]
mod main_test;

use scenario::{RunReport, Scenario};

static TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "sendcache=warn";

#[derive(Debug, Parser)]
#[command(name = "sendcache", author, version, about = "Run dispatch scenarios through inline-cached call sites", long_about = None)]
struct CliArgs {
    #[command(subcommand)]
    command: Commands,

    /// Tracing filter, e.g. `sendcache::dispatch=debug` (overrides RUST_LOG)
    #[arg(long, global = true, value_name = "FILTER")]
    trace: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute a scenario and print each step and the final chains.
    Run {
        #[arg(value_name = "SCENARIO")]
        file: PathBuf,
        /// Dispatch config TOML (`maxChainLength`, `allowCloning`)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        #[arg(long, value_name = "N")]
        max_chain_length: Option<usize>,
        /// Emit one JSON document instead of text
        #[arg(long)]
        json: bool,
    },
    /// Validate a scenario without running it.
    Check {
        #[arg(value_name = "SCENARIO")]
        file: PathBuf,
    },
}

fn init_tracing(filter: Option<&str>) {
    TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = filter.map(str::to_string).or_else(|| std::env::var("RUST_LOG").ok());
        let builder = fmt().with_writer(io::stderr);
        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };
        let _ = builder.try_init();
    });
}

/// Defaults, then the scenario's `[config]`, then `--config`, then `--max-chain-length`.
fn resolve_config(
    scenario: &Scenario,
    config_path: Option<&PathBuf>,
    max_chain_length: Option<usize>,
) -> anyhow::Result<DispatchConfig> {
    let mut config = match config_path {
        Some(path) => DispatchConfig::load(path)?,
        None => scenario.config.clone().unwrap_or_default(),
    };
    if let Some(max) = max_chain_length {
        config = config.with_max_chain_length(max);
    }
    Ok(config)
}

fn render_text(report: &RunReport, out: &mut impl Write) -> io::Result<()> {
    for step in &report.steps {
        write!(out, "[{}] {} -> {}", step.index, step.description, step.result)?;
        match (&step.expected, step.matched) {
            (Some(expected), Some(false)) => writeln!(out, "  (expected {expected})")?,
            _ => writeln!(out)?,
        }
    }
    for site in &report.sites {
        writeln!(out)?;
        render_site(site, out)?;
    }
    Ok(())
}

fn render_site(site: &ChainReport, out: &mut impl Write) -> io::Result<()> {
    let state = serde_json::to_value(site.state)
        .ok()
        .and_then(|state| state.as_str().map(str::to_string))
        .unwrap_or_default();
    writeln!(
        out,
        "site {} [{}] installed {}/{}",
        site.name, state, site.installed, site.max_chain_length
    )?;
    for node in &site.nodes {
        writeln!(out, "  {} {}", node.kind, node.method)?;
        for branch in &node.branches {
            let target = match (&branch.target, branch.cached) {
                (Some(target), _) => target.clone(),
                (None, true) => "(probe)".to_string(),
                (None, false) => "(open)".to_string(),
            };
            let mut flags = Vec::new();
            if branch.cached && !branch.valid {
                flags.push("invalid");
            }
            if branch.cloned {
                flags.push("cloned");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            writeln!(out, "    {} -> {}{} entered {}", branch.shape, target, flags, branch.entered)?;
        }
    }
    let stats = &site.stats;
    writeln!(
        out,
        "  hits {} misses {} repairs {} installs {} merges {} megamorphic {}",
        stats.hits, stats.misses, stats.repairs, stats.installs, stats.merges, stats.megamorphic_lookups
    )
}

fn main() -> anyhow::Result<()> {
    let CliArgs { command, trace } = CliArgs::parse();
    init_tracing(trace.as_deref());

    match command {
        Commands::Run {
            file,
            config,
            max_chain_length,
            json,
        } => {
            let scenario = Scenario::load(&file)?;
            let config = resolve_config(&scenario, config.as_ref(), max_chain_length)?;
            let report = scenario
                .run(&config)
                .with_context(|| format!("failed to run {}", file.display()))?;

            let stdout = io::stdout();
            let mut out = stdout.lock();
            if json {
                serde_json::to_writer_pretty(&mut out, &report)?;
                writeln!(out)?;
            } else {
                render_text(&report, &mut out)?;
            }
            out.flush()?;

            let mismatches = report.mismatches();
            if mismatches > 0 {
                bail!("{mismatches} step(s) did not match their expectation");
            }
        }
        Commands::Check { file } => {
            let scenario = Scenario::load(&file)?;
            let summary = scenario.check().with_context(|| format!("invalid scenario {}", file.display()))?;
            println!(
                "ok: {} classes, {} methods, {} sites, {} steps",
                summary.classes, summary.methods, summary.sites, summary.steps
            );
        }
    }
    Ok(())
}
