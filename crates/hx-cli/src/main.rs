mod trace;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};

use hx_compile::{CodecError, codec, compile, parse_ruleset};
use hx_config::EngineConfig;
use hx_engine::{Engine, Event};

#[derive(Parser)]
#[command(name = "helios", about = "Helios rule engine")]
struct Cli {
    /// Path to a helios.toml config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a JSON ruleset into a binary model.
    Compile {
        rules: PathBuf,
        out: PathBuf,
    },
    /// Evaluate events against a compiled model, streaming JSON results.
    Evaluate {
        model: PathBuf,
        events: PathBuf,
    },
    /// Measure evaluation throughput and latency percentiles.
    Bench {
        model: PathBuf,
        events: PathBuf,
        /// Passes over the event set after warm-up.
        #[arg(long, default_value_t = 10)]
        iterations: u32,
    },
    /// Summarize a compiled model.
    Inspect {
        model: PathBuf,
    },
}

/// CLI failure with its exit code: 2 for validation errors, 3 for I/O.
enum Failure {
    Validation(anyhow::Error),
    Io(anyhow::Error),
}

impl Failure {
    fn code(&self) -> u8 {
        match self {
            Failure::Validation(_) => 2,
            Failure::Io(_) => 3,
        }
    }

    fn error(&self) -> &anyhow::Error {
        match self {
            Failure::Validation(e) | Failure::Io(e) => e,
        }
    }
}

fn validation(e: impl Into<anyhow::Error>) -> Failure {
    Failure::Validation(e.into())
}

fn io_failure(e: impl Into<anyhow::Error>) -> Failure {
    Failure::Io(e.into())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("helios: {e:#}");
                return ExitCode::from(2);
            }
        },
        None => EngineConfig::default(),
    };

    let _guard = match trace::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("helios: logging init failed: {e:#}");
            return ExitCode::from(2);
        }
    };

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            eprintln!("helios: {:#}", failure.error());
            ExitCode::from(failure.code())
        }
    }
}

fn run(command: Commands, config: &EngineConfig) -> Result<(), Failure> {
    match command {
        Commands::Compile { rules, out } => cmd_compile(&rules, &out, config),
        Commands::Evaluate { model, events } => cmd_evaluate(&model, &events, config),
        Commands::Bench {
            model,
            events,
            iterations,
        } => cmd_bench(&model, &events, iterations, config),
        Commands::Inspect { model } => cmd_inspect(&model),
    }
}

// ---------------------------------------------------------------------------
// compile
// ---------------------------------------------------------------------------

fn cmd_compile(rules_path: &Path, out: &Path, config: &EngineConfig) -> Result<(), Failure> {
    let text = std::fs::read_to_string(rules_path)
        .map_err(|e| io_failure(anyhow::anyhow!("read {}: {e}", rules_path.display())))?;
    let rules = parse_ruleset(&text).map_err(validation)?;
    let model = compile(&rules, config).map_err(validation)?;
    codec::save(&model, out).map_err(io_failure)?;

    let stats = &model.stats;
    println!(
        "compiled {} rules → {} combinations, {} predicates, {} base sets ({}% reduction)",
        stats.rules_total,
        stats.combinations,
        stats.predicates,
        stats.base_sets,
        (model.base_reduction() * 100.0).round(),
    );
    if stats.contradictions_dropped > 0 {
        println!("dropped {} contradictory combinations", stats.contradictions_dropped);
    }
    for code in &stats.dead_rules {
        println!("warning: rule {code:?} is dead (all combinations contradictory)");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// evaluate
// ---------------------------------------------------------------------------

fn cmd_evaluate(model_path: &Path, events_path: &Path, config: &EngineConfig) -> Result<(), Failure> {
    let engine = load_engine(model_path, config)?;
    let events = load_events(events_path)?;
    tracing::info!(
        events = events.len(),
        combinations = engine.model().num_combinations(),
        "evaluating"
    );

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    for event in &events {
        let result = engine.evaluate(event).map_err(|e| validation(anyhow::anyhow!("{e}")))?;
        let line = serde_json::to_string(&result).map_err(io_failure)?;
        writeln!(out, "{line}").map_err(io_failure)?;
    }
    out.flush().map_err(io_failure)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// bench
// ---------------------------------------------------------------------------

fn cmd_bench(
    model_path: &Path,
    events_path: &Path,
    iterations: u32,
    config: &EngineConfig,
) -> Result<(), Failure> {
    let engine = load_engine(model_path, config)?;
    let events = load_events(events_path)?;
    if events.is_empty() {
        return Err(validation(anyhow::anyhow!("event file contains no events")));
    }

    // Warm-up: populate caches and size per-thread contexts.
    for event in &events {
        engine.evaluate(event).map_err(|e| validation(anyhow::anyhow!("{e}")))?;
    }

    let mut latencies: Vec<u64> = Vec::with_capacity(events.len() * iterations as usize);
    let started = Instant::now();
    for _ in 0..iterations {
        for event in &events {
            let result = engine.evaluate(event).map_err(|e| validation(anyhow::anyhow!("{e}")))?;
            latencies.push(result.evaluation_time_nanos);
        }
    }
    let elapsed = started.elapsed();

    latencies.sort_unstable();
    let total = latencies.len() as u64;
    let throughput = total as f64 / elapsed.as_secs_f64();
    println!("events evaluated : {total}");
    println!("wall time        : {:.3}s", elapsed.as_secs_f64());
    println!("throughput       : {throughput:.0} events/s");
    println!("latency p50      : {}ns", percentile(&latencies, 0.50));
    println!("latency p90      : {}ns", percentile(&latencies, 0.90));
    println!("latency p99      : {}ns", percentile(&latencies, 0.99));
    println!("latency max      : {}ns", latencies.last().copied().unwrap_or(0));

    let snapshot = engine.metrics_snapshot();
    println!("cache hit rate   : {:.1}%", snapshot.cache.hit_rate() * 100.0);
    let metrics_json = serde_json::to_string_pretty(&snapshot).map_err(io_failure)?;
    println!("{metrics_json}");
    Ok(())
}

fn percentile(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

// ---------------------------------------------------------------------------
// inspect
// ---------------------------------------------------------------------------

fn cmd_inspect(model_path: &Path) -> Result<(), Failure> {
    let model = load_model(model_path)?;

    println!("selection strategy : {}", model.selection.as_str());
    println!("fields             : {}", model.fields.len());
    println!("values             : {}", model.values.len());
    println!("predicates         : {}", model.predicates.len());
    println!("combinations       : {}", model.num_combinations());
    println!("base sets          : {}", model.base_sets.len());
    println!("base reduction     : {:.0}%", model.base_reduction() * 100.0);
    if !model.dynamic_fields.is_empty() {
        println!("dynamic fields     : {}", model.dynamic_fields.join(", "));
    }

    let mut by_field: Vec<(&str, usize)> = model
        .field_predicates
        .iter()
        .filter_map(|(field, pids)| model.fields.decode(*field).map(|name| (name, pids.len())))
        .collect();
    by_field.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    println!("top fields by predicate count:");
    for (name, count) in by_field.iter().take(5) {
        println!("  {name:<24} {count}");
    }

    let mut by_rule: Vec<(&str, u64)> = model
        .combos_by_code
        .iter()
        .map(|(code, combos)| (code.as_str(), combos.len()))
        .collect();
    by_rule.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    println!("top rules by combination count:");
    for (code, count) in by_rule.iter().take(5) {
        println!("  {code:<24} {count}");
    }

    let stats_json = serde_json::to_string_pretty(&model.stats).map_err(io_failure)?;
    println!("{stats_json}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared loading
// ---------------------------------------------------------------------------

fn load_model(path: &Path) -> Result<hx_compile::EngineModel, Failure> {
    codec::load(path).map_err(|e| match e {
        CodecError::Io(_) => io_failure(e),
        _ => validation(e),
    })
}

fn load_engine(model_path: &Path, config: &EngineConfig) -> Result<Engine, Failure> {
    let model = Arc::new(load_model(model_path)?);
    Engine::new(model, config).map_err(|e| validation(anyhow::anyhow!("{e}")))
}

/// Events arrive as a JSON array or as one JSON object per line.
fn load_events(path: &Path) -> Result<Vec<Event>, Failure> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| io_failure(anyhow::anyhow!("read {}: {e}", path.display())))?;
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        serde_json::from_str(&text).map_err(validation)
    } else {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_str(line).map_err(validation))
            .collect()
    }
}
