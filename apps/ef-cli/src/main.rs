use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::info;

use ef_app::{AppResult, ExportFormat, RunKind, RunResponse};

#[derive(Parser)]
#[command(name = "ef-cli")]
#[command(about = "Envelope-follow CLI - run oscillator scenarios directly or by envelope following", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate scenario file syntax and values
    Validate {
        /// Path to the scenario file (YAML or JSON)
        scenario_path: PathBuf,
    },
    /// Run a scenario and export its trajectory
    Run {
        /// Path to the scenario file (YAML or JSON)
        scenario_path: PathBuf,
        /// Output file path (optional, defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Csv)]
        format: Format,
        /// Write the fine reconstruction windows of an envelope run as CSV
        /// files next to the output
        #[arg(long, requires = "output")]
        windows: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Csv,
    Json,
}

impl From<Format> for ExportFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Csv => ExportFormat::Csv,
            Format::Json => ExportFormat::Json,
        }
    }
}

fn main() -> AppResult<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { scenario_path } => cmd_validate(&scenario_path),
        Commands::Run {
            scenario_path,
            output,
            format,
            windows,
        } => cmd_run(&scenario_path, output.as_deref(), format.into(), windows),
    }
}

fn cmd_validate(scenario_path: &Path) -> AppResult<()> {
    println!("Validating scenario: {}", scenario_path.display());
    let scenario = ef_app::load_scenario(scenario_path)?;
    let summary = ef_app::summarize(&scenario);
    println!("✓ Scenario is valid");
    println!(
        "  {} - {} (dimension {}), {} run on [{}, {}]",
        summary.name, summary.system, summary.dimension, summary.run, summary.t_start, summary.t_end
    );
    Ok(())
}

fn cmd_run(
    scenario_path: &Path,
    output: Option<&Path>,
    format: ExportFormat,
    windows: bool,
) -> AppResult<()> {
    info!(path = %scenario_path.display(), "running scenario");
    let response = ef_app::run_file(scenario_path)?;
    let rendered = ef_app::render(&response, format)?;

    // Write to file or stdout
    if let Some(path) = output {
        ef_app::write_output(path, &rendered)?;
        print_summary(&response);
        println!(
            "✓ Exported {} samples to {}",
            response.bundle.t().len(),
            path.display()
        );
        if windows {
            write_windows(&response, path)?;
        }
    } else {
        print!("{}", rendered);
    }

    if let Some(reason) = response.failure_reason() {
        eprintln!("✗ Run stopped early: {}", reason);
    }
    Ok(())
}

fn print_summary(response: &RunResponse) {
    let stats = &response.bundle.stats;
    println!("Scenario: {}", response.name);
    println!(
        "  Steps: {} accepted, {} rejected",
        stats.steps, stats.rejected_steps
    );
    println!("  RHS evaluations: {}", stats.rhs_evals);
    if response.kind == RunKind::Envelope {
        println!("  Period evaluations: {}", stats.period_evaluations);
        if stats.period_estimates > 0 {
            println!("  Period estimates: {}", stats.period_estimates);
        }
        if let Some(trace) = &response.bundle.envelope {
            println!(
                "  Period: {}, macro samples: {}, fallbacks: {}",
                trace.period,
                trace.t.len(),
                trace.fallback_steps
            );
            if let (Some(first), Some(last)) = (trace.periods.first(), trace.periods.last()) {
                if first != last {
                    println!("  Period drift: {} -> {}", first, last);
                }
            }
        }
    }
    println!("  Solve time: {:.3} s", response.timing.solve_time_s);
}

fn write_windows(response: &RunResponse, output: &Path) -> AppResult<()> {
    let Some(trace) = &response.bundle.envelope else {
        println!("  No envelope windows: not an envelope run");
        return Ok(());
    };
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("run")
        .to_string();
    for (i, window) in trace.fine.iter().enumerate() {
        let path = output.with_file_name(format!("{stem}_window{i:04}.csv"));
        ef_app::write_output(&path, &ef_app::trajectory_csv(window))?;
    }
    println!("✓ Wrote {} reconstruction windows", trace.fine.len());
    Ok(())
}
