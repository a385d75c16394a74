use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use remage_bench::{
    build_report, collect_results, load_results, print_table, save_json, store, Config,
    JobSubmitter, SimulationRunner,
};

#[derive(Parser)]
#[command(
    name = "remage-bench",
    version = "0.2.0",
    about = "Runtime benchmarks for the remage simulation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full m_step sweep locally
    Run {
        config: PathBuf,
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Run a single m_step level (used by SLURM jobs)
    RunLevel {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        level: u32,
        #[arg(long)]
        output_dir: PathBuf,
    },
    /// Submit one SLURM job per m_step
    Submit {
        config: PathBuf,
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
    },
    /// Show queue state for submitted jobs
    Status {
        config: PathBuf,
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
    },
    /// Cancel submitted jobs
    Cancel {
        config: PathBuf,
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
    },
    /// Combine per-level result files into an overall results file
    Collect {
        config: PathBuf,
        #[arg(long)]
        results_dir: Option<PathBuf>,
        #[arg(long)]
        output_file: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    /// Print a scaling report from result files
    Report {
        results: PathBuf,
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Write a default configuration file
    InitConfig {
        #[arg(long, short, default_value = "config.json")]
        output: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config, output_dir } => cmd_run(&config, &output_dir),
        Commands::RunLevel {
            config,
            level,
            output_dir,
        } => cmd_run_level(&config, level, &output_dir),
        Commands::Submit { config, base_dir } => cmd_submit(&config, &base_dir),
        Commands::Status { config, base_dir } => cmd_status(&config, &base_dir),
        Commands::Cancel { config, base_dir } => cmd_cancel(&config, &base_dir),
        Commands::Collect {
            config,
            results_dir,
            output_file,
            force,
        } => cmd_collect(&config, results_dir, output_file, force),
        Commands::Report { results, json } => cmd_report(&results, json),
        Commands::InitConfig { output, force } => cmd_init_config(&output, force),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn cmd_run(config_path: &Path, output_dir: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let project_dir = output_dir.join(&config.project_name);
    let runner = SimulationRunner::new(config.clone());
    let overall = runner.run_sweep(&project_dir)?;

    let overall_path = project_dir.join(format!("{}_overall_results.json", config.project_name));
    store::atomic_write_json_pretty(&overall_path, &overall)?;
    println!(
        "completed {} of {} m_steps",
        overall.len(),
        config.simulation.m_steps.len()
    );
    println!("all results saved to {}", overall_path.display());
    Ok(())
}

fn cmd_run_level(config_path: &Path, level: u32, output_dir: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let runner = SimulationRunner::new(config);
    match runner.run_level(level, output_dir)? {
        Some(_) => {
            println!("successfully completed tests for m_step {}", level);
            Ok(())
        }
        None => {
            println!("failed to complete tests for m_step {}", level);
            std::process::exit(1);
        }
    }
}

fn cmd_submit(config_path: &Path, base_dir: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    // Jobs cd into base_dir before they read the config, so hand them an
    // absolute path.
    let config_abs = std::fs::canonicalize(config_path)
        .unwrap_or_else(|_| config_path.to_path_buf());
    let submitter = JobSubmitter::new(config.clone(), base_dir, &config_abs);
    let outcome = submitter.submit_all()?;

    for (job_name, script) in &outcome.dry_run_scripts {
        println!("--- SLURM script for {} ---", job_name);
        println!("{}", script);
        println!("--- end of script ---");
        println!();
    }
    if config.test.dry_run {
        println!("dry run summary:");
        println!("would submit: {} jobs", outcome.dry_run_scripts.len());
        println!("would skip: {} jobs", outcome.skipped.len());
    } else if outcome.submitted.is_empty() {
        println!("no jobs were submitted");
    } else {
        println!("submitted {} jobs", outcome.submitted.len());
        println!("skipped {} jobs (already completed)", outcome.skipped.len());
        println!(
            "job information saved to {}",
            submitter.registry_path().display()
        );
        println!();
        println!("to monitor jobs: squeue -u $USER");
        println!("to cancel all jobs: scancel -u $USER");
    }
    Ok(())
}

fn cmd_status(config_path: &Path, base_dir: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let submitter = JobSubmitter::new(config, base_dir, config_path);
    if !submitter.registry_path().exists() {
        bail!(
            "no submitted jobs found at {}",
            submitter.registry_path().display()
        );
    }
    let registry = submitter.load_registry()?;
    if registry.is_empty() {
        println!("no jobs in registry");
        return Ok(());
    }
    let job_ids: Vec<String> = registry.values().map(|j| j.job_id.clone()).collect();
    let statuses = submitter.check_status(&job_ids);
    for (job_name, job) in &registry {
        match statuses.get(&job.job_id) {
            Some(state) => println!("{} (job {}): {}", job_name, job.job_id, state),
            None => println!("{} (job {}): not in queue", job_name, job.job_id),
        }
    }
    Ok(())
}

fn cmd_cancel(config_path: &Path, base_dir: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let submitter = JobSubmitter::new(config, base_dir, config_path);
    if !submitter.registry_path().exists() {
        bail!(
            "no submitted jobs found at {}",
            submitter.registry_path().display()
        );
    }
    let registry = submitter.load_registry()?;
    if registry.is_empty() {
        println!("no jobs to cancel");
        return Ok(());
    }
    let job_ids: Vec<String> = registry.values().map(|j| j.job_id.clone()).collect();
    if submitter.cancel(&job_ids)? {
        println!("cancelled {} jobs", job_ids.len());
        Ok(())
    } else {
        bail!("scancel reported an error");
    }
}

fn cmd_collect(
    config_path: &Path,
    results_dir: Option<PathBuf>,
    output_file: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let config = Config::load(config_path)?;
    let results_dir = results_dir
        .unwrap_or_else(|| PathBuf::from("results").join(&config.project_name));
    if !results_dir.exists() {
        bail!("results directory not found: {}", results_dir.display());
    }
    let output_file = output_file.unwrap_or_else(|| {
        results_dir.join(format!("{}_overall_results.json", config.project_name))
    });
    if output_file.exists() && !force {
        bail!(
            "output file already exists: {} (use --force to overwrite)",
            output_file.display()
        );
    }

    let outcome = collect_results(&config, &results_dir);
    if !outcome.missing.is_empty() {
        println!("warning: {} result files are missing:", outcome.missing.len());
        for missing in &outcome.missing {
            println!("  - {}", missing.display());
        }
    }
    if outcome.collected.is_empty() {
        bail!("no valid result files found");
    }
    store::atomic_write_json_pretty(&output_file, &outcome.collected)?;
    println!("combined results saved to {}", output_file.display());
    println!("collected {} m_step results", outcome.collected.len());
    Ok(())
}

fn cmd_report(results_path: &Path, json: Option<PathBuf>) -> Result<()> {
    let results = load_results(results_path)?;
    let report = build_report(results)?;
    print_table(&report);
    if let Some(json_path) = json {
        save_json(&report, &json_path)?;
        println!();
        println!("report saved to {}", json_path.display());
    }
    Ok(())
}

fn cmd_init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "config file already exists: {} (use --force to overwrite)",
            output.display()
        );
    }
    let config = Config::default_config();
    config.save(output)?;
    println!("created configuration file: {}", output.display());
    println!("edit the simulation section, then run:");
    println!("  remage-bench run {}", output.display());
    Ok(())
}
