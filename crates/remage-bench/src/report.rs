use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::store::{atomic_write_json_pretty, load_aggregate, AggregateResult};

#[derive(Debug, Clone, Serialize)]
pub struct ScalingRow {
    pub m_step: u32,
    pub runtime_s: f64,
    pub runtime_std: f64,
    pub speedup: f64,
    pub speedup_err: f64,
    pub event_rate: Option<f64>,
    pub efficiency_pct: Option<f64>,
    pub n_prims: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScalingReport {
    pub template: String,
    pub execution_mode: String,
    pub baseline_m_step: u32,
    pub rows: Vec<ScalingRow>,
}

// Accepts a single level file, an overall results file, or a directory that
// is scanned recursively for level files.
pub fn load_results(path: &Path) -> Result<Vec<AggregateResult>> {
    if path.is_dir() {
        let mut results = Vec::new();
        for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !is_level_results_name(&name) {
                continue;
            }
            match load_aggregate(entry.path()) {
                Ok(result) => results.push(result),
                Err(err) => warn!("skipping {}: {:#}", entry.path().display(), err),
            }
        }
        if results.is_empty() {
            bail!("no result files found under {}", path.display());
        }
        return Ok(results);
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read results {}", path.display()))?;
    if let Ok(single) = serde_json::from_str::<AggregateResult>(&text) {
        return Ok(vec![single]);
    }
    let overall: BTreeMap<String, AggregateResult> = serde_json::from_str(&text)
        .with_context(|| format!("parse results {}", path.display()))?;
    if overall.is_empty() {
        bail!("no results in {}", path.display());
    }
    Ok(overall.into_values().collect())
}

fn is_level_results_name(name: &str) -> bool {
    if name.ends_with("_overall_results.json") {
        return false;
    }
    let base = match name.strip_suffix("_results.json") {
        Some(base) => base,
        None => return false,
    };
    match base.rfind("_m") {
        Some(at) => {
            let digits = &base[at + 2..];
            !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

pub fn build_report(mut results: Vec<AggregateResult>) -> Result<ScalingReport> {
    if results.is_empty() {
        bail!("no results to report on");
    }
    results.sort_by_key(|r| r.m_step);
    let baseline = &results[0];
    let base_runtime = baseline.runtime.val;
    let base_rate = baseline.event_rate.val;
    let template = baseline.template.clone();
    let execution_mode = baseline
        .config
        .simulation
        .execution_mode
        .as_str()
        .to_string();
    let baseline_m_step = baseline.m_step;

    let mut rows = Vec::with_capacity(results.len());
    for result in &results {
        let runtime = result.runtime.val;
        let speedup = if runtime > 0.0 {
            base_runtime / runtime
        } else {
            0.0
        };
        let speedup_err = if runtime > 0.0 {
            speedup * (result.runtime.std / runtime)
        } else {
            0.0
        };
        let efficiency_pct = match (base_rate, result.event_rate.val) {
            (Some(base), Some(rate)) if base > 0.0 && result.m_step > 0 => {
                Some(rate / (base * result.m_step as f64) * 100.0)
            }
            _ => None,
        };
        rows.push(ScalingRow {
            m_step: result.m_step,
            runtime_s: runtime,
            runtime_std: result.runtime.std,
            speedup,
            speedup_err,
            event_rate: result.event_rate.val,
            efficiency_pct,
            n_prims: result.n_prims,
        });
    }
    Ok(ScalingReport {
        template,
        execution_mode,
        baseline_m_step,
        rows,
    })
}

pub fn print_table(report: &ScalingReport) {
    println!("scaling report for {}", report.template);
    println!(
        "execution mode: {} (baseline m_step {})",
        report.execution_mode, report.baseline_m_step
    );
    println!();
    println!(
        "{:>6} {:>12} {:>10} {:>9} {:>12} {:>12} {:>8} {:>12}",
        "m", "runtime[s]", "std[s]", "speedup", "speedup_err", "rate[ev/s]", "eff[%]", "primaries"
    );
    for row in &report.rows {
        let rate = row
            .event_rate
            .map_or("-".to_string(), |r| format!("{:.2}", r));
        let eff = row
            .efficiency_pct
            .map_or("-".to_string(), |e| format!("{:.1}", e));
        println!(
            "{:>6} {:>12.2} {:>10.2} {:>9.2} {:>12.2} {:>12} {:>8} {:>12}",
            row.m_step,
            row.runtime_s,
            row.runtime_std,
            row.speedup,
            row.speedup_err,
            rate,
            eff,
            row.n_prims
        );
    }
}

pub fn save_json(report: &ScalingReport, path: &Path) -> Result<()> {
    atomic_write_json_pretty(path, report)
}
