use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::invoke::{Invoker, ProcessInvoker};
use crate::pool;
use crate::stats::{summarize, summarize_optional};
use crate::store::{
    self, level_results_path, load_aggregate, resumption_for, save_aggregate, AggregateResult,
    RawSamples, Resumption,
};
use crate::template::load_template;
use crate::trial::{run_trial, TrialContext, TrialRecord};

pub type OverallResultSet = BTreeMap<String, AggregateResult>;

pub struct SimulationRunner {
    config: Config,
    invoker: Arc<dyn Invoker>,
}

impl SimulationRunner {
    pub fn new(config: Config) -> SimulationRunner {
        SimulationRunner::with_invoker(config, Arc::new(ProcessInvoker))
    }

    pub fn with_invoker(config: Config, invoker: Arc<dyn Invoker>) -> SimulationRunner {
        SimulationRunner { config, invoker }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn template_path(&self) -> PathBuf {
        Path::new(&self.config.simulation.template_dir)
            .join(&self.config.simulation.macro_template)
    }

    pub fn run_level(&self, m_step: u32, output_dir: &Path) -> Result<Option<AggregateResult>> {
        let results_file = level_results_path(output_dir, &self.config.results_file, m_step);
        let resumption = resumption_for(
            &results_file,
            self.config.test.overwrite,
            self.config.test.skip_existing,
        );
        if resumption == Resumption::LoadCached {
            info!("skipping m_step {}: results already exist", m_step);
            return load_aggregate(&results_file).map(Some);
        }

        info!("running tests for m_step {}", m_step);
        let template_path = self.template_path();
        let template_text = load_template(&template_path)?;
        let ctx = TrialContext {
            config: &self.config,
            template_text: &template_text,
            invoker: self.invoker.as_ref(),
        };

        let records: Vec<TrialRecord> = if self.config.simulation.execution_mode.is_multithreaded()
        {
            let workers = self.config.test.parallel_trials as usize;
            let jobs = self.config.test.repetitions as usize;
            pool::run_indexed(workers, jobs, |index| run_trial(&ctx, m_step, index))
                .into_iter()
                .flatten()
                .collect()
        } else {
            let process_count = self.config.simulation.process_count(m_step) as usize;
            let mut reduced = Vec::new();
            for _ in 0..self.config.test.repetitions {
                let batch = pool::run_indexed(process_count, process_count, |index| {
                    run_trial(&ctx, m_step, index)
                });
                if let Some(record) = reduce_batch(&batch) {
                    reduced.push(record);
                }
            }
            reduced
        };

        let valid: Vec<&TrialRecord> =
            records.iter().filter(|r| r.runtime_s.is_some()).collect();
        if valid.is_empty() {
            warn!("no valid results for m_step {}", m_step);
            return Ok(None);
        }

        let runtimes: Vec<f64> = valid.iter().filter_map(|r| r.runtime_s).collect();
        let eventrates: Vec<f64> = valid.iter().filter_map(|r| r.event_rate).collect();
        let process_runtimes: Vec<f64> = valid.iter().map(|r| r.wall_s).collect();

        let mut n_prims = self.config.simulation.n_primaries;
        if self.config.simulation.execution_mode.is_scaled() {
            n_prims = self.config.simulation.n_primaries
                * u64::from(m_step)
                * self.config.simulation.primaries_multiplier;
        }

        let result = AggregateResult {
            m_step,
            template: template_path.display().to_string(),
            runtime: summarize(&runtimes),
            event_rate: summarize_optional(&eventrates),
            process_runtime: summarize(&process_runtimes),
            raw: RawSamples {
                runtimes,
                eventrates,
                process_runtimes,
            },
            n_prims,
            config: self.config.clone(),
        };
        save_aggregate(&results_file, &result)
            .with_context(|| format!("save results for m_step {}", m_step))?;
        info!("results saved for m_step {}", m_step);
        Ok(Some(result))
    }

    pub fn run_sweep(&self, output_dir: &Path) -> Result<OverallResultSet> {
        store::ensure_dir(output_dir)?;
        let mut all_results = OverallResultSet::new();
        for &m_step in &self.config.simulation.m_steps {
            if let Some(result) = self.run_level(m_step, output_dir)? {
                all_results.insert(format!("m{}", m_step), result);
            }
        }
        Ok(all_results)
    }
}

// A repetition is bounded by its slowest process, so the batch collapses to
// the max runtime and wall time with the min event rate.
fn reduce_batch(batch: &[Option<TrialRecord>]) -> Option<TrialRecord> {
    let mut runtime: Option<f64> = None;
    let mut rate: Option<f64> = None;
    let mut wall: Option<f64> = None;
    for record in batch.iter().flatten() {
        let r = match record.runtime_s {
            Some(r) => r,
            None => continue,
        };
        runtime = Some(runtime.map_or(r, |cur| cur.max(r)));
        wall = Some(wall.map_or(record.wall_s, |cur| cur.max(record.wall_s)));
        if let Some(er) = record.event_rate {
            rate = Some(rate.map_or(er, |cur| cur.min(er)));
        }
    }
    let runtime = runtime?;
    Some(TrialRecord {
        runtime_s: Some(runtime),
        event_rate: rate,
        wall_s: wall.unwrap_or(0.0),
    })
}
