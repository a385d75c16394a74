use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::store::{level_results_path, load_aggregate, AggregateResult};

#[derive(Debug, Default)]
pub struct CollectOutcome {
    pub collected: BTreeMap<String, AggregateResult>,
    pub missing: Vec<PathBuf>,
}

// Missing or unreadable level files are reported, not fatal, so a partially
// finished sweep can still be combined.
pub fn collect_results(config: &Config, results_dir: &Path) -> CollectOutcome {
    let mut outcome = CollectOutcome::default();
    for &m_step in &config.simulation.m_steps {
        let path = level_results_path(results_dir, &config.results_file, m_step);
        if !path.exists() {
            warn!("missing results file: {}", path.display());
            outcome.missing.push(path);
            continue;
        }
        match load_aggregate(&path) {
            Ok(result) => {
                info!("collected results for m_step {}", m_step);
                outcome.collected.insert(format!("m{}", m_step), result);
            }
            Err(err) => {
                warn!("error reading {}: {:#}", path.display(), err);
                outcome.missing.push(path);
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{OptionalSummary, Summary};
    use crate::store::{save_aggregate, RawSamples};
    use chrono::Utc;
    use std::fs;

    fn aggregate(m_step: u32) -> AggregateResult {
        AggregateResult {
            m_step,
            template: "templates/bench.mac".to_string(),
            runtime: Summary {
                val: 10.0 * m_step as f64,
                std: 1.0,
            },
            event_rate: OptionalSummary {
                val: Some(50.0),
                std: Some(0.0),
            },
            process_runtime: Summary { val: 11.0, std: 1.0 },
            raw: RawSamples {
                runtimes: vec![10.0 * m_step as f64],
                eventrates: vec![50.0],
                process_runtimes: vec![11.0],
            },
            n_prims: 10_000,
            config: Config::default_config(),
        }
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "remage_collect_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn collects_present_levels_and_lists_absent_ones() {
        let dir = temp_dir("partial");
        let mut config = Config::default_config();
        config.simulation.m_steps = vec![1, 2, 4];
        save_aggregate(&dir.join("runtime_test_m1_results.json"), &aggregate(1))
            .expect("save m1");
        save_aggregate(&dir.join("runtime_test_m4_results.json"), &aggregate(4))
            .expect("save m4");

        let outcome = collect_results(&config, &dir);
        assert_eq!(
            outcome.collected.keys().cloned().collect::<Vec<_>>(),
            vec!["m1", "m4"]
        );
        assert_eq!(outcome.missing.len(), 1);
        assert!(outcome.missing[0]
            .to_string_lossy()
            .ends_with("runtime_test_m2_results.json"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn unreadable_level_counts_as_missing() {
        let dir = temp_dir("corrupt");
        let mut config = Config::default_config();
        config.simulation.m_steps = vec![1, 2];
        save_aggregate(&dir.join("runtime_test_m1_results.json"), &aggregate(1))
            .expect("save m1");
        fs::write(dir.join("runtime_test_m2_results.json"), b"not json")
            .expect("write corrupt file");

        let outcome = collect_results(&config, &dir);
        assert_eq!(outcome.collected.len(), 1);
        assert!(outcome.collected.contains_key("m1"));
        assert_eq!(outcome.missing.len(), 1);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn empty_directory_collects_nothing() {
        let dir = temp_dir("empty");
        let config = Config::default_config();
        let outcome = collect_results(&config, &dir);
        assert!(outcome.collected.is_empty());
        assert_eq!(outcome.missing.len(), config.simulation.m_steps.len());
        let _ = fs::remove_dir_all(dir);
    }
}
