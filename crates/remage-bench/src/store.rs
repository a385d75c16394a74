use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::stats::{OptionalSummary, Summary};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResult {
    pub m_step: u32,
    pub template: String,
    pub runtime: Summary,
    pub event_rate: OptionalSummary,
    pub process_runtime: Summary,
    pub raw: RawSamples,
    pub n_prims: u64,
    pub config: Config,
}

// raw.eventrates keeps only the trials where a rate was extracted, so it can
// be shorter than raw.runtimes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSamples {
    pub runtimes: Vec<f64>,
    pub eventrates: Vec<f64>,
    pub process_runtimes: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resumption {
    Compute,
    LoadCached,
    Recompute,
}

pub fn resumption_for(path: &Path, overwrite: bool, skip_existing: bool) -> Resumption {
    if !path.exists() {
        Resumption::Compute
    } else if overwrite {
        Resumption::Recompute
    } else if skip_existing {
        Resumption::LoadCached
    } else {
        Resumption::Recompute
    }
}

pub fn results_base_name(results_file: &str) -> &str {
    if let Some(base) = results_file.strip_suffix("_results.json") {
        base
    } else if let Some(base) = results_file.strip_suffix(".json") {
        base
    } else {
        results_file
    }
}

pub fn level_results_path(output_dir: &Path, results_file: &str, m_step: u32) -> PathBuf {
    output_dir.join(format!(
        "{}_m{}_results.json",
        results_base_name(results_file),
        m_step
    ))
}

pub fn load_aggregate(path: &Path) -> Result<AggregateResult> {
    let text =
        fs::read_to_string(path).with_context(|| format!("read results {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse results {}", path.display()))
}

pub fn save_aggregate(path: &Path, result: &AggregateResult) -> Result<()> {
    atomic_write_json_pretty(path, result)
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("create directory {}", parent.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("results");
    let tmp = parent.join(format!(
        ".{}.tmp.{}.{}",
        name,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    {
        let mut file =
            File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("write {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("sync {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} to {}", tmp.display(), path.display()))?;
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

pub fn atomic_write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).context("serialize json")?;
    atomic_write_bytes(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "remage_store_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn sample_aggregate(m_step: u32) -> AggregateResult {
        AggregateResult {
            m_step,
            template: "bench.mac".to_string(),
            runtime: Summary { val: 20.0, std: 8.0 },
            event_rate: OptionalSummary {
                val: Some(81.3),
                std: Some(0.0),
            },
            process_runtime: Summary { val: 21.5, std: 8.2 },
            raw: RawSamples {
                runtimes: vec![10.0, 20.0, 30.0],
                eventrates: vec![81.3, 81.3],
                process_runtimes: vec![11.0, 21.0, 32.5],
            },
            n_prims: 10_000,
            config: Config::default_config(),
        }
    }

    #[test]
    fn base_name_strips_result_suffixes() {
        assert_eq!(results_base_name("runtime_test_results.json"), "runtime_test");
        assert_eq!(results_base_name("runtime_estimates.json"), "runtime_estimates");
        assert_eq!(results_base_name("plain"), "plain");
    }

    #[test]
    fn level_path_embeds_step() {
        let path = level_results_path(Path::new("/data/out"), "runtime_test_results.json", 8);
        assert_eq!(
            path,
            Path::new("/data/out/runtime_test_m8_results.json")
        );
    }

    #[test]
    fn resumption_covers_flag_combinations() {
        let dir = temp_dir("resume");
        let absent = dir.join("absent.json");
        assert_eq!(resumption_for(&absent, false, true), Resumption::Compute);
        assert_eq!(resumption_for(&absent, true, false), Resumption::Compute);

        let present = dir.join("present.json");
        fs::write(&present, b"{}").expect("write file");
        assert_eq!(resumption_for(&present, true, true), Resumption::Recompute);
        assert_eq!(resumption_for(&present, false, true), Resumption::LoadCached);
        assert_eq!(resumption_for(&present, false, false), Resumption::Recompute);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn aggregate_round_trips() {
        let dir = temp_dir("roundtrip");
        let path = dir.join("runtime_test_m4_results.json");
        let result = sample_aggregate(4);
        save_aggregate(&path, &result).expect("save");
        let loaded = load_aggregate(&path).expect("load");
        assert_eq!(loaded.m_step, 4);
        assert_eq!(loaded.raw.runtimes, vec![10.0, 20.0, 30.0]);
        assert_eq!(loaded.raw.eventrates, vec![81.3, 81.3]);
        assert_eq!(loaded.config.project_name, "runtime_test");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = temp_dir("atomic");
        let path = dir.join("out.json");
        atomic_write_bytes(&path, b"{\"ok\": true}").expect("write");
        let entries: Vec<_> = fs::read_dir(&dir)
            .expect("read dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("out.json")]);
        assert_eq!(fs::read(&path).expect("read back"), b"{\"ok\": true}");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn atomic_write_creates_missing_parents() {
        let dir = temp_dir("parents");
        let path = dir.join("nested/deeper/out.json");
        atomic_write_bytes(&path, b"x").expect("write");
        assert!(path.exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn load_rejects_malformed_json() {
        let dir = temp_dir("malformed");
        let path = dir.join("bad.json");
        fs::write(&path, b"not json").expect("write");
        assert!(load_aggregate(&path).is_err());
        let _ = fs::remove_dir_all(dir);
    }
}
