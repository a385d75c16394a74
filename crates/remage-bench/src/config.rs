use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    MultithreadedFix,
    MultithreadedScaled,
    MultiprocessedFix,
    MultiprocessedScaled,
}

impl ExecutionMode {
    pub fn is_multithreaded(self) -> bool {
        matches!(
            self,
            ExecutionMode::MultithreadedFix | ExecutionMode::MultithreadedScaled
        )
    }

    pub fn is_scaled(self) -> bool {
        matches!(
            self,
            ExecutionMode::MultithreadedScaled | ExecutionMode::MultiprocessedScaled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::MultithreadedFix => "multithreaded_fix",
            ExecutionMode::MultithreadedScaled => "multithreaded_scaled",
            ExecutionMode::MultiprocessedFix => "multiprocessed_fix",
            ExecutionMode::MultiprocessedScaled => "multiprocessed_scaled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub macro_template: String,
    pub m_steps: Vec<u32>,
    pub n_primaries: u64,
    pub execution_mode: ExecutionMode,
    #[serde(default = "default_physics_list")]
    pub physics_list: String,
    #[serde(default)]
    pub additional_args: Vec<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_template_dir")]
    pub template_dir: String,
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default = "default_executable")]
    pub executable: String,
    #[serde(default = "default_primaries_multiplier")]
    pub primaries_multiplier: u64,
}

impl SimulationConfig {
    pub fn thread_count(&self, m_step: u32) -> u32 {
        if self.execution_mode.is_multithreaded() {
            m_step
        } else {
            1
        }
    }

    pub fn process_count(&self, m_step: u32) -> u32 {
        if self.execution_mode.is_multithreaded() {
            1
        } else {
            m_step
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_partition")]
    pub partition: String,
    #[serde(default = "default_time_limit")]
    pub time_limit: String,
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_nodes")]
    pub nodes: u32,
    #[serde(default = "default_one")]
    pub tasks_per_node: u32,
    #[serde(default = "default_one")]
    pub cpus_per_task: u32,
    #[serde(default = "default_constraint")]
    pub constraint: String,
    #[serde(default)]
    pub mail_user: String,
    #[serde(default)]
    pub additional_sbatch_args: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            partition: default_partition(),
            time_limit: default_time_limit(),
            memory: default_memory(),
            nodes: default_nodes(),
            tasks_per_node: default_one(),
            cpus_per_task: default_one(),
            constraint: default_constraint(),
            mail_user: String::new(),
            additional_sbatch_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default = "default_one")]
    pub repetitions: u32,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_true")]
    pub skip_existing: bool,
    #[serde(default = "default_one")]
    pub parallel_trials: u32,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for TestConfig {
    fn default() -> Self {
        TestConfig {
            repetitions: 1,
            dry_run: false,
            overwrite: false,
            skip_existing: true,
            parallel_trials: 1,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub test: TestConfig,
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default)]
    pub results_file: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let mut config: Config = if ext == "yaml" || ext == "yml" {
            serde_yaml::from_str(&text)
                .with_context(|| format!("parse config {}", path.display()))?
        } else {
            serde_json::from_str(&text)
                .with_context(|| format!("parse config {}", path.display()))?
        };
        if config.results_file.is_empty() {
            config.results_file = format!("{}_results.json", config.project_name);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).context("serialize config")?;
        crate::store::atomic_write_bytes(path, &bytes)
    }

    pub fn validate(&self) -> Result<()> {
        if self.simulation.macro_template.is_empty() {
            bail!("config_invalid: simulation.macro_template must be set");
        }
        if self.simulation.m_steps.is_empty() {
            bail!("config_invalid: simulation.m_steps must not be empty");
        }
        if self.simulation.m_steps.iter().any(|&m| m == 0) {
            bail!("config_invalid: simulation.m_steps entries must be positive");
        }
        if self.simulation.primaries_multiplier == 0 {
            bail!("config_invalid: simulation.primaries_multiplier must be positive");
        }
        if self.test.repetitions == 0 {
            bail!("config_invalid: test.repetitions must be positive");
        }
        if self.test.parallel_trials == 0 {
            bail!("config_invalid: test.parallel_trials must be positive");
        }
        Ok(())
    }

    pub fn default_config() -> Config {
        Config {
            simulation: SimulationConfig {
                macro_template: "benchmark.mac".to_string(),
                m_steps: vec![1, 2, 4, 8, 16, 32],
                n_primaries: 10_000,
                execution_mode: ExecutionMode::MultithreadedFix,
                physics_list: default_physics_list(),
                additional_args: Vec::new(),
                output_dir: default_output_dir(),
                template_dir: default_template_dir(),
                container: default_container(),
                executable: default_executable(),
                primaries_multiplier: default_primaries_multiplier(),
            },
            cluster: ClusterConfig::default(),
            test: TestConfig::default(),
            project_name: default_project_name(),
            results_file: format!("{}_results.json", default_project_name()),
        }
    }
}

fn default_physics_list() -> String {
    "FTFP_BERT".to_string()
}

fn default_output_dir() -> String {
    "/var/tmp".to_string()
}

fn default_template_dir() -> String {
    "templates".to_string()
}

fn default_container() -> String {
    "legendexp/remage:latest".to_string()
}

fn default_executable() -> String {
    "remage".to_string()
}

fn default_primaries_multiplier() -> u64 {
    1
}

fn default_partition() -> String {
    "regular".to_string()
}

fn default_time_limit() -> String {
    "00:15:00".to_string()
}

fn default_memory() -> String {
    "4GB".to_string()
}

fn default_nodes() -> u32 {
    1
}

fn default_constraint() -> String {
    "cpu".to_string()
}

fn default_one() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_project_name() -> String {
    "runtime_test".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn temp_path(tag: &str, ext: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "remage_config_{}_{}_{}.{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros(),
            ext
        ))
    }

    #[test]
    fn execution_mode_round_trips_through_serde() {
        for (mode, text) in [
            (ExecutionMode::MultithreadedFix, "\"multithreaded_fix\""),
            (ExecutionMode::MultithreadedScaled, "\"multithreaded_scaled\""),
            (ExecutionMode::MultiprocessedFix, "\"multiprocessed_fix\""),
            (ExecutionMode::MultiprocessedScaled, "\"multiprocessed_scaled\""),
        ] {
            assert_eq!(serde_json::to_string(&mode).expect("serialize"), text);
            let parsed: ExecutionMode = serde_json::from_str(text).expect("parse");
            assert_eq!(parsed, mode);
        }
    }

    #[test]
    fn unrecognized_execution_mode_is_rejected() {
        let text = r#"{
            "simulation": {
                "macro_template": "bench.mac",
                "m_steps": [1],
                "n_primaries": 100,
                "execution_mode": "multithreaded"
            }
        }"#;
        assert!(serde_json::from_str::<Config>(text).is_err());
    }

    #[test]
    fn minimal_json_config_gets_defaults() {
        let text = r#"{
            "simulation": {
                "macro_template": "bench.mac",
                "m_steps": [1, 2, 4],
                "n_primaries": 1000,
                "execution_mode": "multithreaded_fix"
            }
        }"#;
        let config: Config = serde_json::from_str(text).expect("parse");
        assert_eq!(config.simulation.physics_list, "FTFP_BERT");
        assert_eq!(config.simulation.output_dir, "/var/tmp");
        assert_eq!(config.simulation.template_dir, "templates");
        assert_eq!(config.simulation.container, "legendexp/remage:latest");
        assert_eq!(config.simulation.executable, "remage");
        assert_eq!(config.simulation.primaries_multiplier, 1);
        assert_eq!(config.cluster.partition, "regular");
        assert_eq!(config.test.repetitions, 1);
        assert!(config.test.skip_existing);
        assert!(!config.test.overwrite);
        assert_eq!(config.project_name, "runtime_test");
    }

    #[test]
    fn load_fills_results_file_from_project_name() {
        let path = temp_path("fill", "json");
        let text = r#"{
            "project_name": "electron_scan",
            "simulation": {
                "macro_template": "bench.mac",
                "m_steps": [1],
                "n_primaries": 100,
                "execution_mode": "multithreaded_fix"
            }
        }"#;
        std::fs::write(&path, text).expect("write config");
        let config = Config::load(&path).expect("load");
        assert_eq!(config.results_file, "electron_scan_results.json");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn load_keeps_explicit_results_file() {
        let path = temp_path("explicit", "json");
        let text = r#"{
            "results_file": "runtime_estimates.json",
            "simulation": {
                "macro_template": "bench.mac",
                "m_steps": [1],
                "n_primaries": 100,
                "execution_mode": "multithreaded_fix"
            }
        }"#;
        std::fs::write(&path, text).expect("write config");
        let config = Config::load(&path).expect("load");
        assert_eq!(config.results_file, "runtime_estimates.json");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn load_accepts_yaml_by_extension() {
        let path = temp_path("yaml", "yaml");
        let text = "\
simulation:
  macro_template: bench.mac
  m_steps: [1, 2]
  n_primaries: 500
  execution_mode: multiprocessed_scaled
";
        std::fs::write(&path, text).expect("write config");
        let config = Config::load(&path).expect("load");
        assert_eq!(
            config.simulation.execution_mode,
            ExecutionMode::MultiprocessedScaled
        );
        assert_eq!(config.simulation.m_steps, vec![1, 2]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::default_config();
        config.simulation.m_steps = vec![];
        assert!(config.validate().is_err());

        let mut config = Config::default_config();
        config.simulation.m_steps = vec![0];
        assert!(config.validate().is_err());

        let mut config = Config::default_config();
        config.test.repetitions = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default_config();
        config.test.parallel_trials = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default_config();
        config.simulation.primaries_multiplier = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn thread_and_process_counts_follow_mode() {
        let mut config = Config::default_config();
        config.simulation.execution_mode = ExecutionMode::MultithreadedScaled;
        assert_eq!(config.simulation.thread_count(8), 8);
        assert_eq!(config.simulation.process_count(8), 1);

        config.simulation.execution_mode = ExecutionMode::MultiprocessedFix;
        assert_eq!(config.simulation.thread_count(8), 1);
        assert_eq!(config.simulation.process_count(8), 8);
    }

    #[test]
    fn save_writes_readable_json() {
        let path = temp_path("save", "json");
        let config = Config::default_config();
        config.save(&path).expect("save");
        let reloaded = Config::load(&path).expect("reload");
        assert_eq!(reloaded.simulation.m_steps, config.simulation.m_steps);
        assert_eq!(reloaded.results_file, "runtime_test_results.json");
        let _ = std::fs::remove_file(path);
    }
}
