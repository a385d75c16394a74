use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use crate::config::{Config, ExecutionMode};
use crate::invoke::shell_quote;
use crate::store::{
    self, atomic_write_json_pretty, level_results_path, resumption_for, Resumption,
};

const MAX_JOBS_PER_SUBMIT: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedJob {
    pub job_id: String,
    pub template: String,
    pub m_step: u32,
    pub execution_mode: ExecutionMode,
    pub submitted_at: String,
}

#[derive(Debug, Default)]
pub struct SubmitOutcome {
    pub submitted: BTreeMap<String, SubmittedJob>,
    pub skipped: Vec<String>,
    pub dry_run_scripts: Vec<(String, String)>,
}

pub struct JobSubmitter {
    config: Config,
    base_dir: PathBuf,
    config_path: PathBuf,
}

impl JobSubmitter {
    pub fn new(config: Config, base_dir: &Path, config_path: &Path) -> JobSubmitter {
        JobSubmitter {
            config,
            base_dir: base_dir.to_path_buf(),
            config_path: config_path.to_path_buf(),
        }
    }

    pub fn slurm_dir(&self) -> PathBuf {
        self.base_dir.join(".slurm")
    }

    pub fn job_output_dir(&self) -> PathBuf {
        self.base_dir.join(".output")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.base_dir.join("submitted_jobs.json")
    }

    pub fn slurm_script(&self, m_step: u32, job_name: &str) -> String {
        let cluster = &self.config.cluster;
        let mut script = format!(
            "#!/bin/bash\n\n\
             #SBATCH -q {}\n\
             #SBATCH --constraint={}\n\
             #SBATCH -N {}\n\
             #SBATCH -t {}\n\
             #SBATCH -J {}\n\
             #SBATCH -o {}/output_{}.o%j\n",
            cluster.partition,
            cluster.constraint,
            cluster.nodes,
            cluster.time_limit,
            job_name,
            self.job_output_dir().display(),
            job_name
        );
        if !cluster.mail_user.is_empty() {
            script.push_str("#SBATCH --mail-type=begin,end,fail\n");
            script.push_str(&format!("#SBATCH --mail-user={}\n", cluster.mail_user));
        }
        for arg in &cluster.additional_sbatch_args {
            script.push_str(&format!("#SBATCH {}\n", arg));
        }
        script.push_str(&format!(
            "\n# Unload any conflicting modules\n\
             module unload mpich 2>/dev/null || true\n\n\
             # Set library path\n\
             export LD_LIBRARY_PATH=\"/usr/lib/x86_64-linux-gnu:$LD_LIBRARY_PATH\"\n\n\
             # Change to base directory\n\
             cd {}\n\n\
             # Run the test\n\
             srun remage-bench run-level --config {} --level {} --output-dir {}\n",
            shell_quote(&self.base_dir.display().to_string()),
            shell_quote(&self.config_path.display().to_string()),
            m_step,
            shell_quote(&format!("results/{}", self.config.project_name))
        ));
        script
    }

    pub fn submit_job(&self, script: &str, job_name: &str) -> Result<Option<String>> {
        let script_path = self.slurm_dir().join(format!("slurm_{}.sh", job_name));
        store::atomic_write_bytes(&script_path, script.as_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))
                .with_context(|| format!("chmod {}", script_path.display()))?;
        }
        if self.config.test.dry_run {
            info!("dry run: would submit {}", script_path.display());
            return Ok(None);
        }
        let output = match Command::new("sbatch").arg(&script_path).output() {
            Ok(output) => output,
            Err(err) => {
                warn!("error submitting job for {}: {}", job_name, err);
                return Ok(None);
            }
        };
        if !output.status.success() {
            warn!(
                "error submitting job for {}: {} {}",
                job_name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_job_id(&stdout) {
            Some(job_id) => {
                info!("submitted job {} for {}", job_id, job_name);
                Ok(Some(job_id))
            }
            None => {
                warn!(
                    "job submitted for {}, but no job id in: {}",
                    job_name,
                    stdout.trim()
                );
                Ok(None)
            }
        }
    }

    pub fn submit_all(&self) -> Result<SubmitOutcome> {
        let template_path = Path::new(&self.config.simulation.template_dir)
            .join(&self.config.simulation.macro_template);
        let template_stem = template_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("job")
            .to_string();
        store::ensure_dir(&self.slurm_dir())?;
        store::ensure_dir(&self.job_output_dir())?;

        let results_dir = self
            .base_dir
            .join("results")
            .join(&self.config.project_name);
        let mut outcome = SubmitOutcome::default();
        for &m_step in &self.config.simulation.m_steps {
            let job_name = format!("{}_m{}", template_stem, m_step);
            let results_file =
                level_results_path(&results_dir, &self.config.results_file, m_step);
            let resumption = resumption_for(
                &results_file,
                self.config.test.overwrite,
                self.config.test.skip_existing,
            );
            if resumption == Resumption::LoadCached {
                info!("skipping {}: results already exist", job_name);
                outcome.skipped.push(job_name);
                continue;
            }
            if outcome.submitted.len() >= MAX_JOBS_PER_SUBMIT {
                warn!("reached safety limit of {} jobs", MAX_JOBS_PER_SUBMIT);
                break;
            }
            let script = self.slurm_script(m_step, &job_name);
            if self.config.test.dry_run {
                outcome.dry_run_scripts.push((job_name, script));
                continue;
            }
            if let Some(job_id) = self.submit_job(&script, &job_name)? {
                outcome.submitted.insert(
                    job_name,
                    SubmittedJob {
                        job_id,
                        template: template_path.display().to_string(),
                        m_step,
                        execution_mode: self.config.simulation.execution_mode,
                        submitted_at: Utc::now().to_rfc3339(),
                    },
                );
            }
        }

        if !self.config.test.dry_run && !outcome.submitted.is_empty() {
            self.merge_registry(&outcome.submitted)?;
        }
        Ok(outcome)
    }

    fn merge_registry(&self, new_jobs: &BTreeMap<String, SubmittedJob>) -> Result<()> {
        let path = self.registry_path();
        let mut jobs = if path.exists() {
            self.load_registry()?
        } else {
            BTreeMap::new()
        };
        for (name, job) in new_jobs {
            jobs.insert(name.clone(), job.clone());
        }
        atomic_write_json_pretty(&path, &jobs)?;
        info!("job information saved to {}", path.display());
        Ok(())
    }

    pub fn load_registry(&self) -> Result<BTreeMap<String, SubmittedJob>> {
        let path = self.registry_path();
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("read job registry {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parse job registry {}", path.display()))
    }

    pub fn check_status(&self, job_ids: &[String]) -> BTreeMap<String, String> {
        if job_ids.is_empty() {
            return BTreeMap::new();
        }
        let output = match Command::new("squeue")
            .arg("-j")
            .arg(job_ids.join(","))
            .arg("--format=%i,%T")
            .output()
        {
            Ok(output) => output,
            Err(err) => {
                warn!("error checking job status: {}", err);
                return BTreeMap::new();
            }
        };
        if !output.status.success() {
            warn!("error checking job status: {}", output.status);
            return BTreeMap::new();
        }
        parse_squeue_output(&String::from_utf8_lossy(&output.stdout))
    }

    pub fn cancel(&self, job_ids: &[String]) -> Result<bool> {
        if job_ids.is_empty() {
            return Ok(false);
        }
        let status = Command::new("scancel")
            .args(job_ids)
            .status()
            .context("run scancel")?;
        if status.success() {
            info!("cancelled {} jobs", job_ids.len());
        } else {
            warn!("error cancelling jobs: {}", status);
        }
        Ok(status.success())
    }
}

fn parse_job_id(stdout: &str) -> Option<String> {
    let anchor = "Submitted batch job ";
    let at = stdout.find(anchor)?;
    let digits: String = stdout[at + anchor.len()..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

fn parse_squeue_output(stdout: &str) -> BTreeMap<String, String> {
    let mut statuses = BTreeMap::new();
    for line in stdout.trim().lines().skip(1) {
        if let Some((job_id, state)) = line.trim().split_once(',') {
            statuses.insert(job_id.to_string(), state.to_string());
        }
    }
    statuses
}
