use anyhow::Result;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::Config;
use crate::extract::{extract_event_rate, extract_runtime};
use crate::invoke::{build_trial_command, Invoker};
use crate::template::{expand_template, write_macro_file, MacroValues};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialRecord {
    pub runtime_s: Option<f64>,
    pub event_rate: Option<f64>,
    pub wall_s: f64,
}

pub struct TrialContext<'a> {
    pub config: &'a Config,
    pub template_text: &'a str,
    pub invoker: &'a dyn Invoker,
}

pub fn run_trial(ctx: &TrialContext<'_>, m_step: u32, index: usize) -> Option<TrialRecord> {
    match execute_trial(ctx, m_step, index) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!("trial {} for m_step {} failed: {:#}", index, m_step, err);
            None
        }
    }
}

fn execute_trial(ctx: &TrialContext<'_>, m_step: u32, index: usize) -> Result<TrialRecord> {
    let sim = &ctx.config.simulation;
    let start = Instant::now();
    let output_dir = PathBuf::from(&sim.output_dir);
    let artifact_name = format!(
        "runtime_test_m{}_{}_{}.hdf5",
        m_step,
        index,
        Utc::now().timestamp_millis()
    );
    let artifact = output_dir.join(&artifact_name);

    let mut n_primaries = sim.n_primaries;
    if sim.execution_mode.is_scaled() {
        n_primaries = sim.n_primaries * u64::from(m_step);
    }
    let values = MacroValues {
        template_dir: PathBuf::from(&sim.template_dir),
        n_primaries,
        n_threads: sim.thread_count(m_step),
        n_processes: sim.process_count(m_step),
        output_dir: output_dir.clone(),
        output_file: artifact_name,
    };
    let macro_text = expand_template(ctx.template_text, &values);

    if ctx.config.test.dry_run {
        info!(
            "dry run for m_step {} trial {}, macro:\n{}",
            m_step, index, macro_text
        );
        return Ok(TrialRecord {
            runtime_s: None,
            event_rate: None,
            wall_s: start.elapsed().as_secs_f64(),
        });
    }

    let macro_path = write_macro_file(&macro_text)?;
    let spec = build_trial_command(sim, &macro_path, m_step);
    let timeout = ctx.config.test.timeout_secs.map(Duration::from_secs);
    let outcome = ctx.invoker.invoke(&spec, timeout);
    let _ = fs::remove_file(&macro_path);
    let output = outcome?;

    let runtime_s = extract_runtime(&output);
    let event_rate = extract_event_rate(&output);
    let wall_s = start.elapsed().as_secs_f64();
    if artifact.exists() {
        if let Err(err) = fs::remove_file(&artifact) {
            warn!("could not remove {}: {}", artifact.display(), err);
        }
    }
    Ok(TrialRecord {
        runtime_s,
        event_rate,
        wall_s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::ScriptedInvoker;
    use std::path::Path;

    const SIM_OUTPUT: &str = "Run terminated\n\
        Run Summary\n\
        run time was 0 days, 0 hours, 1 minutes and 5 seconds\n\
        0.0123 seconds/event = 81.3 events/second\n";

    fn local_config() -> Config {
        let mut config = Config::default_config();
        config.simulation.container = String::new();
        config.simulation.output_dir = std::env::temp_dir().display().to_string();
        config
    }

    #[test]
    fn successful_trial_captures_metrics() {
        let config = local_config();
        let invoker = ScriptedInvoker::new(SIM_OUTPUT);
        let ctx = TrialContext {
            config: &config,
            template_text: "/run/beamOn {N_PRIMARIES}\n",
            invoker: &invoker,
        };
        let record = run_trial(&ctx, 4, 0).expect("trial should succeed");
        assert_eq!(record.runtime_s, Some(65.0));
        assert_eq!(record.event_rate, Some(81.3));
        assert!(record.wall_s >= 0.0);
        assert_eq!(invoker.call_count(), 1);
        let call = &invoker.calls()[0];
        assert_eq!(call.program, "remage");
        assert!(call.args.contains(&"--threads".to_string()));
        assert!(call.args.contains(&"4".to_string()));
    }

    #[test]
    fn macro_file_is_removed_after_the_run() {
        let config = local_config();
        let invoker = ScriptedInvoker::new(SIM_OUTPUT);
        let ctx = TrialContext {
            config: &config,
            template_text: "/run/beamOn {N_PRIMARIES}\n",
            invoker: &invoker,
        };
        run_trial(&ctx, 1, 0).expect("trial should succeed");
        let macro_arg = invoker.calls()[0].args[0].clone();
        assert!(macro_arg.ends_with(".mac"));
        assert!(!Path::new(&macro_arg).exists());
    }

    #[test]
    fn unparseable_output_yields_record_without_metrics() {
        let config = local_config();
        let invoker = ScriptedInvoker::new("no recognizable summary lines\n");
        let ctx = TrialContext {
            config: &config,
            template_text: "/run/beamOn 1\n",
            invoker: &invoker,
        };
        let record = run_trial(&ctx, 2, 1).expect("trial itself succeeds");
        assert_eq!(record.runtime_s, None);
        assert_eq!(record.event_rate, None);
    }

    #[test]
    fn invocation_error_is_soft() {
        let config = local_config();
        let invoker = ScriptedInvoker::new(SIM_OUTPUT);
        invoker.push_failure("spawn failed");
        let ctx = TrialContext {
            config: &config,
            template_text: "/run/beamOn 1\n",
            invoker: &invoker,
        };
        assert!(run_trial(&ctx, 2, 0).is_none());
    }

    #[test]
    fn dry_run_skips_invocation() {
        let mut config = local_config();
        config.test.dry_run = true;
        let invoker = ScriptedInvoker::new(SIM_OUTPUT);
        let ctx = TrialContext {
            config: &config,
            template_text: "/run/beamOn {N_PRIMARIES}\n",
            invoker: &invoker,
        };
        let record = run_trial(&ctx, 8, 0).expect("dry run yields a record");
        assert_eq!(record.runtime_s, None);
        assert_eq!(invoker.call_count(), 0);
    }

    struct MacroCapture {
        seen: std::sync::Mutex<Vec<String>>,
    }

    impl Invoker for MacroCapture {
        fn invoke(
            &self,
            spec: &crate::invoke::CommandSpec,
            _timeout: Option<Duration>,
        ) -> Result<String> {
            let text =
                fs::read_to_string(&spec.args[0]).expect("macro readable while running");
            self.seen.lock().expect("lock").push(text);
            Ok(SIM_OUTPUT.to_string())
        }
    }

    #[test]
    fn scaled_mode_multiplies_macro_primaries() {
        let mut config = local_config();
        config.simulation.execution_mode = crate::config::ExecutionMode::MultithreadedScaled;
        config.simulation.n_primaries = 1000;
        let capture = MacroCapture {
            seen: std::sync::Mutex::new(Vec::new()),
        };
        let ctx = TrialContext {
            config: &config,
            template_text: "/run/beamOn {N_PRIMARIES}\n",
            invoker: &capture,
        };
        run_trial(&ctx, 4, 0).expect("trial should succeed");
        let seen = capture.seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("/run/beamOn 4000"));
    }
}
