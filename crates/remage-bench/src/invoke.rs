use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, VecDeque};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::SimulationConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn display_line(&self) -> String {
        let mut parts = Vec::with_capacity(1 + self.args.len());
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        shell_join(&parts)
    }
}

pub trait Invoker: Send + Sync {
    fn invoke(&self, spec: &CommandSpec, timeout: Option<Duration>) -> Result<String>;
}

pub struct ProcessInvoker;

impl Invoker for ProcessInvoker {
    fn invoke(&self, spec: &CommandSpec, timeout: Option<Duration>) -> Result<String> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn {}", spec.display_line()))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_reader = thread::spawn(move || read_stream(stdout));
        let stderr_reader = thread::spawn(move || read_stream(stderr));

        let status = match timeout {
            Some(limit) => {
                let deadline = Instant::now() + limit;
                loop {
                    match child.try_wait().context("poll child process")? {
                        Some(status) => break status,
                        None => {
                            if Instant::now() >= deadline {
                                let _ = child.kill();
                                let _ = child.wait();
                                let _ = stdout_reader.join();
                                let _ = stderr_reader.join();
                                bail!(
                                    "process_timeout: {} still running after {:.1}s",
                                    spec.display_line(),
                                    limit.as_secs_f64()
                                );
                            }
                            thread::sleep(Duration::from_millis(200));
                        }
                    }
                }
            }
            None => child.wait().context("wait for child process")?,
        };

        let mut text = stdout_reader.join().unwrap_or_default();
        let err_text = stderr_reader.join().unwrap_or_default();
        if !err_text.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&err_text);
        }
        if !status.success() {
            debug!(
                "process exited with {}: {}",
                status,
                spec.display_line()
            );
        }
        Ok(text)
    }
}

fn read_stream<R: Read>(stream: Option<R>) -> String {
    let mut text = String::new();
    if let Some(mut stream) = stream {
        let _ = stream.read_to_string(&mut text);
    }
    text
}

pub struct ScriptedInvoker {
    responses: Mutex<VecDeque<Result<String, String>>>,
    default_response: String,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedInvoker {
    pub fn new(default_response: &str) -> ScriptedInvoker {
        ScriptedInvoker {
            responses: Mutex::new(VecDeque::new()),
            default_response: default_response.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_response(&self, text: &str) {
        self.responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(Ok(text.to_string()));
    }

    pub fn push_failure(&self, message: &str) {
        self.responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Invoker for ScriptedInvoker {
    fn invoke(&self, spec: &CommandSpec, _timeout: Option<Duration>) -> Result<String> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(spec.clone());
        let next = self
            .responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => bail!("{}", message),
            None => Ok(self.default_response.clone()),
        }
    }
}

pub fn build_trial_command(
    sim: &SimulationConfig,
    macro_path: &Path,
    m_step: u32,
) -> CommandSpec {
    let macro_arg = macro_path.display().to_string();
    let mut flags = vec![
        "--threads".to_string(),
        sim.thread_count(m_step).to_string(),
    ];
    flags.extend(sim.additional_args.iter().cloned());

    if !sim.container.is_empty() {
        let script = if sim.executable == "remage" {
            format!(
                "module unload mpich 2>/dev/null || true; \
                 export LD_LIBRARY_PATH=/usr/lib/x86_64-linux-gnu:$LD_LIBRARY_PATH; \
                 /opt/remage/bin/remage {} {}",
                shell_quote(&macro_arg),
                shell_join(&flags)
            )
        } else {
            format!(
                "module unload mpich 2>/dev/null || true; \
                 source /opt/geant4/bin/geant4.sh; \
                 export LD_LIBRARY_PATH={}:/usr/lib/x86_64-linux-gnu:/opt/geant4/lib:/opt/root/lib:/opt/bxdecay0/lib; \
                 {} {} {}",
                executable_lib_dir(&sim.executable).display(),
                shell_quote(&sim.executable),
                shell_quote(&macro_arg),
                shell_join(&flags)
            )
        };
        return CommandSpec {
            program: "shifter".to_string(),
            args: vec![
                format!("--image={}", sim.container),
                "bash".to_string(),
                "-c".to_string(),
                script,
            ],
            env: BTreeMap::new(),
        };
    }

    let mut env = BTreeMap::new();
    if sim.executable != "remage" {
        let lib_dir = executable_lib_dir(&sim.executable);
        if lib_dir.is_dir() {
            let lib = lib_dir.display().to_string();
            let value = match std::env::var("LD_LIBRARY_PATH") {
                Ok(existing) if !existing.is_empty() => format!("{}:{}", lib, existing),
                _ => lib,
            };
            env.insert("LD_LIBRARY_PATH".to_string(), value);
        }
    }
    let mut args = vec![macro_arg];
    args.extend(flags);
    CommandSpec {
        program: sim.executable.clone(),
        args,
        env,
    }
}

fn executable_lib_dir(executable: &str) -> PathBuf {
    let exe = Path::new(executable);
    let base = exe
        .parent()
        .and_then(|p| p.parent())
        .unwrap_or(Path::new(""));
    base.join("lib")
}

pub(crate) fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}
