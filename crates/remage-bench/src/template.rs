use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
pub struct MacroValues {
    pub template_dir: PathBuf,
    pub n_primaries: u64,
    pub n_threads: u32,
    pub n_processes: u32,
    pub output_dir: PathBuf,
    pub output_file: String,
}

pub fn load_template(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read macro template {}", path.display()))
}

// Replaces every recognized token literally; unknown tokens stay as-is so
// templates can carry placeholders meant for other tools.
pub fn expand_template(text: &str, values: &MacroValues) -> String {
    let output_path = values.output_dir.join(&values.output_file);
    text.replace("{TEMPLATE_DIR}", &values.template_dir.display().to_string())
        .replace("{N_PRIMARIES}", &values.n_primaries.to_string())
        .replace("{N_THREADS}", &values.n_threads.to_string())
        .replace("{N_PROCESSES}", &values.n_processes.to_string())
        .replace("{OUTPUT_DIR}", &values.output_dir.display().to_string())
        .replace("{OUTPUT_FILE}", &values.output_file)
        // Legacy tokens; the first one keeps its historical typo.
        .replace("NUMBER_PIMARY_PLACEHOLDER", &values.n_primaries.to_string())
        .replace(
            "OUTPUT_HDF5_PLACEHOLDER",
            &output_path.display().to_string(),
        )
}

static MACRO_SEQ: AtomicU64 = AtomicU64::new(0);

pub fn write_macro_file(text: &str) -> Result<PathBuf> {
    let seq = MACRO_SEQ.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!(
        "remage_bench_{}_{}_{}.mac",
        std::process::id(),
        Utc::now().timestamp_micros(),
        seq
    ));
    fs::write(&path, text).with_context(|| format!("write macro file {}", path.display()))?;
    Ok(path)
}
