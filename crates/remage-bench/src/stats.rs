use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub val: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionalSummary {
    pub val: Option<f64>,
    pub std: Option<f64>,
}

pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

// Population standard deviation (divides by n, not n - 1).
pub fn population_std(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let m = mean(samples);
    let variance = samples.iter().map(|s| (s - m) * (s - m)).sum::<f64>() / samples.len() as f64;
    variance.sqrt()
}

pub fn summarize(samples: &[f64]) -> Summary {
    Summary {
        val: mean(samples),
        std: population_std(samples),
    }
}

pub fn summarize_optional(samples: &[f64]) -> OptionalSummary {
    if samples.is_empty() {
        OptionalSummary {
            val: None,
            std: None,
        }
    } else {
        OptionalSummary {
            val: Some(mean(samples)),
            std: Some(population_std(samples)),
        }
    }
}
