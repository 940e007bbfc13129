// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Audit configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where the defendant records come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// ProPublica `compas-scores-two-years.csv`
    Csv,
    /// Seeded generator, for development runs without the CSV
    Synthetic,
}

/// Configuration for a fairness audit run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Record source
    pub dataset: DataSource,
    /// Path to the two-year recidivism CSV
    pub input_path: String,
    /// Number of records when `dataset` is synthetic
    pub synthetic_size: usize,
    /// Random seed for the synthetic generator
    pub seed: u64,
    /// Decile score at or above which a defendant is predicted high risk
    pub threshold: u8,
    /// Race values forming the privileged group
    pub privileged_races: Vec<String>,
    /// Race values forming the unprivileged group
    pub unprivileged_races: Vec<String>,
    /// Max |days_b_screening_arrest| kept by the ProPublica filter
    pub screening_window_days: f64,
    /// Directory for plots and reports
    pub output_dir: String,
    /// Whether to write the PNG charts
    pub render_plots: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dataset: DataSource::Csv,
            input_path: "compas-scores-two-years.csv".to_string(),
            synthetic_size: 5000,
            seed: 42,
            threshold: 5,
            privileged_races: vec!["Caucasian".to_string()],
            unprivileged_races: vec!["African-American".to_string()],
            screening_window_days: 30.0,
            output_dir: ".".to_string(),
            render_plots: true,
        }
    }
}

impl AuditConfig {
    /// Load a JSON config file; missing keys take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the audit meaningless
    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.threshold) {
            anyhow::bail!("threshold must be a decile between 1 and 10, got {}", self.threshold);
        }
        if self.privileged_races.is_empty() || self.unprivileged_races.is_empty() {
            anyhow::bail!("both privileged and unprivileged race groups must be non-empty");
        }
        if let Some(overlap) = self
            .privileged_races
            .iter()
            .find(|r| self.unprivileged_races.contains(r))
        {
            anyhow::bail!("race '{}' cannot be both privileged and unprivileged", overlap);
        }
        if self.screening_window_days < 0.0 {
            anyhow::bail!("screening window must be non-negative");
        }
        Ok(())
    }
}
