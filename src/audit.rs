// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Fairness audit pipeline
//!
//! Orchestrates:
//! - Dataset loading and filtering
//! - Dataset and classification fairness metrics
//! - Comparison charts
//! - Reweighing mitigation and re-evaluation
//! - Results serialization

use crate::config::{AuditConfig, DataSource};
use crate::dataset::{CompasDataset, FilterStats, Group};
use crate::metrics::{ClassificationMetric, DatasetMetric, GroupRates};
use crate::plots;
use crate::reweighing::Reweighing;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Every fairness metric computed for one version of the dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairnessSnapshot {
    pub privileged_base_rate: f64,
    pub unprivileged_base_rate: f64,
    pub statistical_parity_difference: f64,
    pub disparate_impact: f64,
    pub mean_difference: f64,
    pub false_positive_rate_difference: f64,
    pub false_negative_rate_difference: f64,
    pub equal_opportunity_difference: f64,
    pub average_odds_difference: f64,
    pub error_rate_difference: f64,
    pub favorable_false_positive_rate_difference: f64,
    pub favorable_false_negative_rate_difference: f64,
    pub favorable_equal_opportunity_difference: f64,
    pub favorable_average_odds_difference: f64,
    pub predicted_statistical_parity_difference: f64,
    pub predicted_disparate_impact: f64,
    pub accuracy: f64,
}

impl FairnessSnapshot {
    pub fn from_metrics(dataset: &DatasetMetric, classified: &ClassificationMetric) -> Self {
        Self {
            privileged_base_rate: dataset.privileged.base_rate(),
            unprivileged_base_rate: dataset.unprivileged.base_rate(),
            statistical_parity_difference: dataset.statistical_parity_difference(),
            disparate_impact: dataset.disparate_impact(),
            mean_difference: dataset.mean_difference(),
            false_positive_rate_difference: classified.false_positive_rate_difference(),
            false_negative_rate_difference: classified.false_negative_rate_difference(),
            equal_opportunity_difference: classified.equal_opportunity_difference(),
            average_odds_difference: classified.average_odds_difference(),
            error_rate_difference: classified.error_rate_difference(),
            favorable_false_positive_rate_difference: classified
                .favorable_false_positive_rate_difference(),
            favorable_false_negative_rate_difference: classified
                .favorable_false_negative_rate_difference(),
            favorable_equal_opportunity_difference: classified
                .favorable_equal_opportunity_difference(),
            favorable_average_odds_difference: classified.favorable_average_odds_difference(),
            predicted_statistical_parity_difference: classified.predicted.statistical_parity_difference(),
            predicted_disparate_impact: classified.predicted.disparate_impact(),
            accuracy: classified.overall().accuracy(),
        }
    }

    pub fn compute(dataset: &CompasDataset, threshold: u8) -> Self {
        Self::from_metrics(
            &DatasetMetric::from_labels(dataset),
            &ClassificationMetric::new(dataset, threshold),
        )
    }

    /// (name, value, parity value) for each disparity metric.
    ///
    /// Unqualified error-rate names use the favorable label as the positive
    /// class; "High-Risk" names treat recidivism as positive.
    fn disparities(&self) -> [(&'static str, f64, f64); 13] {
        [
            ("Statistical Parity Difference", self.statistical_parity_difference, 0.0),
            ("Disparate Impact", self.disparate_impact, 1.0),
            ("Mean Difference", self.mean_difference, 0.0),
            ("False Positive Rate Difference", self.favorable_false_positive_rate_difference, 0.0),
            ("False Negative Rate Difference", self.favorable_false_negative_rate_difference, 0.0),
            ("Equal Opportunity Difference", self.favorable_equal_opportunity_difference, 0.0),
            ("Average Odds Difference", self.favorable_average_odds_difference, 0.0),
            ("High-Risk FPR Difference", self.false_positive_rate_difference, 0.0),
            ("High-Risk FNR Difference", self.false_negative_rate_difference, 0.0),
            ("High-Risk TPR Difference", self.equal_opportunity_difference, 0.0),
            ("High-Risk Average Odds Difference", self.average_odds_difference, 0.0),
            ("Predicted Statistical Parity Difference", self.predicted_statistical_parity_difference, 0.0),
            ("Predicted Disparate Impact", self.predicted_disparate_impact, 1.0),
        ]
    }
}

/// Direction a disparity moved after mitigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    Narrowed,
    Widened,
    Unchanged,
    /// One side of the comparison is undefined (NaN)
    Undefined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricComparison {
    pub metric: String,
    pub before: f64,
    pub after: f64,
    /// Value at which the groups are at parity
    pub parity: f64,
    pub change: Change,
}

impl MetricComparison {
    const TOLERANCE: f64 = 1e-9;

    pub fn new(metric: &str, before: f64, after: f64, parity: f64) -> Self {
        let change = if before.is_nan() || after.is_nan() {
            Change::Undefined
        } else {
            let gap_before = (before - parity).abs();
            let gap_after = (after - parity).abs();
            if gap_after < gap_before - Self::TOLERANCE {
                Change::Narrowed
            } else if gap_after > gap_before + Self::TOLERANCE {
                Change::Widened
            } else {
                Change::Unchanged
            }
        };

        Self {
            metric: metric.to_string(),
            before,
            after,
            parity,
            change,
        }
    }
}

/// Before/after comparison of the Reweighing transform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationSummary {
    pub weights: Reweighing,
    pub comparisons: Vec<MetricComparison>,
}

impl MitigationSummary {
    pub fn compare(weights: Reweighing, before: &FairnessSnapshot, after: &FairnessSnapshot) -> Self {
        let comparisons = before
            .disparities()
            .into_iter()
            .zip(after.disparities())
            .map(|((name, b, parity), (_, a, _))| MetricComparison::new(name, b, a, parity))
            .collect();
        Self { weights, comparisons }
    }

    pub fn count(&self, change: Change) -> usize {
        self.comparisons.iter().filter(|c| c.change == change).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub source: String,
    pub privileged_group: String,
    pub unprivileged_group: String,
    pub privileged_count: usize,
    pub unprivileged_count: usize,
    pub filter_stats: FilterStats,
}

impl DatasetInfo {
    fn describe(dataset: &CompasDataset) -> Self {
        let counts = dataset.group_counts();
        Self {
            source: dataset.source.clone(),
            privileged_group: dataset.groups.display_name(Group::Privileged),
            unprivileged_group: dataset.groups.display_name(Group::Unprivileged),
            privileged_count: counts.get(&Group::Privileged).copied().unwrap_or(0),
            unprivileged_count: counts.get(&Group::Unprivileged).copied().unwrap_or(0),
            filter_stats: dataset.filter_stats.clone(),
        }
    }
}

/// Complete audit results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResults {
    pub config: AuditConfig,
    pub dataset_info: DatasetInfo,
    pub original: FairnessSnapshot,
    pub reweighed: FairnessSnapshot,
    pub group_rates: GroupRates,
    pub mitigation: MitigationSummary,
    pub plots: Vec<PathBuf>,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// Main audit pipeline
pub struct AuditPipeline {
    config: AuditConfig,
    dataset: Option<CompasDataset>,
}

impl AuditPipeline {
    pub fn new(config: AuditConfig) -> Self {
        Self { config, dataset: None }
    }

    /// Pipeline over an already-loaded dataset
    pub fn with_dataset(config: AuditConfig, dataset: CompasDataset) -> Self {
        Self {
            config,
            dataset: Some(dataset),
        }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Load dataset based on configuration
    pub fn load_dataset(&mut self) -> Result<()> {
        self.config.validate()?;

        let dataset = match self.config.dataset {
            DataSource::Synthetic => {
                tracing::info!(
                    "Generating synthetic dataset ({} rows, seed {})",
                    self.config.synthetic_size,
                    self.config.seed
                );
                CompasDataset::synthetic(self.config.synthetic_size, &self.config)?
            }
            DataSource::Csv => {
                let path = Path::new(&self.config.input_path);
                tracing::info!("Loading COMPAS records from {}", path.display());
                CompasDataset::load_csv(path, &self.config)?
            }
        };

        tracing::info!(
            "Dataset loaded: {} rows after filtering ({} read)",
            dataset.len(),
            dataset.filter_stats.total_rows
        );

        self.dataset = Some(dataset);
        Ok(())
    }

    /// Run the full audit
    pub fn run(&mut self) -> Result<AuditResults> {
        self.config.validate()?;
        if self.dataset.is_none() {
            self.load_dataset()?;
        }
        let dataset = self
            .dataset
            .as_ref()
            .context("Dataset not loaded")?;
        dataset.ensure_groups_present()?;

        let threshold = self.config.threshold;

        let original_metric = DatasetMetric::from_labels(dataset);
        let original_classified = ClassificationMetric::new(dataset, threshold);
        let original = FairnessSnapshot::from_metrics(&original_metric, &original_classified);
        tracing::info!(
            "Original: SPD={:.4} DI={:.4} FPR diff={:.4} FNR diff={:.4}",
            original.statistical_parity_difference,
            original.disparate_impact,
            original.false_positive_rate_difference,
            original.false_negative_rate_difference
        );

        let group_rates = GroupRates::compute(dataset, &original_classified);

        let plots = if self.config.render_plots {
            plots::render_all(&group_rates, Path::new(&self.config.output_dir))?
        } else {
            Vec::new()
        };

        tracing::info!("Applying Reweighing");
        let (weights, transformed) = Reweighing::fit_transform(dataset)?;
        let reweighed = FairnessSnapshot::compute(&transformed, threshold);
        tracing::info!(
            "Reweighed: SPD={:.4} DI={:.4} FPR diff={:.4} FNR diff={:.4}",
            reweighed.statistical_parity_difference,
            reweighed.disparate_impact,
            reweighed.false_positive_rate_difference,
            reweighed.false_negative_rate_difference
        );

        let mitigation = MitigationSummary::compare(weights, &original, &reweighed);

        Ok(AuditResults {
            config: self.config.clone(),
            dataset_info: DatasetInfo::describe(dataset),
            original,
            reweighed,
            group_rates,
            mitigation,
            plots,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Save results to JSON file
    pub fn save_results(results: &AuditResults, output_path: &Path) -> Result<()> {
        std::fs::create_dir_all(output_path.parent().unwrap_or(Path::new(".")))?;
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(output_path, json)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        tracing::info!("Results saved to {}", output_path.display());
        Ok(())
    }

    /// Generate a markdown report
    pub fn generate_report(results: &AuditResults) -> Result<String> {
        let info = &results.dataset_info;
        let mut report = String::new();

        report.push_str("# COMPAS Fairness Audit Report\n\n");
        report.push_str(&format!("**Generated:** {}\n\n", results.timestamp.format("%Y-%m-%d %H:%M:%S UTC")));
        report.push_str(&format!("**Version:** {}\n\n", results.version));

        report.push_str("## Dataset\n\n");
        report.push_str(&format!("- **Source:** {}\n", info.source));
        report.push_str(&format!("- **Privileged group:** {} (n={})\n", info.privileged_group, info.privileged_count));
        report.push_str(&format!("- **Unprivileged group:** {} (n={})\n", info.unprivileged_group, info.unprivileged_count));
        report.push_str(&format!("- **High-risk threshold:** decile >= {}\n\n", results.config.threshold));

        report.push_str("### Filtering\n\n");
        report.push_str("| Stage | Rows remaining |\n");
        report.push_str("|-------|----------------|\n");
        for (stage, remaining) in info.filter_stats.stage_counts() {
            report.push_str(&format!("| {} | {} |\n", stage, remaining));
        }

        report.push_str("\n## Error Rates by Group\n\n");
        report.push_str("| Group | n | FPR | FNR | Actual recidivism | Predicted high risk |\n");
        report.push_str("|-------|---|-----|-----|-------------------|---------------------|\n");
        for g in results.group_rates.ordered() {
            report.push_str(&format!(
                "| {} | {} | {:.3} | {:.3} | {:.3} | {:.3} |\n",
                g.label, g.count, g.fpr, g.fnr, g.actual_recidivism_rate, g.predicted_high_risk_rate
            ));
        }

        report.push_str("\n## Reweighing\n\n");
        report.push_str("| Metric | Original | Reweighed | Parity | Change |\n");
        report.push_str("|--------|----------|-----------|--------|--------|\n");
        for c in &results.mitigation.comparisons {
            report.push_str(&format!(
                "| {} | {:.4} | {:.4} | {} | {:?} |\n",
                c.metric, c.before, c.after, c.parity, c.change
            ));
        }

        let w = &results.mitigation.weights;
        report.push_str("\n### Cell Weights\n\n");
        report.push_str(&format!("- Privileged, favorable: {:.4}\n", w.privileged_favorable));
        report.push_str(&format!("- Privileged, unfavorable: {:.4}\n", w.privileged_unfavorable));
        report.push_str(&format!("- Unprivileged, favorable: {:.4}\n", w.unprivileged_favorable));
        report.push_str(&format!("- Unprivileged, unfavorable: {:.4}\n", w.unprivileged_unfavorable));

        if !results.plots.is_empty() {
            report.push_str("\n## Charts\n\n");
            for path in &results.plots {
                report.push_str(&format!("- {}\n", path.display()));
            }
        }

        report.push_str("\n## Configuration\n\n");
        let config = serde_json::to_string_pretty(&results.config)
            .context("Failed to serialize configuration for report")?;
        report.push_str(&format!("```json\n{}\n```\n", config));

        Ok(report)
    }
}
