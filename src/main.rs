// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! COMPAS fairness audit CLI
//!
//! Usage:
//!   compas-audit --input compas-scores-two-years.csv
//!   compas-audit --dataset synthetic --seed 7 --output audit-out --format both

use anyhow::Result;
use clap::{Parser, ValueEnum};
use compas_audit::audit::{AuditPipeline, AuditResults, Change, FairnessSnapshot};
use compas_audit::config::{AuditConfig, DataSource};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Json,
    Markdown,
    Both,
    None,
}

impl ReportFormat {
    fn json(self) -> bool {
        matches!(self, ReportFormat::Json | ReportFormat::Both)
    }

    fn markdown(self) -> bool {
        matches!(self, ReportFormat::Markdown | ReportFormat::Both)
    }
}

#[derive(Parser, Debug)]
#[command(name = "compas-audit")]
#[command(about = "Audit COMPAS risk scores for group fairness and evaluate Reweighing")]
#[command(version)]
struct Args {
    /// JSON config file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Record source
    #[arg(short, long, value_enum)]
    dataset: Option<DataSource>,

    /// Path to compas-scores-two-years.csv
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Random seed for the synthetic dataset
    #[arg(short, long)]
    seed: Option<u64>,

    /// Decile score at or above which a defendant counts as high risk
    #[arg(short, long)]
    threshold: Option<u8>,

    /// Output directory for charts and reports
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Report format
    #[arg(short, long, value_enum, default_value = "none")]
    format: ReportFormat,

    /// Skip rendering the PNG charts
    #[arg(long)]
    no_plots: bool,
}

impl Args {
    fn into_config(self) -> Result<(AuditConfig, ReportFormat)> {
        let mut config = match &self.config {
            Some(path) => AuditConfig::from_file(path)?,
            None => AuditConfig::default(),
        };

        if let Some(dataset) = self.dataset {
            config.dataset = dataset;
        }
        if let Some(input) = self.input {
            config.input_path = input.to_string_lossy().to_string();
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(output) = self.output {
            config.output_dir = output.to_string_lossy().to_string();
        }
        if self.no_plots {
            config.render_plots = false;
        }

        config.validate()?;
        Ok((config, self.format))
    }
}

fn print_snapshot(snapshot: &FairnessSnapshot) {
    println!("Statistical Parity Difference: {:.4}", snapshot.statistical_parity_difference);
    println!("Disparate Impact: {:.4}", snapshot.disparate_impact);
    println!("Mean Difference: {:.4}", snapshot.mean_difference);
    println!("False Positive Rate Difference: {:.4}", snapshot.favorable_false_positive_rate_difference);
    println!("False Negative Rate Difference: {:.4}", snapshot.favorable_false_negative_rate_difference);
    println!("Equal Opportunity Difference: {:.4}", snapshot.favorable_equal_opportunity_difference);
    println!("Average Odds Difference: {:.4}", snapshot.favorable_average_odds_difference);
    println!("(error rates above take \"no recidivism\" as the positive class)");
    println!("High-Risk FPR Difference: {:.4}", snapshot.false_positive_rate_difference);
    println!("High-Risk FNR Difference: {:.4}", snapshot.false_negative_rate_difference);
    println!("High-Risk TPR Difference: {:.4}", snapshot.equal_opportunity_difference);
}

fn print_summary(results: &AuditResults) {
    let info = &results.dataset_info;

    println!("\n{}", "=".repeat(70));
    println!("COMPAS FAIRNESS AUDIT");
    println!("{}", "=".repeat(70));
    println!(
        "Rows after ProPublica filter: {} of {}",
        info.filter_stats.after_propublica_filter(),
        info.filter_stats.total_rows
    );
    println!(
        "Rows compared: {} ({} {}, {} {})",
        info.filter_stats.retained,
        info.unprivileged_count,
        info.unprivileged_group,
        info.privileged_count,
        info.privileged_group
    );

    println!("\nOriginal dataset:");
    println!("{:-<70}", "");
    print_snapshot(&results.original);

    println!();
    for g in results.group_rates.ordered() {
        println!("{} FPR: {:.3}, FNR: {:.3}", g.label, g.fpr, g.fnr);
    }

    println!("\nAfter Reweighing:");
    println!("{:-<70}", "");
    print_snapshot(&results.reweighed);

    println!("\nMitigation effect:");
    println!("{:-<70}", "");
    println!("{:<42} {:>9} {:>9} {:>8}", "Metric", "Before", "After", "Change");
    for c in &results.mitigation.comparisons {
        let change = format!("{:?}", c.change);
        println!("{:<42} {:>9.4} {:>9.4} {:>8}", c.metric, c.before, c.after, change);
    }
    println!("{:-<70}", "");
    println!(
        "{} narrowed, {} widened, {} unchanged",
        results.mitigation.count(Change::Narrowed),
        results.mitigation.count(Change::Widened),
        results.mitigation.count(Change::Unchanged)
    );
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (config, format) = Args::parse().into_config()?;

    tracing::info!("COMPAS Fairness Audit");
    tracing::info!("=====================");
    tracing::info!("Dataset: {:?}", config.dataset);
    tracing::info!("Threshold: decile >= {}", config.threshold);

    let output_dir = PathBuf::from(&config.output_dir);
    let mut pipeline = AuditPipeline::new(config);
    let results = pipeline.run()?;

    print_summary(&results);

    for path in &results.plots {
        println!("Chart saved to: {}", path.display());
    }

    let timestamp = results.timestamp.format("%Y%m%d_%H%M%S");

    if format.json() {
        let json_path = output_dir.join(format!("audit_{}.json", timestamp));
        AuditPipeline::save_results(&results, &json_path)?;
        println!("JSON results saved to: {}", json_path.display());
    }

    if format.markdown() {
        std::fs::create_dir_all(&output_dir)?;
        let report = AuditPipeline::generate_report(&results)?;
        let md_path = output_dir.join(format!("audit_{}.md", timestamp));
        std::fs::write(&md_path, report)?;
        println!("Markdown report saved to: {}", md_path.display());
    }

    println!("\nAudit complete!");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_format_rejected() {
        assert!(Args::try_parse_from(["compas-audit", "--format", "jsn"]).is_err());
        assert!(Args::try_parse_from(["compas-audit", "--dataset", "parquet"]).is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::try_parse_from([
            "compas-audit",
            "--dataset",
            "synthetic",
            "--threshold",
            "7",
            "--format",
            "both",
            "--no-plots",
        ])
        .unwrap();
        let (config, format) = args.into_config().unwrap();

        assert_eq!(config.dataset, DataSource::Synthetic);
        assert_eq!(config.threshold, 7);
        assert!(!config.render_plots);
        assert!(format.json() && format.markdown());
    }

    #[test]
    fn test_out_of_range_threshold_flag_fails() {
        let args = Args::try_parse_from(["compas-audit", "--threshold", "0"]).unwrap();
        assert!(args.into_config().is_err());
    }
}
