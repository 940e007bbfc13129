// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Group-fairness audit of the COMPAS recidivism risk scores
//!
//! This crate provides:
//! - Loading and ProPublica filtering of `compas-scores-two-years.csv`
//! - Dataset metrics (statistical parity, disparate impact)
//! - Classification metrics (FPR/FNR/TPR differences) for the decile threshold
//! - Reweighing bias mitigation and before/after comparison
//! - PNG comparison charts and JSON/markdown reports

pub mod audit;
pub mod config;
pub mod dataset;
pub mod metrics;
pub mod plots;
pub mod reweighing;

pub use audit::{AuditPipeline, AuditResults, FairnessSnapshot, MitigationSummary};
pub use config::{AuditConfig, DataSource};
pub use dataset::{CompasDataset, Defendant, Group, GroupDefinition};
pub use metrics::{ClassificationMetric, ConfusionMatrix, DatasetMetric, GroupRates};
pub use reweighing::Reweighing;
