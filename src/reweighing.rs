// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Reweighing pre-processing mitigation (Kamiran & Calders, 2012)
//!
//! Each (group, label) cell receives the weight
//! `W(g, l) = (W_g * W_l) / (W * W_gl)`, the ratio between the weight the cell
//! would hold if group and label were independent and the weight it holds.
//! After reweighing, both groups share the same weighted favorable base rate.

use crate::dataset::{CompasDataset, Defendant, Group};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Fitted cell weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reweighing {
    pub privileged_favorable: f64,
    pub privileged_unfavorable: f64,
    pub unprivileged_favorable: f64,
    pub unprivileged_unfavorable: f64,
}

#[derive(Default)]
struct CellTotals {
    privileged_favorable: f64,
    privileged_unfavorable: f64,
    unprivileged_favorable: f64,
    unprivileged_unfavorable: f64,
}

impl CellTotals {
    fn tally(defendants: &[Defendant]) -> Self {
        let mut totals = Self::default();
        for d in defendants {
            let cell = match (d.group, d.is_favorable()) {
                (Group::Privileged, true) => &mut totals.privileged_favorable,
                (Group::Privileged, false) => &mut totals.privileged_unfavorable,
                (Group::Unprivileged, true) => &mut totals.unprivileged_favorable,
                (Group::Unprivileged, false) => &mut totals.unprivileged_unfavorable,
            };
            *cell += d.instance_weight;
        }
        totals
    }
}

impl Reweighing {
    /// Compute cell weights from the current instance weights
    pub fn fit(dataset: &CompasDataset) -> Result<Self> {
        let cells = CellTotals::tally(&dataset.defendants);

        let privileged = cells.privileged_favorable + cells.privileged_unfavorable;
        let unprivileged = cells.unprivileged_favorable + cells.unprivileged_unfavorable;
        let favorable = cells.privileged_favorable + cells.unprivileged_favorable;
        let unfavorable = cells.privileged_unfavorable + cells.unprivileged_unfavorable;
        let total = privileged + unprivileged;

        let weight = |group: f64, label: f64, cell: f64, name: &str| -> Result<f64> {
            if cell <= 0.0 {
                anyhow::bail!("Cannot reweigh: the {} cell of {} is empty", name, dataset.source);
            }
            Ok(group * label / (total * cell))
        };

        let fitted = Self {
            privileged_favorable: weight(privileged, favorable, cells.privileged_favorable, "privileged/favorable")?,
            privileged_unfavorable: weight(privileged, unfavorable, cells.privileged_unfavorable, "privileged/unfavorable")?,
            unprivileged_favorable: weight(unprivileged, favorable, cells.unprivileged_favorable, "unprivileged/favorable")?,
            unprivileged_unfavorable: weight(unprivileged, unfavorable, cells.unprivileged_unfavorable, "unprivileged/unfavorable")?,
        };

        tracing::debug!(
            "Reweighing weights: priv/fav={:.4} priv/unfav={:.4} unpriv/fav={:.4} unpriv/unfav={:.4}",
            fitted.privileged_favorable,
            fitted.privileged_unfavorable,
            fitted.unprivileged_favorable,
            fitted.unprivileged_unfavorable
        );

        Ok(fitted)
    }

    /// Weight multiplier for a defendant's cell
    pub fn weight_for(&self, defendant: &Defendant) -> f64 {
        match (defendant.group, defendant.is_favorable()) {
            (Group::Privileged, true) => self.privileged_favorable,
            (Group::Privileged, false) => self.privileged_unfavorable,
            (Group::Unprivileged, true) => self.unprivileged_favorable,
            (Group::Unprivileged, false) => self.unprivileged_unfavorable,
        }
    }

    /// Copy of the dataset with rescaled instance weights; labels untouched
    pub fn transform(&self, dataset: &CompasDataset) -> CompasDataset {
        let mut transformed = dataset.clone();
        for defendant in &mut transformed.defendants {
            defendant.instance_weight *= self.weight_for(defendant);
        }
        transformed
    }

    pub fn fit_transform(dataset: &CompasDataset) -> Result<(Self, CompasDataset)> {
        let fitted = Self::fit(dataset)?;
        let transformed = fitted.transform(dataset);
        Ok((fitted, transformed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::metrics::DatasetMetric;

    #[test]
    fn test_reweighing_equalizes_base_rates() {
        let dataset = CompasDataset::synthetic(3000, &AuditConfig::default()).unwrap();
        let before = DatasetMetric::from_labels(&dataset);
        assert!(before.statistical_parity_difference() < -0.05);

        let (_, transformed) = Reweighing::fit_transform(&dataset).unwrap();
        let after = DatasetMetric::from_labels(&transformed);

        assert!(after.statistical_parity_difference().abs() < 1e-9);
        assert!((after.disparate_impact() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reweighing_preserves_total_weight() {
        let dataset = CompasDataset::synthetic(1000, &AuditConfig::default()).unwrap();
        let (_, transformed) = Reweighing::fit_transform(&dataset).unwrap();

        assert!((transformed.total_weight() - dataset.total_weight()).abs() < 1e-6);
        assert_eq!(transformed.len(), dataset.len());
        assert!(transformed
            .defendants
            .iter()
            .zip(&dataset.defendants)
            .all(|(a, b)| a.two_year_recid == b.two_year_recid && a.decile_score == b.decile_score));
    }

    #[test]
    fn test_disadvantaged_cells_are_upweighted() {
        let dataset = CompasDataset::synthetic(3000, &AuditConfig::default()).unwrap();
        let fitted = Reweighing::fit(&dataset).unwrap();

        assert!(fitted.unprivileged_favorable > 1.0);
        assert!(fitted.privileged_unfavorable > 1.0);
        assert!(fitted.unprivileged_unfavorable < 1.0);
        assert!(fitted.privileged_favorable < 1.0);
    }

    #[test]
    fn test_empty_cell_is_an_error() {
        let mut dataset = CompasDataset::synthetic(500, &AuditConfig::default()).unwrap();
        for d in dataset.defendants.iter_mut().filter(|d| d.group == Group::Privileged) {
            d.two_year_recid = 0;
        }
        assert!(Reweighing::fit(&dataset).is_err());
    }
}
