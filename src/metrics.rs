// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Group fairness metrics
//!
//! Implements the binary-label fairness measures used in the audit:
//! - Instance-weighted confusion matrix (positive class = recidivism / high risk)
//! - Dataset metrics: base rates, statistical parity difference, disparate impact
//! - Classification metrics: FPR/FNR/TPR differences, average odds, error rate
//!
//! Favorable outcome is "no recidivism". Every difference is
//! unprivileged minus privileged.

use crate::dataset::{CompasDataset, Defendant, Group};
use serde::{Deserialize, Serialize};

/// Weighted confusion matrix for binary classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Recidivated, predicted high risk
    pub tp: f64,
    /// Did not recidivate, predicted low risk
    pub tn: f64,
    /// Did not recidivate, predicted high risk
    pub fp: f64,
    /// Recidivated, predicted low risk
    pub fn_: f64,
}

impl ConfusionMatrix {
    /// Accumulate `(recidivated, predicted_high_risk, weight)` outcomes
    pub fn from_outcomes<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = (bool, bool, f64)>,
    {
        let mut matrix = Self::default();
        for (actual, predicted, weight) in outcomes {
            match (actual, predicted) {
                (true, true) => matrix.tp += weight,
                (false, false) => matrix.tn += weight,
                (false, true) => matrix.fp += weight,
                (true, false) => matrix.fn_ += weight,
            }
        }
        matrix
    }

    /// Confusion matrix of one group under a decile threshold
    pub fn for_group(dataset: &CompasDataset, group: Group, threshold: u8) -> Self {
        Self::from_defendants(dataset.group(group), threshold)
    }

    pub fn from_defendants<'a>(defendants: impl Iterator<Item = &'a Defendant>, threshold: u8) -> Self {
        Self::from_outcomes(
            defendants.map(|d| (d.recidivated(), d.predicted_high_risk(threshold), d.instance_weight)),
        )
    }

    /// Total weight
    pub fn total(&self) -> f64 {
        self.tp + self.tn + self.fp + self.fn_
    }

    fn ratio(numerator: f64, denominator: f64) -> f64 {
        if denominator == 0.0 {
            return 0.0;
        }
        numerator / denominator
    }

    /// False positive rate: FP / (FP + TN)
    pub fn fpr(&self) -> f64 {
        Self::ratio(self.fp, self.fp + self.tn)
    }

    /// False negative rate: FN / (FN + TP)
    pub fn fnr(&self) -> f64 {
        Self::ratio(self.fn_, self.fn_ + self.tp)
    }

    /// True positive rate (recall): TP / (TP + FN)
    pub fn tpr(&self) -> f64 {
        Self::ratio(self.tp, self.tp + self.fn_)
    }

    /// True negative rate (specificity): TN / (TN + FP)
    pub fn tnr(&self) -> f64 {
        Self::ratio(self.tn, self.tn + self.fp)
    }

    /// Precision: TP / (TP + FP)
    pub fn precision(&self) -> f64 {
        Self::ratio(self.tp, self.tp + self.fp)
    }

    /// Accuracy: (TP + TN) / Total
    pub fn accuracy(&self) -> f64 {
        Self::ratio(self.tp + self.tn, self.total())
    }

    pub fn error_rate(&self) -> f64 {
        Self::ratio(self.fp + self.fn_, self.total())
    }

    /// Share of the group that actually recidivated
    pub fn actual_positive_rate(&self) -> f64 {
        Self::ratio(self.tp + self.fn_, self.total())
    }

    /// Share of the group predicted high risk
    pub fn predicted_positive_rate(&self) -> f64 {
        Self::ratio(self.tp + self.fp, self.total())
    }
}

/// Weighted favorable-outcome tally for one group
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupBaseRate {
    pub instances: usize,
    pub weighted_instances: f64,
    pub weighted_favorable: f64,
}

impl GroupBaseRate {
    /// P(favorable | group)
    pub fn base_rate(&self) -> f64 {
        if self.weighted_instances == 0.0 {
            return 0.0;
        }
        self.weighted_favorable / self.weighted_instances
    }
}

/// Metrics over a single set of binary outcomes, compared across groups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMetric {
    pub privileged: GroupBaseRate,
    pub unprivileged: GroupBaseRate,
}

impl DatasetMetric {
    /// Metrics on the ground-truth labels
    pub fn from_labels(dataset: &CompasDataset) -> Self {
        Self::from_favorable(dataset, Defendant::is_favorable)
    }

    /// Metrics on thresholded predictions (predicted low risk is favorable)
    pub fn from_predictions(dataset: &CompasDataset, threshold: u8) -> Self {
        Self::from_favorable(dataset, |d| !d.predicted_high_risk(threshold))
    }

    fn from_favorable(dataset: &CompasDataset, favorable: impl Fn(&Defendant) -> bool) -> Self {
        let mut privileged = GroupBaseRate::default();
        let mut unprivileged = GroupBaseRate::default();

        for defendant in &dataset.defendants {
            let tally = match defendant.group {
                Group::Privileged => &mut privileged,
                Group::Unprivileged => &mut unprivileged,
            };
            tally.instances += 1;
            tally.weighted_instances += defendant.instance_weight;
            if favorable(defendant) {
                tally.weighted_favorable += defendant.instance_weight;
            }
        }

        Self { privileged, unprivileged }
    }

    /// P(fav | unprivileged) - P(fav | privileged)
    pub fn statistical_parity_difference(&self) -> f64 {
        self.unprivileged.base_rate() - self.privileged.base_rate()
    }

    /// Same quantity as statistical parity difference
    pub fn mean_difference(&self) -> f64 {
        self.statistical_parity_difference()
    }

    /// P(fav | unprivileged) / P(fav | privileged); NaN when the privileged rate is 0
    pub fn disparate_impact(&self) -> f64 {
        let privileged = self.privileged.base_rate();
        if privileged == 0.0 {
            tracing::warn!("Disparate impact undefined: privileged favorable rate is zero");
            return f64::NAN;
        }
        self.unprivileged.base_rate() / privileged
    }

    /// Overall weighted base rate
    pub fn base_rate(&self) -> f64 {
        let total = self.privileged.weighted_instances + self.unprivileged.weighted_instances;
        if total == 0.0 {
            return 0.0;
        }
        (self.privileged.weighted_favorable + self.unprivileged.weighted_favorable) / total
    }
}

/// Metrics comparing labels against thresholded decile predictions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationMetric {
    pub threshold: u8,
    pub privileged: ConfusionMatrix,
    pub unprivileged: ConfusionMatrix,
    /// Favorable-outcome rates of the predictions themselves
    pub predicted: DatasetMetric,
}

impl ClassificationMetric {
    pub fn new(dataset: &CompasDataset, threshold: u8) -> Self {
        Self {
            threshold,
            privileged: ConfusionMatrix::for_group(dataset, Group::Privileged, threshold),
            unprivileged: ConfusionMatrix::for_group(dataset, Group::Unprivileged, threshold),
            predicted: DatasetMetric::from_predictions(dataset, threshold),
        }
    }

    pub fn false_positive_rate_difference(&self) -> f64 {
        self.unprivileged.fpr() - self.privileged.fpr()
    }

    pub fn false_negative_rate_difference(&self) -> f64 {
        self.unprivileged.fnr() - self.privileged.fnr()
    }

    /// TPR difference
    pub fn equal_opportunity_difference(&self) -> f64 {
        self.unprivileged.tpr() - self.privileged.tpr()
    }

    /// Mean of the FPR and TPR differences
    pub fn average_odds_difference(&self) -> f64 {
        0.5 * (self.false_positive_rate_difference() + self.equal_opportunity_difference())
    }

    /// FPR difference with the favorable label (no recidivism) as the
    /// positive class, the convention AIF360 uses with `favorable_label=0`.
    /// A favorable false positive is a recidivist scored low risk, so this
    /// is the high-risk FNR difference.
    pub fn favorable_false_positive_rate_difference(&self) -> f64 {
        self.false_negative_rate_difference()
    }

    /// Favorable-positive FNR difference, equal to the high-risk FPR difference
    pub fn favorable_false_negative_rate_difference(&self) -> f64 {
        self.false_positive_rate_difference()
    }

    /// Favorable-positive TPR difference, i.e. the high-risk TNR difference
    pub fn favorable_equal_opportunity_difference(&self) -> f64 {
        self.unprivileged.tnr() - self.privileged.tnr()
    }

    pub fn favorable_average_odds_difference(&self) -> f64 {
        0.5 * (self.favorable_false_positive_rate_difference()
            + self.favorable_equal_opportunity_difference())
    }

    pub fn error_rate_difference(&self) -> f64 {
        self.unprivileged.error_rate() - self.privileged.error_rate()
    }

    /// Combined confusion matrix over both groups
    pub fn overall(&self) -> ConfusionMatrix {
        ConfusionMatrix {
            tp: self.privileged.tp + self.unprivileged.tp,
            tn: self.privileged.tn + self.unprivileged.tn,
            fp: self.privileged.fp + self.unprivileged.fp,
            fn_: self.privileged.fn_ + self.unprivileged.fn_,
        }
    }
}

/// Per-group error and outcome rates behind the comparison plots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupErrorRates {
    pub label: String,
    pub count: usize,
    pub fpr: f64,
    pub fnr: f64,
    pub actual_recidivism_rate: f64,
    pub predicted_high_risk_rate: f64,
}

impl GroupErrorRates {
    pub fn from_matrix(label: String, count: usize, matrix: &ConfusionMatrix) -> Self {
        Self {
            label,
            count,
            fpr: matrix.fpr(),
            fnr: matrix.fnr(),
            actual_recidivism_rate: matrix.actual_positive_rate(),
            predicted_high_risk_rate: matrix.predicted_positive_rate(),
        }
    }
}

/// Error rates for both groups, unprivileged first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRates {
    pub unprivileged: GroupErrorRates,
    pub privileged: GroupErrorRates,
}

impl GroupRates {
    pub fn compute(dataset: &CompasDataset, metric: &ClassificationMetric) -> Self {
        Self {
            unprivileged: GroupErrorRates::from_matrix(
                dataset.groups.display_name(Group::Unprivileged),
                metric.predicted.unprivileged.instances,
                &metric.unprivileged,
            ),
            privileged: GroupErrorRates::from_matrix(
                dataset.groups.display_name(Group::Privileged),
                metric.predicted.privileged.instances,
                &metric.privileged,
            ),
        }
    }

    /// Groups in plotting order
    pub fn ordered(&self) -> [&GroupErrorRates; 2] {
        [&self.unprivileged, &self.privileged]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::dataset::{FilterStats, GroupDefinition};

    fn defendant(group: Group, decile_score: u8, two_year_recid: u8) -> Defendant {
        Defendant {
            id: String::new(),
            race: String::new(),
            group,
            sex: None,
            age: None,
            age_cat: None,
            priors_count: None,
            c_charge_degree: "F".to_string(),
            decile_score,
            two_year_recid,
            instance_weight: 1.0,
        }
    }

    /// Privileged: 4 defendants, 3 favorable. Unprivileged: 4 defendants, 1 favorable.
    fn hand_dataset() -> CompasDataset {
        let defendants = vec![
            defendant(Group::Privileged, 2, 0),
            defendant(Group::Privileged, 6, 0),
            defendant(Group::Privileged, 3, 0),
            defendant(Group::Privileged, 8, 1),
            defendant(Group::Unprivileged, 7, 0),
            defendant(Group::Unprivileged, 9, 1),
            defendant(Group::Unprivileged, 4, 1),
            defendant(Group::Unprivileged, 6, 1),
        ];
        CompasDataset {
            source: "test".to_string(),
            groups: GroupDefinition::from_config(&AuditConfig::default()),
            filter_stats: FilterStats::default(),
            defendants,
        }
    }

    #[test]
    fn test_confusion_matrix_counts() {
        let cm = ConfusionMatrix::from_outcomes(vec![
            (true, true, 1.0),
            (true, false, 1.0),
            (false, true, 1.0),
            (false, false, 1.0),
            (false, false, 1.0),
        ]);

        assert_eq!(cm.tp, 1.0);
        assert_eq!(cm.fn_, 1.0);
        assert_eq!(cm.fp, 1.0);
        assert_eq!(cm.tn, 2.0);
        assert!((cm.fpr() - 1.0 / 3.0).abs() < 1e-9);
        assert!((cm.fnr() - 0.5).abs() < 1e-9);
        assert!((cm.accuracy() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_rates_bounded_and_complementary() {
        let dataset = crate::dataset::CompasDataset::synthetic(1500, &AuditConfig::default()).unwrap();
        for group in [Group::Privileged, Group::Unprivileged] {
            let cm = ConfusionMatrix::for_group(&dataset, group, 5);
            for rate in [cm.fpr(), cm.fnr(), cm.tpr(), cm.tnr(), cm.precision(), cm.accuracy()] {
                assert!((0.0..=1.0).contains(&rate));
            }
            assert!((cm.fnr() + cm.tpr() - 1.0).abs() < 1e-9);
            assert!((cm.fpr() + cm.tnr() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_matrix_rates_are_zero() {
        let cm = ConfusionMatrix::default();
        assert_eq!(cm.fpr(), 0.0);
        assert_eq!(cm.fnr(), 0.0);
        assert_eq!(cm.accuracy(), 0.0);
    }

    #[test]
    fn test_dataset_metric_hand_computed() {
        let metric = DatasetMetric::from_labels(&hand_dataset());

        assert!((metric.privileged.base_rate() - 0.75).abs() < 1e-9);
        assert!((metric.unprivileged.base_rate() - 0.25).abs() < 1e-9);
        assert!((metric.statistical_parity_difference() - (-0.5)).abs() < 1e-9);
        assert!((metric.mean_difference() - metric.statistical_parity_difference()).abs() < 1e-12);
        assert!((metric.disparate_impact() - 1.0 / 3.0).abs() < 1e-9);
        assert!((metric.base_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_disparate_impact_undefined() {
        let mut dataset = hand_dataset();
        for d in dataset.defendants.iter_mut().filter(|d| d.group == Group::Privileged) {
            d.two_year_recid = 1;
        }
        assert!(DatasetMetric::from_labels(&dataset).disparate_impact().is_nan());
    }

    #[test]
    fn test_classification_metric_hand_computed() {
        let metric = ClassificationMetric::new(&hand_dataset(), 5);

        // Privileged: fav scores 2,6,3 -> one FP of three negatives; recid 8 -> TP
        assert!((metric.privileged.fpr() - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(metric.privileged.fnr(), 0.0);
        // Unprivileged: fav 7 -> FP; recid 9,6 -> TP, 4 -> FN
        assert_eq!(metric.unprivileged.fpr(), 1.0);
        assert!((metric.unprivileged.fnr() - 1.0 / 3.0).abs() < 1e-9);

        assert!((metric.false_positive_rate_difference() - 2.0 / 3.0).abs() < 1e-9);
        assert!((metric.false_negative_rate_difference() - 1.0 / 3.0).abs() < 1e-9);
        assert!((metric.equal_opportunity_difference() - (-1.0 / 3.0)).abs() < 1e-9);
        assert!((metric.average_odds_difference() - 1.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_favorable_positive_differences() {
        let metric = ClassificationMetric::new(&hand_dataset(), 5);

        // Favorable positive: privileged fav 2,3 -> TP, 6 -> FN; recid 8 -> TN
        // Unprivileged: fav 7 -> FN; recid 9,6 -> TN, 4 -> FP
        assert!((metric.favorable_false_positive_rate_difference() - 1.0 / 3.0).abs() < 1e-9);
        assert!((metric.favorable_false_negative_rate_difference() - 2.0 / 3.0).abs() < 1e-9);
        assert!((metric.favorable_equal_opportunity_difference() - (-2.0 / 3.0)).abs() < 1e-9);
        assert!((metric.favorable_average_odds_difference() - (-1.0 / 6.0)).abs() < 1e-9);
        assert_eq!(metric.overall().total(), 8.0);
    }

    #[test]
    fn test_instance_weights_scale_counts() {
        let mut dataset = hand_dataset();
        for d in &mut dataset.defendants {
            d.instance_weight = 2.5;
        }
        let metric = ClassificationMetric::new(&dataset, 5);
        assert!((metric.overall().total() - 20.0).abs() < 1e-9);
        // Uniform weights leave rates unchanged
        assert!((metric.privileged.fpr() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_group_rates_order_and_values() {
        let dataset = hand_dataset();
        let metric = ClassificationMetric::new(&dataset, 5);
        let rates = GroupRates::compute(&dataset, &metric);

        let [first, second] = rates.ordered();
        assert_eq!(first.label, "African-American");
        assert_eq!(second.label, "Caucasian");
        assert_eq!(first.count, 4);
        assert!((first.actual_recidivism_rate - 0.75).abs() < 1e-9);
        assert!((first.predicted_high_risk_rate - 0.75).abs() < 1e-9);
        assert!((second.predicted_high_risk_rate - 0.5).abs() < 1e-9);
    }
}
