// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! COMPAS defendant records: CSV loading, ProPublica filtering and group assignment

use crate::config::AuditConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

/// Protected-attribute group of a defendant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Group {
    Privileged,
    Unprivileged,
}

impl Group {
    /// Binary encoding of the protected attribute (privileged = 1)
    pub fn to_binary(&self) -> u8 {
        match self {
            Group::Privileged => 1,
            Group::Unprivileged => 0,
        }
    }
}

/// Maps raw race values onto the two compared groups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub privileged: Vec<String>,
    pub unprivileged: Vec<String>,
}

impl GroupDefinition {
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            privileged: config.privileged_races.clone(),
            unprivileged: config.unprivileged_races.clone(),
        }
    }

    /// Group for a race value, `None` when the race is in neither group
    pub fn classify(&self, race: &str) -> Option<Group> {
        let race = race.trim();
        if self.privileged.iter().any(|r| r.eq_ignore_ascii_case(race)) {
            Some(Group::Privileged)
        } else if self.unprivileged.iter().any(|r| r.eq_ignore_ascii_case(race)) {
            Some(Group::Unprivileged)
        } else {
            None
        }
    }

    /// Human-readable name of a group, used for plot axes and reports
    pub fn display_name(&self, group: Group) -> String {
        match group {
            Group::Privileged => self.privileged.join("/"),
            Group::Unprivileged => self.unprivileged.join("/"),
        }
    }
}

/// One row of `compas-scores-two-years.csv`, before filtering
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub row: usize,
    pub id: String,
    pub race: String,
    pub sex: Option<String>,
    pub age: Option<u32>,
    pub age_cat: Option<String>,
    pub priors_count: Option<u32>,
    pub days_b_screening_arrest: Option<f64>,
    pub is_recid: i32,
    pub c_charge_degree: String,
    pub score_text: Option<String>,
    pub decile_score: i32,
    pub two_year_recid: i32,
}

/// A defendant retained for analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defendant {
    pub id: String,
    pub race: String,
    pub group: Group,
    pub sex: Option<String>,
    pub age: Option<u32>,
    pub age_cat: Option<String>,
    pub priors_count: Option<u32>,
    pub c_charge_degree: String,
    /// COMPAS risk decile, 1..=10
    pub decile_score: u8,
    /// Ground truth: 1 if the defendant recidivated within two years
    pub two_year_recid: u8,
    /// Instance weight; 1.0 until a mitigation transform rescales it
    pub instance_weight: f64,
}

impl Defendant {
    /// No recidivism is the favorable outcome
    pub fn is_favorable(&self) -> bool {
        self.two_year_recid == 0
    }

    pub fn recidivated(&self) -> bool {
        self.two_year_recid == 1
    }

    /// Thresholded risk prediction
    pub fn predicted_high_risk(&self, threshold: u8) -> bool {
        self.decile_score >= threshold
    }

    fn from_raw(raw: RawRecord, group: Group) -> Result<Self> {
        let decile_score = u8::try_from(raw.decile_score)
            .ok()
            .filter(|d| (1..=10).contains(d))
            .with_context(|| {
                format!("Row {}: decile_score {} is outside 1..=10", raw.row, raw.decile_score)
            })?;
        let two_year_recid = match raw.two_year_recid {
            0 => 0,
            1 => 1,
            other => anyhow::bail!("Row {}: two_year_recid must be 0 or 1, got {}", raw.row, other),
        };

        Ok(Self {
            id: raw.id,
            race: raw.race,
            group,
            sex: raw.sex,
            age: raw.age,
            age_cat: raw.age_cat,
            priors_count: raw.priors_count,
            c_charge_degree: raw.c_charge_degree,
            decile_score,
            two_year_recid,
            instance_weight: 1.0,
        })
    }
}

/// Row counts removed at each filtering stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    pub total_rows: usize,
    pub missing_screening_days: usize,
    pub outside_screening_window: usize,
    pub unknown_recidivism: usize,
    pub ordinary_traffic: usize,
    pub missing_score_text: usize,
    pub outside_groups: usize,
    pub retained: usize,
}

impl FilterStats {
    /// Rows remaining after each stage, in application order
    pub fn stage_counts(&self) -> Vec<(&'static str, usize)> {
        let mut remaining = self.total_rows;
        let mut stages = vec![("loaded", remaining)];
        for (name, dropped) in [
            ("screening days present", self.missing_screening_days),
            ("screening window", self.outside_screening_window),
            ("is_recid known", self.unknown_recidivism),
            ("charge degree", self.ordinary_traffic),
            ("score text present", self.missing_score_text),
            ("compared groups", self.outside_groups),
        ] {
            remaining -= dropped;
            stages.push((name, remaining));
        }
        stages
    }

    /// Rows surviving the ProPublica filter, before group selection
    pub fn after_propublica_filter(&self) -> usize {
        self.retained + self.outside_groups
    }
}

/// The ProPublica two-year analysis filter
#[derive(Debug, Clone, Copy)]
pub struct ProPublicaFilter {
    pub screening_window_days: f64,
}

impl Default for ProPublicaFilter {
    fn default() -> Self {
        Self { screening_window_days: 30.0 }
    }
}

impl ProPublicaFilter {
    /// Apply the filter, recording every drop in `stats`
    pub fn apply(&self, records: Vec<RawRecord>, stats: &mut FilterStats) -> Vec<RawRecord> {
        stats.total_rows += records.len();
        records
            .into_iter()
            .filter(|r| {
                let Some(days) = r.days_b_screening_arrest else {
                    stats.missing_screening_days += 1;
                    return false;
                };
                if days.abs() > self.screening_window_days {
                    stats.outside_screening_window += 1;
                    return false;
                }
                if r.is_recid == -1 {
                    stats.unknown_recidivism += 1;
                    return false;
                }
                if r.c_charge_degree == "O" {
                    stats.ordinary_traffic += 1;
                    return false;
                }
                if r.score_text.as_deref().map_or(true, |s| s == "N/A") {
                    stats.missing_score_text += 1;
                    return false;
                }
                true
            })
            .collect()
    }
}

/// Column positions resolved from the CSV header.
///
/// The ProPublica file repeats `decile_score` and `priors_count`; the first
/// occurrence is the one used.
struct ColumnIndex {
    id: Option<usize>,
    race: usize,
    sex: Option<usize>,
    age: Option<usize>,
    age_cat: Option<usize>,
    priors_count: Option<usize>,
    days_b_screening_arrest: usize,
    is_recid: usize,
    c_charge_degree: usize,
    score_text: usize,
    decile_score: usize,
    two_year_recid: usize,
}

impl ColumnIndex {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let require = |name: &str| {
            find(name).with_context(|| format!("Missing required column '{}'", name))
        };

        Ok(Self {
            id: find("id"),
            race: require("race")?,
            sex: find("sex"),
            age: find("age"),
            age_cat: find("age_cat"),
            priors_count: find("priors_count"),
            days_b_screening_arrest: require("days_b_screening_arrest")?,
            is_recid: require("is_recid")?,
            c_charge_degree: require("c_charge_degree")?,
            score_text: require("score_text")?,
            decile_score: require("decile_score")?,
            two_year_recid: require("two_year_recid")?,
        })
    }

    fn parse(&self, record: &csv::StringRecord, row: usize) -> Result<RawRecord> {
        let text = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");
        let optional = |idx: Option<usize>| {
            idx.map(text).filter(|s| !s.is_empty()).map(str::to_string)
        };
        let integer = |idx: usize, name: &str| -> Result<i32> {
            text(idx)
                .parse::<i32>()
                .with_context(|| format!("Row {}: invalid {} '{}'", row, name, text(idx)))
        };

        let days_b_screening_arrest = match text(self.days_b_screening_arrest) {
            "" | "NA" | "nan" => None,
            value => Some(value.parse::<f64>().with_context(|| {
                format!("Row {}: invalid days_b_screening_arrest '{}'", row, value)
            })?),
        };

        Ok(RawRecord {
            row,
            id: optional(self.id).unwrap_or_else(|| format!("row_{}", row)),
            race: text(self.race).to_string(),
            sex: optional(self.sex),
            age: optional(self.age).and_then(|v| v.parse().ok()),
            age_cat: optional(self.age_cat),
            priors_count: optional(self.priors_count).and_then(|v| v.parse().ok()),
            days_b_screening_arrest,
            is_recid: integer(self.is_recid, "is_recid")?,
            c_charge_degree: text(self.c_charge_degree).to_string(),
            score_text: optional(Some(self.score_text)),
            decile_score: integer(self.decile_score, "decile_score")?,
            two_year_recid: integer(self.two_year_recid, "two_year_recid")?,
        })
    }
}

/// Filtered COMPAS records ready for fairness analysis
#[derive(Debug, Clone)]
pub struct CompasDataset {
    /// Where the records came from (file path or "synthetic")
    pub source: String,
    pub groups: GroupDefinition,
    pub defendants: Vec<Defendant>,
    pub filter_stats: FilterStats,
}

impl CompasDataset {
    /// Load and filter `compas-scores-two-years.csv`
    pub fn load_csv(path: &Path, config: &AuditConfig) -> Result<Self> {
        let records = Self::read_raw_records(path)?;
        Self::from_raw(records, config, &path.display().to_string())
    }

    /// Parse every row of the CSV without filtering
    pub fn read_raw_records(path: &Path) -> Result<Vec<RawRecord>> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open COMPAS file: {}", path.display()))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read header of {}", path.display()))?
            .clone();
        let columns = ColumnIndex::from_headers(&headers)
            .with_context(|| format!("Unexpected schema in {}", path.display()))?;

        let mut records = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            // header is line 1
            let row = idx + 2;
            let record = result
                .with_context(|| format!("Failed to read record {} in {}", row, path.display()))?;
            records.push(columns.parse(&record, row)?);
        }

        tracing::debug!("Read {} raw rows from {}", records.len(), path.display());
        Ok(records)
    }

    /// Filter raw records and keep the two compared groups
    pub fn from_raw(records: Vec<RawRecord>, config: &AuditConfig, source: &str) -> Result<Self> {
        let groups = GroupDefinition::from_config(config);
        let filter = ProPublicaFilter {
            screening_window_days: config.screening_window_days,
        };

        let mut filter_stats = FilterStats::default();
        let filtered = filter.apply(records, &mut filter_stats);
        tracing::info!(
            "ProPublica filter kept {} of {} rows",
            filtered.len(),
            filter_stats.total_rows
        );

        let mut defendants = Vec::with_capacity(filtered.len());
        for raw in filtered {
            match groups.classify(&raw.race) {
                Some(group) => defendants.push(Defendant::from_raw(raw, group)?),
                None => filter_stats.outside_groups += 1,
            }
        }
        filter_stats.retained = defendants.len();

        if filter_stats.outside_groups > 0 {
            tracing::info!(
                "Excluded {} rows whose race is in neither compared group",
                filter_stats.outside_groups
            );
        }

        Ok(Self {
            source: source.to_string(),
            groups,
            defendants,
            filter_stats,
        })
    }

    /// Generate a seeded dataset with a built-in group disparity.
    ///
    /// Unprivileged defendants have a higher recidivism base rate and their
    /// decile scores are shifted up by one, so non-recidivists in that group
    /// are flagged high risk more often.
    pub fn synthetic(size: usize, config: &AuditConfig) -> Result<Self> {
        let records = synthetic_records(size, config);
        Self::from_raw(records, config, "synthetic")
    }

    pub fn len(&self) -> usize {
        self.defendants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defendants.is_empty()
    }

    /// Defendants belonging to one group
    pub fn group(&self, group: Group) -> impl Iterator<Item = &Defendant> {
        self.defendants.iter().filter(move |d| d.group == group)
    }

    /// Number of defendants per group
    pub fn group_counts(&self) -> HashMap<Group, usize> {
        let mut counts = HashMap::new();
        for defendant in &self.defendants {
            *counts.entry(defendant.group).or_insert(0) += 1;
        }
        counts
    }

    /// Fail when either compared group is empty
    pub fn ensure_groups_present(&self) -> Result<()> {
        let counts = self.group_counts();
        for group in [Group::Privileged, Group::Unprivileged] {
            if counts.get(&group).copied().unwrap_or(0) == 0 {
                anyhow::bail!(
                    "No {:?} defendants ({}) remain after filtering {}",
                    group,
                    self.groups.display_name(group),
                    self.source
                );
            }
        }
        Ok(())
    }

    /// Sum of instance weights
    pub fn total_weight(&self) -> f64 {
        self.defendants.iter().map(|d| d.instance_weight).sum()
    }
}

fn synthetic_records(size: usize, config: &AuditConfig) -> Vec<RawRecord> {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let privileged = config
        .privileged_races
        .first()
        .cloned()
        .unwrap_or_else(|| "Caucasian".to_string());
    let unprivileged = config
        .unprivileged_races
        .first()
        .cloned()
        .unwrap_or_else(|| "African-American".to_string());

    (0..size)
        .map(|i| {
            let roll: f64 = rng.gen();
            let (race, recid_rate, score_shift) = if roll < 0.55 {
                (unprivileged.clone(), 0.52, 1)
            } else if roll < 0.95 {
                (privileged.clone(), 0.39, 0)
            } else {
                ("Other".to_string(), 0.45, 0)
            };

            let recidivated = rng.gen_bool(recid_rate);
            let base_score: i32 = if recidivated {
                rng.gen_range(3..=10)
            } else {
                rng.gen_range(1..=7)
            };
            let decile_score = (base_score + score_shift).min(10);
            let score_text = match decile_score {
                1..=4 => "Low",
                5..=7 => "Medium",
                _ => "High",
            };

            let days_b_screening_arrest = match rng.gen_range(0..100) {
                0..=2 => None,
                3..=5 => Some(rng.gen_range(31.0..400.0)),
                _ => Some(rng.gen_range(-5.0..=5.0_f64).round()),
            };
            let is_recid = if rng.gen_ratio(1, 50) {
                -1
            } else {
                i32::from(recidivated)
            };
            let c_charge_degree = match rng.gen_range(0..100) {
                0 => "O",
                1..=64 => "F",
                _ => "M",
            };
            let age: u32 = rng.gen_range(18..70);
            let age_cat = match age {
                0..=24 => "Less than 25",
                25..=45 => "25 - 45",
                _ => "Greater than 45",
            };

            RawRecord {
                row: i + 2,
                id: format!("synthetic_{}", i),
                race,
                sex: Some(if rng.gen_bool(0.8) { "Male" } else { "Female" }.to_string()),
                age: Some(age),
                age_cat: Some(age_cat.to_string()),
                priors_count: Some(rng.gen_range(0..15)),
                days_b_screening_arrest,
                is_recid,
                c_charge_degree: c_charge_degree.to_string(),
                score_text: Some(score_text.to_string()),
                decile_score,
                two_year_recid: i32::from(recidivated),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "id,sex,age,age_cat,race,decile_score,priors_count,days_b_screening_arrest,c_charge_degree,is_recid,decile_score,score_text,priors_count,two_year_recid";

    fn write_csv(rows: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        file
    }

    fn raw(race: &str, days: Option<f64>, is_recid: i32, degree: &str, score_text: Option<&str>) -> RawRecord {
        RawRecord {
            row: 2,
            id: "1".to_string(),
            race: race.to_string(),
            sex: None,
            age: None,
            age_cat: None,
            priors_count: None,
            days_b_screening_arrest: days,
            is_recid,
            c_charge_degree: degree.to_string(),
            score_text: score_text.map(str::to_string),
            decile_score: 5,
            two_year_recid: 1,
        }
    }

    #[test]
    fn test_group_classification() {
        let groups = GroupDefinition::from_config(&AuditConfig::default());
        assert_eq!(groups.classify("Caucasian"), Some(Group::Privileged));
        assert_eq!(groups.classify("african-american"), Some(Group::Unprivileged));
        assert_eq!(groups.classify("Hispanic"), None);
        assert_eq!(groups.display_name(Group::Unprivileged), "African-American");
    }

    #[test]
    fn test_propublica_filter_drops_each_case() {
        let records = vec![
            raw("Caucasian", Some(0.0), 1, "F", Some("Low")),
            raw("Caucasian", None, 1, "F", Some("Low")),
            raw("Caucasian", Some(31.0), 1, "F", Some("Low")),
            raw("Caucasian", Some(-31.0), 1, "F", Some("Low")),
            raw("Caucasian", Some(30.0), -1, "F", Some("Low")),
            raw("Caucasian", Some(-30.0), 0, "O", Some("Low")),
            raw("Caucasian", Some(1.0), 0, "M", Some("N/A")),
            raw("Caucasian", Some(1.0), 0, "M", None),
        ];

        let mut stats = FilterStats::default();
        let kept = ProPublicaFilter::default().apply(records, &mut stats);

        assert_eq!(kept.len(), 1);
        assert_eq!(stats.total_rows, 8);
        assert_eq!(stats.missing_screening_days, 1);
        assert_eq!(stats.outside_screening_window, 2);
        assert_eq!(stats.unknown_recidivism, 1);
        assert_eq!(stats.ordinary_traffic, 1);
        assert_eq!(stats.missing_score_text, 2);
    }

    #[test]
    fn test_load_csv_uses_first_duplicate_column() {
        let file = write_csv(&[
            "1,Male,30,25 - 45,African-American,8,2,0,F,1,3,High,9,1",
            "2,Female,50,Greater than 45,Caucasian,2,0,-1,M,0,7,Low,0,0",
            "3,Male,22,Less than 25,Hispanic,4,1,0,F,0,4,Low,1,0",
            "4,Male,40,25 - 45,Caucasian,6,3,,F,1,6,Medium,3,1",
        ]);

        let dataset = CompasDataset::load_csv(file.path(), &AuditConfig::default()).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.filter_stats.total_rows, 4);
        assert_eq!(dataset.filter_stats.missing_screening_days, 1);
        assert_eq!(dataset.filter_stats.outside_groups, 1);
        assert_eq!(dataset.defendants[0].decile_score, 8);
        assert_eq!(dataset.defendants[0].priors_count, Some(2));
        assert_eq!(dataset.defendants[0].group, Group::Unprivileged);
        assert_eq!(dataset.defendants[1].group, Group::Privileged);
        assert!(dataset.defendants[1].is_favorable());
    }

    #[test]
    fn test_load_csv_missing_column() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,race,decile_score,two_year_recid").unwrap();
        writeln!(file, "1,Caucasian,4,0").unwrap();

        let err = CompasDataset::load_csv(file.path(), &AuditConfig::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("days_b_screening_arrest"));
    }

    #[test]
    fn test_load_csv_missing_file() {
        let result = CompasDataset::load_csv(Path::new("/nonexistent/compas.csv"), &AuditConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_out_of_range_decile_rejected() {
        let file = write_csv(&["1,Male,30,25 - 45,Caucasian,11,2,0,F,1,11,High,2,1"]);
        let err = CompasDataset::load_csv(file.path(), &AuditConfig::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("decile_score"));
    }

    #[test]
    fn test_filtering_is_monotone() {
        let dataset = CompasDataset::synthetic(2000, &AuditConfig::default()).unwrap();
        let stages = dataset.filter_stats.stage_counts();

        assert_eq!(stages.first().map(|s| s.1), Some(2000));
        for pair in stages.windows(2) {
            assert!(pair[1].1 <= pair[0].1, "{} increased row count", pair[1].0);
        }
        assert_eq!(stages.last().map(|s| s.1), Some(dataset.len()));
    }

    #[test]
    fn test_synthetic_is_deterministic() {
        let config = AuditConfig::default();
        let a = CompasDataset::synthetic(500, &config).unwrap();
        let b = CompasDataset::synthetic(500, &config).unwrap();

        assert_eq!(a.len(), b.len());
        assert_eq!(a.filter_stats, b.filter_stats);
        assert!(a
            .defendants
            .iter()
            .zip(&b.defendants)
            .all(|(x, y)| x.id == y.id && x.decile_score == y.decile_score));
    }

    #[test]
    fn test_synthetic_has_both_groups() {
        let dataset = CompasDataset::synthetic(1000, &AuditConfig::default()).unwrap();
        assert!(dataset.ensure_groups_present().is_ok());
        assert!((dataset.total_weight() - dataset.len() as f64).abs() < 1e-9);
    }

    #[test]
    fn test_ensure_groups_present_fails_on_missing_group() {
        let records = vec![
            raw("African-American", Some(0.0), 1, "F", Some("Low")),
            raw("African-American", Some(2.0), 0, "M", Some("Medium")),
            raw("Hispanic", Some(0.0), 0, "F", Some("Low")),
        ];
        let dataset = CompasDataset::from_raw(records, &AuditConfig::default(), "test").unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.filter_stats.outside_groups, 1);

        let err = dataset.ensure_groups_present().unwrap_err();
        assert!(err.to_string().contains("Privileged"), "unexpected error: {}", err);
        assert!(err.to_string().contains("Caucasian"), "unexpected error: {}", err);
    }

    #[test]
    fn test_predicted_high_risk_threshold() {
        let dataset = CompasDataset::synthetic(300, &AuditConfig::default()).unwrap();
        for d in &dataset.defendants {
            assert_eq!(d.predicted_high_risk(5), d.decile_score >= 5);
        }
    }
}
