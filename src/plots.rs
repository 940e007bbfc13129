// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! PNG comparison charts
//!
//! - `fpr_fnr_disparity.png`: FPR and FNR per group, side by side
//! - `recidivism_comparison.png`: actual recidivism vs predicted high risk per group
//!
//! Text is drawn with an embedded DejaVu Sans face, so no system fonts are
//! needed. Building with `ttf` switches to system fonts through fontconfig.

use crate::metrics::GroupRates;
use anyhow::{anyhow, Result};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::FontStyle;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const ERROR_RATE_FILENAME: &str = "fpr_fnr_disparity.png";
pub const RECIDIVISM_FILENAME: &str = "recidivism_comparison.png";

const ORANGE: RGBColor = RGBColor(255, 165, 0);
const BAR_GREEN: RGBColor = RGBColor(0, 128, 0);

const CHART_FONT: &str = "sans-serif";
static CHART_FONT_BYTES: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// Fraction of a group's slot covered by one bar of a grouped pair
const GROUPED_BAR_WIDTH: f64 = 0.35;

struct Bar {
    label: String,
    value: f64,
    color: RGBColor,
}

fn chart_error(e: impl std::fmt::Display) -> anyhow::Error {
    anyhow!("Chart rendering failed: {}", e)
}

/// Register the embedded face under the family name the charts use
fn register_chart_font() -> Result<()> {
    static REGISTERED: OnceLock<bool> = OnceLock::new();
    let ok = *REGISTERED.get_or_init(|| {
        plotters::style::register_font(CHART_FONT, FontStyle::Normal, CHART_FONT_BYTES).is_ok()
    });
    if ok {
        Ok(())
    } else {
        Err(anyhow!("Embedded chart font could not be parsed"))
    }
}

/// Upper y bound leaving headroom above the tallest bar
fn y_upper(values: impl IntoIterator<Item = f64>) -> f64 {
    let max = values.into_iter().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        1.0
    } else {
        (max * 1.15).min(1.0).max(max)
    }
}

fn draw_bar_panel(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    title: &str,
    y_desc: &str,
    bars: &[Bar],
) -> Result<()> {
    let y_max = y_upper(bars.iter().map(|b| b.value));

    let mut chart = ChartBuilder::on(area)
        .caption(title, (CHART_FONT, 22))
        .margin(20)
        .x_label_area_size(35)
        .y_label_area_size(55)
        .build_cartesian_2d((0u32..bars.len() as u32).into_segmented(), 0f64..y_max)
        .map_err(chart_error)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .y_desc(y_desc)
        .x_labels(bars.len())
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) => bars
                .get(*i as usize)
                .map(|b| b.label.clone())
                .unwrap_or_default(),
            _ => String::new(),
        })
        .draw()
        .map_err(chart_error)?;

    chart
        .draw_series(bars.iter().enumerate().map(|(i, bar)| {
            let i = i as u32;
            let mut rect = Rectangle::new(
                [(SegmentValue::Exact(i), 0.0), (SegmentValue::Exact(i + 1), bar.value)],
                bar.color.filled(),
            );
            rect.set_margin(0, 0, 20, 20);
            rect
        }))
        .map_err(chart_error)?;

    Ok(())
}

/// Two panels: false positive rate by group, false negative rate by group
pub fn render_error_rate_disparity(rates: &GroupRates, path: &Path) -> Result<()> {
    register_chart_font()?;
    let root = BitMapBackend::new(path, (1200, 500)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_error)?;

    let panels = root.split_evenly((1, 2));
    let colors = [RED, BLUE];

    let fpr_bars: Vec<Bar> = rates
        .ordered()
        .iter()
        .zip(colors)
        .map(|(g, color)| Bar { label: g.label.clone(), value: g.fpr, color })
        .collect();
    let fnr_bars: Vec<Bar> = rates
        .ordered()
        .iter()
        .zip(colors)
        .map(|(g, color)| Bar { label: g.label.clone(), value: g.fnr, color })
        .collect();

    draw_bar_panel(&panels[0], "False Positive Rate by Race", "FPR", &fpr_bars)?;
    draw_bar_panel(&panels[1], "False Negative Rate by Race", "FNR", &fnr_bars)?;

    root.present().map_err(chart_error)?;
    tracing::info!("Saved error-rate chart to {}", path.display());
    Ok(())
}

/// Grouped bars of actual recidivism and predicted high risk per group
pub fn render_recidivism_comparison(rates: &GroupRates, path: &Path) -> Result<()> {
    register_chart_font()?;
    let root = BitMapBackend::new(path, (800, 500)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_error)?;

    let groups = rates.ordered();
    let y_max = y_upper(
        groups
            .iter()
            .flat_map(|g| [g.actual_recidivism_rate, g.predicted_high_risk_rate]),
    );

    let mut chart = ChartBuilder::on(&root)
        .caption("Actual vs Predicted Recidivism by Race", (CHART_FONT, 24))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(55)
        .build_cartesian_2d((0u32..groups.len() as u32).into_segmented(), 0f64..y_max)
        .map_err(chart_error)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc("Race")
        .y_desc("Proportion")
        .x_labels(groups.len())
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) => groups
                .get(*i as usize)
                .map(|g| g.label.clone())
                .unwrap_or_default(),
            _ => String::new(),
        })
        .draw()
        .map_err(chart_error)?;

    // Bars are positioned inside each group's slot with pixel margins
    let (plot_width, _) = chart.plotting_area().dim_in_pixel();
    let slot = plot_width as f64 / groups.len().max(1) as f64;
    let outer = (slot * (0.5 - GROUPED_BAR_WIDTH)).round() as u32;
    let inner = (slot * 0.5).round() as u32;

    let bar = |i: usize, value: f64, color: RGBColor, left: u32, right: u32| {
        let i = i as u32;
        let mut rect = Rectangle::new(
            [(SegmentValue::Exact(i), 0.0), (SegmentValue::Exact(i + 1), value)],
            color.filled(),
        );
        rect.set_margin(0, 0, left, right);
        rect
    };

    chart
        .draw_series(
            groups
                .iter()
                .enumerate()
                .map(|(i, g)| bar(i, g.actual_recidivism_rate, ORANGE, outer, inner)),
        )
        .map_err(chart_error)?
        .label("Actual Recidivism")
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 12, y + 5)], ORANGE.filled()));

    chart
        .draw_series(
            groups
                .iter()
                .enumerate()
                .map(|(i, g)| bar(i, g.predicted_high_risk_rate, BAR_GREEN, inner, outer)),
        )
        .map_err(chart_error)?
        .label("Predicted High Risk")
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 12, y + 5)], BAR_GREEN.filled()));

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(chart_error)?;

    root.present().map_err(chart_error)?;
    tracing::info!("Saved recidivism chart to {}", path.display());
    Ok(())
}

/// Render both charts into `output_dir`, returning the written paths
pub fn render_all(rates: &GroupRates, output_dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;

    let error_rates = output_dir.join(ERROR_RATE_FILENAME);
    render_error_rate_disparity(rates, &error_rates)?;

    let recidivism = output_dir.join(RECIDIVISM_FILENAME);
    render_recidivism_comparison(rates, &recidivism)?;

    Ok(vec![error_rates, recidivism])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::GroupErrorRates;

    fn sample_rates() -> GroupRates {
        GroupRates {
            unprivileged: GroupErrorRates {
                label: "African-American".to_string(),
                count: 3175,
                fpr: 0.42,
                fnr: 0.28,
                actual_recidivism_rate: 0.52,
                predicted_high_risk_rate: 0.58,
            },
            privileged: GroupErrorRates {
                label: "Caucasian".to_string(),
                count: 2103,
                fpr: 0.22,
                fnr: 0.50,
                actual_recidivism_rate: 0.39,
                predicted_high_risk_rate: 0.33,
            },
        }
    }

    fn is_png(path: &Path) -> bool {
        std::fs::read(path)
            .map(|bytes| bytes.starts_with(&[0x89, b'P', b'N', b'G']))
            .unwrap_or(false)
    }

    #[test]
    fn test_y_upper() {
        assert_eq!(y_upper([0.0, 0.0]), 1.0);
        assert!((y_upper([0.5, 0.2]) - 0.575).abs() < 1e-9);
        assert_eq!(y_upper([0.95]), 1.0);
    }

    #[test]
    fn test_chart_font_registers() {
        register_chart_font().unwrap();
        // Second call reuses the registration
        register_chart_font().unwrap();
    }

    #[test]
    fn test_labelled_chart_has_text_pixels() {
        // A chart with labels must differ from one whose labels are all empty
        let dir = tempfile::tempdir().unwrap();
        let labelled = dir.path().join("labelled.png");
        let blank = dir.path().join("blank.png");

        let rates = sample_rates();
        let mut unlabelled = sample_rates();
        unlabelled.privileged.label = String::new();
        unlabelled.unprivileged.label = String::new();

        render_recidivism_comparison(&rates, &labelled).unwrap();
        render_recidivism_comparison(&unlabelled, &blank).unwrap();

        assert!(is_png(&labelled));
        assert_ne!(std::fs::read(&labelled).unwrap(), std::fs::read(&blank).unwrap());
    }

    #[test]
    fn test_render_all_writes_pngs() {
        let dir = tempfile::tempdir().unwrap();
        let paths = render_all(&sample_rates(), dir.path()).unwrap();

        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with(ERROR_RATE_FILENAME));
        assert!(paths[1].ends_with(RECIDIVISM_FILENAME));
        for path in &paths {
            assert!(is_png(path), "{} is not a PNG", path.display());
        }
    }

    #[test]
    fn test_render_handles_zero_rates() {
        let mut rates = sample_rates();
        rates.privileged.fpr = 0.0;
        rates.privileged.fnr = 0.0;
        rates.unprivileged.fpr = 0.0;
        rates.unprivileged.fnr = 0.0;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ERROR_RATE_FILENAME);
        render_error_rate_disparity(&rates, &path).unwrap();
        assert!(is_png(&path));
    }
}
