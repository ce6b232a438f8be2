// src/utils/plotting.rs

use log::info;
use plotters::prelude::*;
use plotters::style::full_palette::ORANGE;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::path::Path;

use crate::error::{AnalysisError, Result};
use crate::utils::metrics::ConfusionMatrix;
use crate::utils::stats::CorrelationMatrix;

fn plot_err<E: std::fmt::Display>(err: E) -> AnalysisError {
    AnalysisError::Plot(err.to_string())
}

fn value_range(values: &[f64]) -> (f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    if (max - min).abs() < f64::EPSILON {
        // flat series still needs a visible range
        (min - 1.0, max + 1.0)
    } else {
        (min, max)
    }
}

/// One histogram per named series, laid out on a grid of `layout` (rows, cols).
pub fn plot_histograms(
    series: &[(&str, Vec<f64>)],
    bins: usize,
    layout: (usize, usize),
    path: &Path,
) -> Result<()> {
    if bins == 0 {
        return Err(AnalysisError::InvalidParameter("histogram needs bins".to_string()));
    }
    let root = SVGBackend::new(path, (1500, 900)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let areas = root.split_evenly(layout);

    for (area, (name, values)) in areas.iter().zip(series) {
        let (min, max) = value_range(values);
        let width = (max - min) / bins as f64;

        let mut counts = vec![0usize; bins];
        for value in values.iter().filter(|v| v.is_finite()) {
            let idx = (((value - min) / width) as usize).min(bins - 1);
            counts[idx] += 1;
        }
        let top = counts.iter().copied().max().unwrap_or(0).max(1) as f64 * 1.1;

        let mut chart = ChartBuilder::on(area)
            .caption(*name, ("sans-serif", 22))
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(45)
            .build_cartesian_2d(min..max, 0.0..top)
            .map_err(plot_err)?;
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(5)
            .y_desc("Frequency")
            .draw()
            .map_err(plot_err)?;

        chart
            .draw_series(counts.iter().enumerate().map(|(i, count)| {
                let left = min + width * i as f64;
                Rectangle::new([(left, 0.0), (left + width, *count as f64)], BLUE.mix(0.6).filled())
            }))
            .map_err(plot_err)?;
    }

    root.present().map_err(plot_err)?;
    info!("Saved histograms to {}", path.display());
    Ok(())
}

fn lerp(a: (u8, u8, u8), b: (u8, u8, u8), t: f64) -> RGBColor {
    let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * t).round() as u8;
    RGBColor(mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

/// Blue to red through a light grey, for values in [-1, 1].
fn diverging(value: f64) -> RGBColor {
    const COOL: (u8, u8, u8) = (59, 76, 192);
    const MID: (u8, u8, u8) = (221, 221, 221);
    const WARM: (u8, u8, u8) = (180, 4, 38);
    if value.is_nan() {
        return RGBColor(255, 255, 255);
    }
    let v = value.clamp(-1.0, 1.0);
    if v < 0.0 {
        lerp(MID, COOL, -v)
    } else {
        lerp(MID, WARM, v)
    }
}

/// White to dark blue, `t` in [0, 1].
fn sequential(t: f64) -> RGBColor {
    lerp((247, 251, 255), (8, 48, 107), t.clamp(0.0, 1.0))
}

struct Heatmap<'a> {
    title: &'a str,
    x_desc: &'a str,
    y_desc: &'a str,
    row_labels: Vec<String>,
    col_labels: Vec<String>,
    /// (annotation, fill, dark) per cell, row-major.
    cells: Vec<Vec<(String, RGBColor, bool)>>,
}

fn draw_heatmap(heatmap: Heatmap<'_>, path: &Path) -> Result<()> {
    let n_rows = heatmap.row_labels.len();
    let n_cols = heatmap.col_labels.len();
    if n_rows == 0 || n_cols == 0 {
        return Err(AnalysisError::EmptyDataset(format!("heatmap {}", heatmap.title)));
    }

    let root = SVGBackend::new(path, (1000, 850)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(heatmap.title, ("sans-serif", 28))
        .margin(20)
        .x_label_area_size(70)
        .y_label_area_size(120)
        .build_cartesian_2d(0.0..n_cols as f64, 0.0..n_rows as f64)
        .map_err(plot_err)?;

    let (width_px, height_px) = chart.plotting_area().dim_in_pixel();
    let half_col = (width_px as f64 / n_cols as f64 / 2.0) as i32;
    let half_row = (height_px as f64 / n_rows as f64 / 2.0) as i32;

    // Ticks sit on cell edges; labels are shifted onto the cell centers.
    let col_label = |v: &f64| label_at(&heatmap.col_labels, *v, false);
    let row_label = |v: &f64| label_at(&heatmap.row_labels, *v, true);
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(n_cols + 1)
        .y_labels(n_rows + 1)
        .x_label_offset(half_col)
        .y_label_offset(-half_row)
        .x_label_formatter(&col_label)
        .y_label_formatter(&row_label)
        .x_desc(heatmap.x_desc)
        .y_desc(heatmap.y_desc)
        .draw()
        .map_err(plot_err)?;

    let mut rects = Vec::with_capacity(n_rows * n_cols);
    let mut texts = Vec::with_capacity(n_rows * n_cols);
    for (r, row) in heatmap.cells.iter().enumerate() {
        // first row drawn at the top
        let y = (n_rows - 1 - r) as f64;
        for (c, (annotation, fill, dark)) in row.iter().enumerate() {
            let x = c as f64;
            rects.push(Rectangle::new([(x, y), (x + 1.0, y + 1.0)], fill.filled()));
            let color: &'static RGBColor = if *dark { &WHITE } else { &BLACK };
            let style = TextStyle::from(("sans-serif", 14).into_font())
                .color(color)
                .pos(Pos::new(HPos::Center, VPos::Center));
            texts.push(Text::new(annotation.clone(), (x + 0.5, y + 0.5), style));
        }
    }
    chart.draw_series(rects).map_err(plot_err)?;
    chart.draw_series(texts).map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    info!("Saved {} to {}", heatmap.title, path.display());
    Ok(())
}

fn label_at(labels: &[String], tick: f64, flipped: bool) -> String {
    if (tick - tick.round()).abs() > 1e-6 || tick < 0.0 {
        return String::new();
    }
    let idx = tick.round() as usize;
    if idx >= labels.len() {
        return String::new();
    }
    let idx = if flipped { labels.len() - 1 - idx } else { idx };
    labels[idx].clone()
}

/// Annotated correlation heatmap with a diverging palette.
pub fn plot_correlation_heatmap(corr: &CorrelationMatrix, path: &Path) -> Result<()> {
    let cells = corr
        .values
        .iter()
        .map(|row| {
            row.iter()
                .map(|v| {
                    let text = if v.is_nan() { "nan".to_string() } else { format!("{:.2}", v) };
                    (text, diverging(*v), v.abs() > 0.6)
                })
                .collect()
        })
        .collect();

    draw_heatmap(
        Heatmap {
            title: "Correlation Matrix",
            x_desc: "",
            y_desc: "",
            row_labels: corr.names.clone(),
            col_labels: corr.names.clone(),
            cells,
        },
        path,
    )
}

pub fn plot_confusion_matrix(matrix: &ConfusionMatrix, title: &str, path: &Path) -> Result<()> {
    let max = matrix.counts.iter().flatten().copied().max().unwrap_or(0).max(1) as f64;
    let cells = matrix
        .counts
        .iter()
        .map(|row| {
            row.iter()
                .map(|count| {
                    let t = *count as f64 / max;
                    (count.to_string(), sequential(t), t > 0.5)
                })
                .collect()
        })
        .collect();
    let labels: Vec<String> = matrix.labels.iter().map(|l| l.to_string()).collect();

    draw_heatmap(
        Heatmap {
            title,
            x_desc: "Predicted",
            y_desc: "Actual",
            row_labels: labels.clone(),
            col_labels: labels,
            cells,
        },
        path,
    )
}

/// Train and validation curves of one metric over epochs.
pub fn plot_history(train: &[f64], validation: &[f64], metric_name: &str, path: &Path) -> Result<()> {
    let root = SVGBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let all: Vec<f64> = train.iter().chain(validation).copied().collect();
    let (min, max) = value_range(&all);
    let pad = (max - min) * 0.05;
    let epochs = train.len().max(validation.len()).max(1);

    let mut chart = ChartBuilder::on(&root)
        .caption(format!("Model {}", metric_name), ("sans-serif", 36))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(0..epochs, (min - pad)..(max + pad))
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("Epoch")
        .y_desc(metric_name)
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(LineSeries::new(
            train.iter().enumerate().map(|(x, y)| (x, *y)),
            &RED,
        ))
        .map_err(plot_err)?
        .label("Train")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));

    if !validation.is_empty() {
        chart
            .draw_series(LineSeries::new(
                validation.iter().enumerate().map(|(x, y)| (x, *y)),
                &ORANGE,
            ))
            .map_err(plot_err)?
            .label("Validation")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &ORANGE));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    info!("Saved {} history to {}", metric_name, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_label_at_flips_rows() {
        let labels = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(label_at(&labels, 0.0, false), "a");
        assert_eq!(label_at(&labels, 0.0, true), "c");
        assert_eq!(label_at(&labels, 0.5, false), "");
        assert_eq!(label_at(&labels, 3.0, false), "");
    }

    #[test]
    fn test_palettes() {
        assert_eq!(diverging(1.0), RGBColor(180, 4, 38));
        assert_eq!(diverging(-1.0), RGBColor(59, 76, 192));
        assert_eq!(diverging(0.0), RGBColor(221, 221, 221));
        assert_eq!(sequential(0.0), RGBColor(247, 251, 255));
    }

    #[test]
    fn test_plots_write_svg_files() {
        let dir = tempdir().unwrap();

        let hist = dir.path().join("hist.svg");
        plot_histograms(
            &[("a", vec![1.0, 2.0, 2.5, 3.0]), ("flat", vec![4.0, 4.0])],
            10,
            (1, 2),
            &hist,
        )
        .unwrap();

        let confusion = ConfusionMatrix::from_labels(&[0, 1, 1], &[0, 1, 0]).unwrap();
        let heat = dir.path().join("confusion.svg");
        plot_confusion_matrix(&confusion, "Confusion", &heat).unwrap();

        let history = dir.path().join("loss.svg");
        plot_history(&[1.0, 0.5, 0.25], &[1.1, 0.6, 0.4], "Loss", &history).unwrap();

        for path in [hist, heat, history] {
            let svg = std::fs::read_to_string(&path).unwrap();
            assert!(svg.contains("<svg"));
        }
    }
}
