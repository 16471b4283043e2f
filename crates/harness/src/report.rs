//! Report generation - textual summary plus a three-panel heatmap

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use rawparity_common::config::ReportConfig;
use rawparity_common::MetricReport;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{HarnessError, HarnessResult};
use crate::imaging::ImageBuffer;

pub const REPORT_MARKDOWN: &str = "report.md";
pub const REPORT_JSON: &str = "report.json";
pub const HEATMAP: &str = "comparison_heatmap.png";

/// Gap between heatmap panels, in pixels
const PANEL_GAP: u32 = 8;

/// Files written by [`emit`]
#[derive(Debug, Clone, Serialize)]
pub struct EmittedReport {
    pub markdown: PathBuf,
    pub json: PathBuf,
    pub heatmap: PathBuf,
}

/// Render the human-readable summary
pub fn render_markdown(report: &MetricReport) -> String {
    let mut lines = vec![
        "# Parity Check Report".to_string(),
        format!("- **Python Output**: `{}`", report.reference_name),
        format!("- **Web Output**: `{}`", report.candidate_name),
        format!("- **Dimensions**: {:?}", report.compared_dimensions),
        String::new(),
        "## Metrics".to_string(),
        format!(
            "- **Max Pixel Difference**: {:.6} ({:.4}%)",
            report.max_abs_diff,
            report.max_abs_diff * 100.0
        ),
        format!("- **Mean Absolute Error (MAE)**: {:.6}", report.mean_abs_error),
        format!("- **MSE**: {:.8}", report.mean_squared_error),
        format!("- **PSNR**: {:.2} dB", report.psnr_db),
        format!("- **SSIM**: {:.4}", report.ssim_score),
    ];

    if report.reference_sha256.is_some() || report.candidate_sha256.is_some() {
        lines.push(String::new());
        lines.push("## Provenance".to_string());
        lines.push(format!(
            "- **Python Output**: {}-bit, sha256 `{}`",
            report.reference_bit_depth,
            report.reference_sha256.as_deref().unwrap_or("-")
        ));
        lines.push(format!(
            "- **Web Output**: {}-bit, sha256 `{}`",
            report.candidate_bit_depth,
            report.candidate_sha256.as_deref().unwrap_or("-")
        ));
    }

    lines.join("\n")
}

/// Write `report.md`, `report.json` and `comparison_heatmap.png` into
/// `output_dir`, overwriting previous runs
pub fn emit(
    report: &MetricReport,
    images: (&ImageBuffer, &ImageBuffer),
    output_dir: &Path,
    config: &ReportConfig,
) -> HarnessResult<EmittedReport> {
    std::fs::create_dir_all(output_dir)?;

    let markdown = output_dir.join(REPORT_MARKDOWN);
    std::fs::write(&markdown, render_markdown(report))?;

    let json = output_dir.join(REPORT_JSON);
    std::fs::write(&json, serde_json::to_string_pretty(report)?)?;

    let heatmap = output_dir.join(HEATMAP);
    render_heatmap(images.0, images.1, config)?.save(&heatmap)?;
    info!(path = %heatmap.display(), "Heatmap saved");

    Ok(EmittedReport {
        markdown,
        json,
        heatmap,
    })
}

/// Reference, candidate and amplified difference, left to right
pub fn render_heatmap(
    reference: &ImageBuffer,
    candidate: &ImageBuffer,
    config: &ReportConfig,
) -> HarnessResult<RgbImage> {
    if reference.shape() != candidate.shape() {
        return Err(HarnessError::AlignmentImpossible(
            "heatmap needs aligned images".to_string(),
        ));
    }

    let panels = [
        reference.to_rgb8(),
        candidate.to_rgb8(),
        difference_panel(reference, candidate, config.heatmap_gain),
    ]
    .map(|panel| fit_width(panel, config.max_panel_width));

    let panel_w = panels[0].width();
    let panel_h = panels[0].height();
    let mut canvas = RgbImage::from_pixel(
        panel_w * 3 + PANEL_GAP * 2,
        panel_h,
        Rgb([255, 255, 255]),
    );
    for (i, panel) in panels.iter().enumerate() {
        imageops::replace(&mut canvas, panel, ((panel_w + PANEL_GAP) * i as u32) as i64, 0);
    }

    Ok(canvas)
}

/// Channel-mean absolute difference times `gain`, clamped and colormapped
fn difference_panel(a: &ImageBuffer, b: &ImageBuffer, gain: f64) -> RgbImage {
    let c = a.channels() as usize;
    let (ma, mb) = (a.bit_depth().max_value(), b.bit_depth().max_value());

    let mut panel = RgbImage::new(a.width(), a.height());
    let pixels = a.data().chunks_exact(c).zip(b.data().chunks_exact(c));
    for (out, (pa, pb)) in panel.pixels_mut().zip(pixels) {
        let diff: f64 = pa
            .iter()
            .zip(pb)
            .map(|(&p, &q)| (p as f64 / ma - q as f64 / mb).abs())
            .sum::<f64>()
            / c as f64;
        *out = magma((diff * gain).clamp(0.0, 1.0));
    }
    panel
}

/// Shrink a panel wider than `max_width`, keeping its aspect ratio
fn fit_width(panel: RgbImage, max_width: u32) -> RgbImage {
    if max_width == 0 || panel.width() <= max_width {
        return panel;
    }
    let height = ((panel.height() as u64 * max_width as u64) / panel.width() as u64).max(1) as u32;
    imageops::resize(&panel, max_width, height, FilterType::Triangle)
}

/// Piecewise-linear approximation of the magma colormap
fn magma(t: f64) -> Rgb<u8> {
    const STOPS: [(f64, [f64; 3]); 9] = [
        (0.000, [0.0, 0.0, 4.0]),
        (0.125, [28.0, 16.0, 68.0]),
        (0.250, [79.0, 18.0, 123.0]),
        (0.375, [129.0, 37.0, 129.0]),
        (0.500, [181.0, 54.0, 122.0]),
        (0.625, [229.0, 80.0, 100.0]),
        (0.750, [251.0, 135.0, 97.0]),
        (0.875, [254.0, 194.0, 135.0]),
        (1.000, [252.0, 253.0, 191.0]),
    ];

    let t = t.clamp(0.0, 1.0);
    for pair in STOPS.windows(2) {
        let (t0, c0) = pair[0];
        let (t1, c1) = pair[1];
        if t <= t1 {
            let f = (t - t0) / (t1 - t0);
            let lerp = |i: usize| (c0[i] + (c1[i] - c0[i]) * f).round() as u8;
            return Rgb([lerp(0), lerp(1), lerp(2)]);
        }
    }
    Rgb([252, 253, 191])
}

/// Hash a file using SHA256
pub fn file_sha256(path: &Path) -> HarnessResult<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}
