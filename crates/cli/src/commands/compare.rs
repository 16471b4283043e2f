//! Compare Command

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use rawparity_common::MetricReport;
use rawparity_harness::report::render_markdown;
use rawparity_harness::{Comparison, Orchestrator};
use serde::Serialize;

use crate::output::{print_info, print_list, print_structured, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct CompareArgs {
    /// Reference pipeline output
    #[arg(short, long)]
    pub reference: PathBuf,

    /// Candidate pipeline output
    #[arg(short, long)]
    pub candidate: PathBuf,

    /// Directory receiving report.md, report.json and the heatmap
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

/// One metric line of the summary table
#[derive(Serialize)]
pub struct MetricRow {
    pub metric: &'static str,
    pub value: String,
}

impl TableDisplay for MetricRow {
    fn headers() -> Vec<&'static str> {
        vec!["Metric", "Value"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.metric.to_string(), self.value.clone()]
    }
}

pub fn metric_rows(report: &MetricReport) -> Vec<MetricRow> {
    let (h, w, c) = report.compared_dimensions;
    vec![
        MetricRow {
            metric: "Dimensions",
            value: format!("{}x{}x{}", w, h, c),
        },
        MetricRow {
            metric: "Max Pixel Difference",
            value: format!("{:.6}", report.max_abs_diff),
        },
        MetricRow {
            metric: "MAE",
            value: format!("{:.6}", report.mean_abs_error),
        },
        MetricRow {
            metric: "MSE",
            value: format!("{:.8}", report.mean_squared_error),
        },
        MetricRow {
            metric: "PSNR",
            value: format!("{:.2} dB", report.psnr_db),
        },
        MetricRow {
            metric: "SSIM",
            value: format!("{:.4}", report.ssim_score),
        },
    ]
}

/// Report on stdout in the requested format
pub fn print_comparison(comparison: &Comparison, format: OutputFormat) {
    match format {
        OutputFormat::Table => print_list(&metric_rows(&comparison.report), format),
        OutputFormat::Plain => println!("{}", render_markdown(&comparison.report)),
        OutputFormat::Json | OutputFormat::Yaml => print_structured(comparison, format),
    }

    if !format.is_structured() {
        print_info(&format!("Report saved to {}", comparison.files.markdown.display()));
        print_info(&format!("Heatmap saved to {}", comparison.files.heatmap.display()));
    }
}

pub fn execute(args: CompareArgs, orchestrator: Orchestrator, format: OutputFormat) -> Result<()> {
    let orchestrator = match args.output_dir {
        Some(dir) => orchestrator.with_output_dir(dir),
        None => orchestrator,
    };

    let comparison = orchestrator.compare(&args.reference, &args.candidate)?;
    print_comparison(&comparison, format);
    Ok(())
}
