//! `vendorscope scan` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use vendorscope_core::types::{DetectionResult, SignalBundle};
use vendorscope_detector::{ResolvedRuleSet, evaluate};

use crate::cli::ScanArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render, fit};

/// Execute the `scan` command.
pub async fn execute(
    args: ScanArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = super::load_or_default(config_path).await?;
    let bundle = read_bundle(&args.bundle).await?;
    let rules = super::rules::resolve_rules(&config, args.catalog.as_deref()).await?;

    let report = scan(&rules, &bundle, &args.bundle, args.min_confidence);
    writer.render(&report)
}

/// Read a signal bundle from a JSON file.
pub async fn read_bundle(path: &Path) -> Result<SignalBundle, CliError> {
    let text = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&text).map_err(|e| {
        CliError::Command(format!("invalid signal bundle {}: {}", path.display(), e))
    })
}

/// Run detection and build the report.
pub fn scan(
    rules: &ResolvedRuleSet,
    bundle: &SignalBundle,
    source: &Path,
    min_confidence: u8,
) -> ScanReport {
    let results = evaluate(rules, bundle);
    let total = results.len();
    let detections: Vec<DetectionResult> = results
        .into_iter()
        .filter(|r| r.confidence >= min_confidence)
        .collect();

    info!(
        source = %source.display(),
        signals = bundle.len(),
        detections = total,
        reported = detections.len(),
        "scan complete"
    );

    ScanReport {
        source: source.display().to_string(),
        catalog_version: rules.catalog_version.to_string(),
        signals: bundle.len(),
        unavailable: bundle.unavailable.iter().map(|k| k.to_string()).collect(),
        detections,
    }
}

/// Scan result report.
#[derive(Serialize)]
pub struct ScanReport {
    /// Bundle file path
    pub source: String,
    /// Catalog version the scan ran against
    pub catalog_version: String,
    /// Number of signals in the bundle
    pub signals: usize,
    /// Signal kinds the collector could not read
    pub unavailable: Vec<String>,
    /// Detections, highest confidence first
    pub detections: Vec<DetectionResult>,
}

impl Render for ScanReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Scan: {}", self.source.bold())?;
        writeln!(
            w,
            "  Signals: {}  Catalog: {}",
            self.signals, self.catalog_version
        )?;
        if !self.unavailable.is_empty() {
            writeln!(
                w,
                "  Unavailable: {}",
                self.unavailable.join(", ").yellow()
            )?;
        }
        writeln!(w)?;

        if self.detections.is_empty() {
            writeln!(w, "  {}", "No vendors detected".green())?;
            return Ok(());
        }

        writeln!(
            w,
            "{:<26} {:<16} {:>10}  Evidence",
            "Vendor", "Category", "Confidence"
        )?;
        writeln!(w, "{}", "-".repeat(80))?;
        for d in &self.detections {
            let confidence = format!("{}%", d.confidence);
            let confidence = match d.confidence {
                80..=100 => confidence.red().bold(),
                50..=79 => confidence.yellow(),
                _ => confidence.normal(),
            };
            let evidence = d
                .matches
                .iter()
                .map(|m| format!("{}:{}", m.clause_kind, m.matched_name))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(
                w,
                "{} {} {:>10}  {}",
                fit(&d.display_name, 26),
                fit(&d.category, 16),
                confidence,
                evidence
            )?;
        }

        Ok(())
    }
}
