//! `vendorscope rules` command handler

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use vendorscope_core::config::VendorscopeConfig;
use vendorscope_core::store::MemoryStateStore;
use vendorscope_detector::{DetectorConfig, FileRuleSource, ResolvedRuleSet, RuleLoader, RuleStore};

use crate::cli::{RulesAction, RulesArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render, fit};

/// Execute the `rules` command.
pub async fn execute(
    args: RulesArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        RulesAction::List { category } => {
            let config = super::load_or_default(config_path).await?;
            let rules = resolve_rules(&config, None).await?;
            writer.render(&list_report(&rules, category.as_deref()))
        }
        RulesAction::Validate { path } => {
            let report = validate_file(&path).await?;
            writer.render(&report)?;
            if report.invalid > 0 || report.skipped > 0 {
                return Err(CliError::Rule(format!(
                    "{} invalid rule document(s)",
                    report.invalid + report.skipped
                )));
            }
            Ok(())
        }
    }
}

/// Resolve the configured rule layers without touching persistent state.
///
/// `catalog` replaces the configured catalog path when given.
pub async fn resolve_rules(
    config: &VendorscopeConfig,
    catalog: Option<&Path>,
) -> Result<Arc<ResolvedRuleSet>, CliError> {
    let mut rules_config = config.rules.clone();
    if let Some(path) = catalog {
        rules_config.catalog_path = path.display().to_string();
    }
    let detector_config = DetectorConfig::from_core(&rules_config);
    detector_config.validate()?;

    info!(catalog = %rules_config.catalog_path, "resolving rule set");
    let store = RuleStore::new(
        FileRuleSource::from_config(&detector_config),
        Arc::new(MemoryStateStore::new()),
        detector_config,
    );
    Ok(store.rules().await?)
}

/// Build the list report, optionally filtered by category.
pub fn list_report(rules: &ResolvedRuleSet, category: Option<&str>) -> RuleListReport {
    let entries: Vec<RuleEntry> = rules
        .rules
        .iter()
        .filter(|r| category.is_none_or(|c| r.category.eq_ignore_ascii_case(c)))
        .map(|r| RuleEntry {
            id: r.id.clone(),
            name: r.display_name.clone(),
            category: r.category.clone(),
            provenance: r.provenance.to_string(),
            color: r.color.clone(),
            enabled: r.enabled,
            clauses: r.clauses.len(),
        })
        .collect();

    RuleListReport {
        catalog_version: rules.catalog_version.to_string(),
        total: entries.len(),
        rules: entries,
    }
}

/// Parse and compile every document in a rule file, one verdict per document.
pub async fn validate_file(path: &Path) -> Result<RuleValidationReport, CliError> {
    info!(path = %path.display(), "validating rule file");
    let source = path.display().to_string();
    let text = tokio::fs::read_to_string(path).await?;
    let parsed = RuleLoader::parse_documents(&text, &source)?;

    let mut seen = HashSet::new();
    let mut valid = 0;
    let mut errors = Vec::new();
    for (index, doc) in parsed.documents.iter().enumerate() {
        match doc.compile() {
            Ok(rule) if !seen.insert(rule.id.clone()) => errors.push(RuleError {
                index,
                rule_id: rule.id,
                error: "duplicate rule id".to_owned(),
            }),
            Ok(_) => valid += 1,
            Err(e) => errors.push(RuleError {
                index,
                rule_id: doc.id.clone(),
                error: e.to_string(),
            }),
        }
    }

    Ok(RuleValidationReport {
        path: source,
        version: parsed.version.map(|v| v.to_string()),
        total: parsed.documents.len() + parsed.skipped,
        valid,
        invalid: errors.len(),
        skipped: parsed.skipped,
        errors,
    })
}

#[derive(Serialize)]
pub struct RuleListReport {
    pub catalog_version: String,
    pub total: usize,
    pub rules: Vec<RuleEntry>,
}

#[derive(Serialize)]
pub struct RuleEntry {
    pub id: String,
    pub name: String,
    pub category: String,
    pub provenance: String,
    pub color: String,
    pub enabled: bool,
    pub clauses: usize,
}

impl Render for RuleListReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "Vendor Rules ({} total, catalog {})",
            self.total.to_string().bold(),
            self.catalog_version
        )?;
        writeln!(w)?;
        writeln!(
            w,
            "{:<22} {:<26} {:<16} {:<10} {:<8} Clauses",
            "ID", "Name", "Category", "Source", "Color"
        )?;
        writeln!(w, "{}", "-".repeat(92))?;

        for r in &self.rules {
            let source = match r.provenance.as_str() {
                "custom" => r.provenance.cyan(),
                "override" => r.provenance.yellow(),
                _ => r.provenance.normal(),
            };
            let id = if r.enabled {
                fit(&r.id, 22).normal()
            } else {
                fit(&r.id, 22).dimmed()
            };
            writeln!(
                w,
                "{} {} {} {:<10} {:<8} {}",
                id,
                fit(&r.name, 26),
                fit(&r.category, 16),
                source,
                r.color,
                r.clauses
            )?;
        }

        Ok(())
    }
}

#[derive(Serialize)]
pub struct RuleValidationReport {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub skipped: usize,
    pub errors: Vec<RuleError>,
}

#[derive(Serialize)]
pub struct RuleError {
    pub index: usize,
    pub rule_id: String,
    pub error: String,
}

impl Render for RuleValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Rule Validation: {}", self.path.bold())?;
        if let Some(ref version) = self.version {
            writeln!(w, "  Catalog version: {}", version)?;
        }
        let bad = self.invalid + self.skipped;
        writeln!(
            w,
            "  Documents: {} total, {} valid, {} invalid",
            self.total,
            self.valid.to_string().green(),
            if bad > 0 {
                bad.to_string().red()
            } else {
                bad.to_string().normal()
            }
        )?;
        if self.skipped > 0 {
            writeln!(w, "  {} entries could not be parsed", self.skipped)?;
        }

        if !self.errors.is_empty() {
            writeln!(w)?;
            writeln!(w, "Errors:")?;
            for e in &self.errors {
                let id = if e.rule_id.is_empty() {
                    format!("#{}", e.index)
                } else {
                    e.rule_id.clone()
                };
                writeln!(w, "  {}: {}", id.red(), e.error)?;
            }
        }

        Ok(())
    }
}
