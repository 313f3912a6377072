use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::models::{AnalysisReport, AnalyzerResult, Severity};

/// Render a colored terminal summary of a run.
pub fn render(report: &AnalysisReport, path: &Path, verbose: bool, quiet: bool) -> Result<()> {
    let result = &report.analyzer.result;
    let counts = severity_counts(result);
    let errors = counts.get(&Severity::Error).copied().unwrap_or(0);
    let warnings = counts.get(&Severity::Warning).copied().unwrap_or(0);
    let curated = result.packages.iter().filter(|p| !p.curations.is_empty()).count();

    if quiet {
        println!(
            "Projects: {}  Packages: {}  Warnings: {}  Errors: {}",
            result.projects.len(),
            result.packages.len(),
            warnings.to_string().yellow(),
            errors.to_string().red(),
        );
        return Ok(());
    }

    println!("\n {} v{}", "depscope".bold(), env!("CARGO_PKG_VERSION"));
    println!(" Analyzed: {}\n", path.display());

    let vcs = &report.repository.context.vcs;
    let revision = if vcs.is_empty() {
        "not under version control".to_string()
    } else {
        format!("{} {}", vcs.vcs_type, short_revision(&vcs.revision))
    };
    let elapsed = report.analyzer.end_time - report.analyzer.start_time;

    println!(" ┌────────────────────────────────────────────────────┐");
    println!(" │  {:<48} │", "SUMMARY".bold());
    println!(" │  {:<48} │", format!("Projects           : {}", result.projects.len()));
    println!(
        " │  {:<48} │",
        format!("Packages           : {} ({} curated)", result.packages.len(), curated)
    );
    println!(" │  {:<48} │", format!("{}  Warnings        : {:>4}", "⚠".yellow(), warnings));
    println!(" │  {:<48} │", format!("{}  Errors          : {:>4}", "✗".red(), errors));
    println!(" │  {:<48} │", format!("Repository         : {}", revision));
    println!(
        " │  {:<48} │",
        format!("Duration           : {} ms", elapsed.num_milliseconds())
    );
    println!(" └────────────────────────────────────────────────────┘\n");

    println!(" {} Projects:\n", "[PROJECTS]".cyan().bold());
    render_projects(result);
    println!();

    if !result.issues.is_empty() {
        println!(" {} Issues reported by analyzers:\n", "[ISSUES]".yellow().bold());
        render_issues(result);
        println!();
    }

    if verbose && !result.packages.is_empty() {
        println!(" {} All packages:\n", "[PACKAGES]".green().bold());
        render_packages(result);
        println!();
    }

    Ok(())
}

fn header(titles: &[&str]) -> Vec<Cell> {
    titles
        .iter()
        .map(|title| Cell::new(title).add_attribute(Attribute::Bold))
        .collect()
}

fn new_table(titles: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(titles));
    table
}

fn render_projects(result: &AnalyzerResult) {
    let mut table = new_table(&["Project", "Version", "Type", "Definition file", "Scopes", "Dependencies"]);

    for project in &result.projects {
        let scopes: Vec<&str> = project.scopes.iter().map(|s| s.name.as_str()).collect();
        let definition_file = if project.definition_file_path.is_empty() {
            "(whole tree)"
        } else {
            project.definition_file_path.as_str()
        };
        table.add_row(vec![
            Cell::new(display_name(&project.id.namespace, &project.id.name)),
            Cell::new(&project.id.version),
            Cell::new(&project.id.kind),
            Cell::new(definition_file),
            Cell::new(scopes.join(", ")),
            Cell::new(project.dependency_count()).set_alignment(CellAlignment::Right),
        ]);
    }

    println!("{}", table);
}

fn render_issues(result: &AnalyzerResult) {
    let mut table = new_table(&["Project", "Severity", "Source", "Message"]);

    for (id, issues) in &result.issues {
        for issue in issues {
            let color = match issue.severity {
                Severity::Hint => Color::DarkGrey,
                Severity::Warning => Color::Yellow,
                Severity::Error => Color::Red,
            };
            table.add_row(vec![
                Cell::new(id.to_coordinates()),
                Cell::new(issue.severity.to_string())
                    .fg(color)
                    .set_alignment(CellAlignment::Center),
                Cell::new(&issue.source),
                Cell::new(&issue.message),
            ]);
        }
    }

    println!("{}", table);
}

fn render_packages(result: &AnalyzerResult) {
    let mut table = new_table(&["Package", "Version", "Type", "Declared licenses", "Concluded", "Curated"]);

    for curated in &result.packages {
        let package = &curated.package;
        let declared: Vec<&str> = package.declared_licenses.iter().map(String::as_str).collect();
        let (mark, color) = if curated.curations.is_empty() {
            ("", Color::Reset)
        } else {
            ("✓", Color::Green)
        };
        table.add_row(vec![
            Cell::new(display_name(&package.id.namespace, &package.id.name)),
            Cell::new(&package.id.version),
            Cell::new(&package.id.kind),
            Cell::new(declared.join(", ")),
            Cell::new(package.concluded_license.as_deref().unwrap_or("")),
            Cell::new(mark).fg(color).set_alignment(CellAlignment::Center),
        ]);
    }

    println!("{}", table);
}

fn severity_counts(result: &AnalyzerResult) -> BTreeMap<Severity, usize> {
    let mut counts = BTreeMap::new();
    for issue in result.issues.values().flatten() {
        *counts.entry(issue.severity).or_insert(0) += 1;
    }
    counts
}

fn display_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}:{}", namespace, name)
    }
}

fn short_revision(revision: &str) -> &str {
    revision.get(..12).unwrap_or(revision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Identifier, Issue};

    #[test]
    fn test_severity_counts() {
        let mut result = AnalyzerResult::default();
        let id = Identifier::new("NPM", "", "web", "1.0.0");
        let issues = result.issues.entry(id).or_default();
        issues.insert(Issue::warning("NPM", "no lockfile"));
        issues.insert(Issue {
            source: "NPM".to_string(),
            message: "broken lockfile".to_string(),
            severity: Severity::Error,
        });

        let counts = severity_counts(&result);
        assert_eq!(counts[&Severity::Warning], 1);
        assert_eq!(counts[&Severity::Error], 1);
        assert!(result.has_errors());
    }

    #[test]
    fn test_display_helpers() {
        assert_eq!(display_name("@types", "node"), "@types:node");
        assert_eq!(display_name("", "serde"), "serde");
        assert_eq!(short_revision("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_revision("abc"), "abc");
    }
}
