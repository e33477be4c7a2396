//! Summary formatter
//!
//! One line per rule with its error and warning counts, then a total.

use std::collections::BTreeMap;

use pagehint_plugin::{Formatter, PluginError, Problem, Severity};

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    errors: usize,
    warnings: usize,
}

fn pluralize(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{} {}", count, word)
    } else {
        format!("{} {}s", count, word)
    }
}

/// Prints a per-rule table of problem counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryFormatter;

impl SummaryFormatter {
    /// Renders the summary, or `None` when there is nothing to report.
    pub fn render(&self, problems: &[Problem]) -> Option<String> {
        if problems.is_empty() {
            return None;
        }

        let mut by_rule: BTreeMap<&str, Counts> = BTreeMap::new();
        for problem in problems {
            let counts = by_rule.entry(problem.rule_id.as_str()).or_default();
            match problem.severity {
                Severity::Error => counts.errors += 1,
                Severity::Warning => counts.warnings += 1,
                Severity::Off => {}
            }
        }

        let mut rows: Vec<(&str, Counts)> = by_rule.into_iter().collect();
        rows.sort_by(|(a_name, a), (b_name, b)| {
            b.errors
                .cmp(&a.errors)
                .then(b.warnings.cmp(&a.warnings))
                .then(a_name.cmp(b_name))
        });

        let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
        let mut lines = Vec::with_capacity(rows.len() + 2);
        for (name, counts) in &rows {
            let mut parts = Vec::new();
            if counts.errors > 0 {
                parts.push(pluralize(counts.errors, "error"));
            }
            if counts.warnings > 0 {
                parts.push(pluralize(counts.warnings, "warning"));
            }
            lines.push(format!("{:<width$}  {}", name, parts.join(", "), width = width));
        }

        let (errors, warnings) = rows.iter().fold((0, 0), |(e, w), (_, counts)| {
            (e + counts.errors, w + counts.warnings)
        });
        lines.push(String::new());
        lines.push(format!(
            "Found a total of {} and {}",
            pluralize(errors, "error"),
            pluralize(warnings, "warning")
        ));

        Some(lines.join("\n"))
    }
}

impl Formatter for SummaryFormatter {
    fn format(&self, problems: &[Problem]) -> Result<(), PluginError> {
        if let Some(summary) = self.render(problems) {
            println!("{}", summary);
        }
        Ok(())
    }
}
