//! JSON formatter

use pagehint_plugin::{Formatter, PluginError, Problem};

/// Prints the problems of a target as pretty JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

impl JsonFormatter {
    pub fn render(&self, problems: &[Problem]) -> Result<String, PluginError> {
        Ok(serde_json::to_string_pretty(problems)?)
    }
}

impl Formatter for JsonFormatter {
    fn format(&self, problems: &[Problem]) -> Result<(), PluginError> {
        println!("{}", self.render(problems)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagehint_plugin::{ProblemLocation, Severity};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    #[test]
    fn test_render() {
        let problems = vec![
            Problem::new("no-http", "http://example.com", "Use HTTPS")
                .with_severity(Severity::Warning)
                .with_location(ProblemLocation::new(3, 7)),
        ];

        let rendered = JsonFormatter.render(&problems).unwrap();
        let value: Value = serde_json::from_str(&rendered).unwrap();

        assert_eq!(value[0]["ruleId"], "no-http");
        assert_eq!(value[0]["severity"], "warning");
        assert_eq!(value[0]["location"], json!({ "line": 3, "column": 7 }));
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(JsonFormatter.render(&[]).unwrap(), "[]");
    }
}
