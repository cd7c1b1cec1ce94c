//! Indicator expression references.
//!
//! Numerators and denominators reference data elements as `#{de}` or
//! `#{de.coc}`, program indicators as `I{pi}` and data set reporting rates
//! as `R{ds.type}`.

use regex::Regex;
use std::collections::BTreeSet;

use crate::error::{MigratorError, MigratorResult};

/// Identifiers referenced by one or more expressions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpressionRefs {
    pub data_elements: BTreeSet<String>,
    /// `de.coc` operands, as written
    pub operands: BTreeSet<String>,
    pub program_indicators: BTreeSet<String>,
    pub data_sets: BTreeSet<String>,
}

impl ExpressionRefs {
    pub fn extend(&mut self, other: ExpressionRefs) {
        self.data_elements.extend(other.data_elements);
        self.operands.extend(other.operands);
        self.program_indicators.extend(other.program_indicators);
        self.data_sets.extend(other.data_sets);
    }
}

#[derive(Debug, Clone)]
pub struct ExpressionParser {
    data_element: Regex,
    program_indicator: Regex,
    reporting_rate: Regex,
}

fn compile(pattern: &str) -> MigratorResult<Regex> {
    Regex::new(pattern).map_err(|e| MigratorError::Internal(format!("invalid pattern {pattern}: {e}")))
}

impl ExpressionParser {
    pub fn new() -> MigratorResult<Self> {
        Ok(Self {
            data_element: compile(r"#\{([A-Za-z0-9_]+)(?:\.([A-Za-z0-9_*]+))?\}")?,
            program_indicator: compile(r"I\{([A-Za-z0-9_]+)\}")?,
            reporting_rate: compile(r"R\{([A-Za-z0-9_]+)\.[A-Za-z_]+\}")?,
        })
    }

    pub fn parse(&self, expression: &str) -> ExpressionRefs {
        let mut refs = ExpressionRefs::default();
        for captures in self.data_element.captures_iter(expression) {
            let element = captures[1].to_string();
            if let Some(combo) = captures.get(2) {
                refs.operands.insert(format!("{element}.{}", combo.as_str()));
            }
            refs.data_elements.insert(element);
        }
        for captures in self.program_indicator.captures_iter(expression) {
            refs.program_indicators.insert(captures[1].to_string());
        }
        for captures in self.reporting_rate.captures_iter(expression) {
            refs.data_sets.insert(captures[1].to_string());
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_every_reference_kind() {
        let parser = ExpressionParser::new().unwrap();
        let refs = parser.parse("#{deA}+#{deB.coc1}*I{pi1}/R{ds1.REPORTING_RATE}");
        assert_eq!(
            refs.data_elements.into_iter().collect::<Vec<_>>(),
            vec!["deA".to_string(), "deB".to_string()]
        );
        assert!(refs.operands.contains("deB.coc1"));
        assert!(refs.program_indicators.contains("pi1"));
        assert!(refs.data_sets.contains("ds1"));
    }

    #[test]
    fn test_constants_have_no_references() {
        let parser = ExpressionParser::new().unwrap();
        assert_eq!(parser.parse("1"), ExpressionRefs::default());
    }
}
