//! `if` guards: `left == right` and `left != right`.
//!
//! The operator is located in the raw guard, outside of any `{{tag}}`, so a
//! substituted value containing `==` cannot change how the guard splits.
//! Both sides are then filled separately and compared as plain strings.

use crate::template::tag_pattern;
use thiserror::Error;

/// The guard is not `left == right` or `left != right`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported guard '{0}'")]
pub struct GuardSyntaxError(pub String);

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

/// A parsed guard, sides still templated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    left: String,
    op: Operator,
    right: String,
}

impl Guard {
    /// Parse a raw guard. Blank guards parse to `None` (always run).
    pub fn parse(raw: &str) -> Result<Option<Self>, GuardSyntaxError> {
        if raw.trim().is_empty() {
            return Ok(None);
        }

        let tags: Vec<_> = tag_pattern().find_iter(raw).map(|m| m.range()).collect();
        let inside_tag = |pos: usize| tags.iter().any(|r| r.contains(&pos));

        let bytes = raw.as_bytes();
        let mut found = Vec::new();
        let mut i = 0;
        while i + 1 < bytes.len() {
            let op = match (bytes[i], bytes[i + 1]) {
                (b'=', b'=') => Some(Operator::Eq),
                (b'!', b'=') => Some(Operator::Ne),
                _ => None,
            };
            match op {
                Some(op) if !inside_tag(i) => {
                    found.push((i, op));
                    i += 2;
                }
                _ => i += 1,
            }
        }

        match found.as_slice() {
            [(pos, op)] => Ok(Some(Self {
                left: raw[..*pos].to_string(),
                op: *op,
                right: raw[pos + 2..].to_string(),
            })),
            _ => Err(GuardSyntaxError(raw.to_string())),
        }
    }

    /// Operator of this guard
    pub fn operator(&self) -> Operator {
        self.op
    }

    /// Evaluate, filling each side with `fill` first.
    pub fn evaluate(&self, fill: impl Fn(&str) -> String) -> bool {
        let left = fill(&self.left);
        let right = fill(&self.right);
        let left = left.trim();
        let right = right.trim().trim_matches(|c| c == '\'' || c == '"');
        match self.op {
            Operator::Eq => left == right,
            Operator::Ne => left != right,
        }
    }
}

/// Evaluate an already substituted guard.
pub fn should_run(guard: &str) -> Result<bool, GuardSyntaxError> {
    Ok(Guard::parse(guard)?.map_or(true, |g| g.evaluate(str::to_string)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_basic_truth_table() {
        assert_eq!(should_run("a == a"), Ok(true));
        assert_eq!(should_run("a == b"), Ok(false));
        assert_eq!(should_run("a != b"), Ok(true));
        assert_eq!(should_run("a != a"), Ok(false));
        assert_eq!(should_run(""), Ok(true));
        assert_eq!(should_run("   "), Ok(true));
    }

    #[test]
    fn test_right_operand_quotes_are_trimmed() {
        assert_eq!(should_run("no != 'no'"), Ok(false));
        assert_eq!(should_run("yes == \"yes\""), Ok(true));
    }

    #[test]
    fn test_no_coercion() {
        assert_eq!(should_run("1 == 1.0"), Ok(false));
        assert_eq!(should_run("true == TRUE"), Ok(false));
    }

    #[test]
    fn test_other_syntax_rejected() {
        assert!(should_run("a > b").is_err());
        assert!(should_run("just text").is_err());
        assert!(should_run("a == b == c").is_err());
        assert!(should_run("a == b != c").is_err());
    }

    #[test]
    fn test_operator_inside_tag_is_ignored() {
        let guard = Guard::parse("{{a==b}} != no")
            .expect("valid")
            .expect("non-empty");
        assert_eq!(guard.operator(), Operator::Ne);
    }

    #[test]
    fn test_substituted_values_do_not_split_the_guard() {
        let guard = Guard::parse("{{review}} != no")
            .expect("valid")
            .expect("non-empty");
        let run = guard.evaluate(|side| side.replace("{{review}}", "x == y"));
        assert!(run);
        let skip = guard.evaluate(|side| side.replace("{{review}}", "no"));
        assert!(!skip);
    }
}
