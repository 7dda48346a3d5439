use indexmap::IndexMap;
use regex::Regex;

use crate::error::{Error, Result};

/// Evaluator of the expressions supported by the emulator: a global read
/// (`name`) or a global assignment (`name = value`).
pub(crate) struct ExprEvaluator {
    pattern: Regex,
}

impl ExprEvaluator {
    pub(crate) fn new() -> Result<Self> {
        let pattern = Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:=\s*(-?(?:0x[0-9a-fA-F]+|\d+))\s*)?;?\s*$")?;

        Ok(Self { pattern })
    }

    /// Evaluates an expression against the given globals.
    ///
    /// Returns the value of the global after evaluation.
    pub(crate) fn evaluate(&self, expr: &str, globals: &mut IndexMap<String, i64>) -> Result<i64> {
        let captures = self
            .pattern
            .captures(expr)
            .ok_or_else(|| Error::InvalidExpression(expr.to_owned()))?;

        let name = &captures[1];

        let var = globals
            .get_mut(name)
            .ok_or_else(|| Error::UnknownVariable(name.to_owned()))?;

        if let Some(value) = captures.get(2) {
            *var = parse_int(value.as_str()).ok_or_else(|| Error::InvalidExpression(expr.to_owned()))?;
        }

        Ok(*var)
    }
}

fn parse_int(s: &str) -> Option<i64> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, s),
    };

    let value = match digits.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };

    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::ExprEvaluator;
    use crate::Error;

    fn globals() -> IndexMap<String, i64> {
        IndexMap::from([("g_test".to_owned(), 0), ("other".to_owned(), 7)])
    }

    #[test]
    fn assignment() {
        let eval = ExprEvaluator::new().expect("evaluator");
        let mut globals = globals();

        assert_eq!(eval.evaluate("g_test = 1", &mut globals).expect("valid expression"), 1);
        assert_eq!(globals["g_test"], 1);

        assert_eq!(eval.evaluate("other=0x10;", &mut globals).expect("valid expression"), 16);
        assert_eq!(eval.evaluate("  other = -3 ", &mut globals).expect("valid expression"), -3);
    }

    #[test]
    fn read() {
        let eval = ExprEvaluator::new().expect("evaluator");
        let mut globals = globals();

        assert_eq!(eval.evaluate("other", &mut globals).expect("valid expression"), 7);
        assert_eq!(globals, self::globals());
    }

    #[test]
    fn invalid() {
        let eval = ExprEvaluator::new().expect("evaluator");
        let mut globals = globals();

        assert!(matches!(
            eval.evaluate("g_test + 1", &mut globals),
            Err(Error::InvalidExpression(_))
        ));
        assert!(matches!(
            eval.evaluate("nope = 1", &mut globals),
            Err(Error::UnknownVariable(name)) if name == "nope"
        ));
        assert_eq!(globals, self::globals());
    }
}
