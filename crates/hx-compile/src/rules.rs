use serde::Deserialize;

use crate::error::CompileResult;
use crate::predicate::Operator;

// ---------------------------------------------------------------------------
// Source records — authored logical rules
// ---------------------------------------------------------------------------

/// One authored logical rule: a conjunction of conditions, some of which may
/// be disjunctive (`IS_ANY_OF`).
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    #[serde(rename = "rule_code", default)]
    pub code: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: Vec<ConditionSpec>,
}

fn default_enabled() -> bool {
    true
}

/// One authored condition: field name, operator (canonical or alias), and an
/// operator-dependent JSON value.
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionSpec {
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Parse a JSON array of rules. Structural JSON errors surface as
/// `CompileError::Syntax`; semantic validation happens in `validate`.
pub fn parse_ruleset(json: &str) -> CompileResult<Vec<RuleSpec>> {
    Ok(serde_json::from_str(json)?)
}

// ---------------------------------------------------------------------------
// Operator alias table
// ---------------------------------------------------------------------------

/// Resolve an operator name case-insensitively, accepting the canonical
/// names plus the alias table (EQ/=/==, NE/!=, GT/>, LT/<, RANGE, IN,
/// NOT_IN/NIN, MATCHES, NULL/MISSING, NOT_NULL/PRESENT).
pub fn parse_operator(name: &str) -> Option<Operator> {
    use Operator::*;
    let upper = name.trim().to_ascii_uppercase();
    Some(match upper.as_str() {
        "EQUAL_TO" | "EQ" | "=" | "==" => EqualTo,
        "NOT_EQUAL_TO" | "NE" | "!=" => NotEqualTo,
        "GREATER_THAN" | "GT" | ">" => GreaterThan,
        "LESS_THAN" | "LT" | "<" => LessThan,
        "BETWEEN" | "RANGE" => Between,
        "IS_ANY_OF" | "IN" => IsAnyOf,
        "IS_NONE_OF" | "NOT_IN" | "NIN" => IsNoneOf,
        "CONTAINS" => Contains,
        "STARTS_WITH" => StartsWith,
        "ENDS_WITH" => EndsWith,
        "REGEX" | "MATCHES" => Regex,
        "IS_NULL" | "NULL" | "MISSING" => IsNull,
        "IS_NOT_NULL" | "NOT_NULL" | "PRESENT" => IsNotNull,
        _ => return None,
    })
}
