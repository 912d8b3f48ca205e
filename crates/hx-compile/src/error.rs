/// Compile-time error taxonomy. Every failure halts compilation; no partial
/// model is ever emitted.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("rule set is empty")]
    EmptyRuleSet,

    #[error("rule at index {index} has no rule_code")]
    MissingCode { index: usize },

    #[error("duplicate rule_code {code:?}")]
    DuplicateCode { code: String },

    #[error("rule {rule:?}: unknown operator {operator:?}")]
    UnknownOperator { rule: String, operator: String },

    #[error("rule {rule:?}: {detail}")]
    MalformedCondition { rule: String, detail: String },

    #[error("rule {rule:?}: invalid regex {pattern:?}: {source}")]
    BadPattern {
        rule: String,
        pattern: String,
        source: Box<regex::Error>,
    },

    #[error("rule source is not valid JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

pub type CompileResult<T> = Result<T, CompileError>;
