use std::collections::HashMap;

use regex::Regex;

use crate::dict::Dictionary;
use crate::error::{CompileError, CompileResult};

// ---------------------------------------------------------------------------
// Operator
// ---------------------------------------------------------------------------

/// Predicate operator. The ordinal (discriminant) participates in canonical
/// hashing and the binary model format, so the order here is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Operator {
    EqualTo = 0,
    NotEqualTo = 1,
    GreaterThan = 2,
    LessThan = 3,
    Between = 4,
    IsAnyOf = 5,
    IsNoneOf = 6,
    Contains = 7,
    StartsWith = 8,
    EndsWith = 9,
    /// Full-match semantics: the pattern is compiled anchored at both ends.
    Regex = 10,
    IsNull = 11,
    IsNotNull = 12,
}

impl Operator {
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ord: u8) -> Option<Self> {
        use Operator::*;
        Some(match ord {
            0 => EqualTo,
            1 => NotEqualTo,
            2 => GreaterThan,
            3 => LessThan,
            4 => Between,
            5 => IsAnyOf,
            6 => IsNoneOf,
            7 => Contains,
            8 => StartsWith,
            9 => EndsWith,
            10 => Regex,
            11 => IsNull,
            12 => IsNotNull,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        use Operator::*;
        match self {
            EqualTo => "EQUAL_TO",
            NotEqualTo => "NOT_EQUAL_TO",
            GreaterThan => "GREATER_THAN",
            LessThan => "LESS_THAN",
            Between => "BETWEEN",
            IsAnyOf => "IS_ANY_OF",
            IsNoneOf => "IS_NONE_OF",
            Contains => "CONTAINS",
            StartsWith => "STARTS_WITH",
            EndsWith => "ENDS_WITH",
            Regex => "REGEX",
            IsNull => "IS_NULL",
            IsNotNull => "IS_NOT_NULL",
        }
    }
}

// ---------------------------------------------------------------------------
// Scalar operands
// ---------------------------------------------------------------------------

/// Scalar operand of an equality-family predicate. String operands are
/// value-dictionary ids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Num(f64),
    Bool(bool),
    Str(u32),
}

impl Scalar {
    fn canon_bits(self) -> (u8, u64) {
        match self {
            // -0.0 and 0.0 compare equal, so they must canonicalize alike.
            Scalar::Num(n) => (0, if n == 0.0 { 0f64.to_bits() } else { n.to_bits() }),
            Scalar::Bool(b) => (1, b as u64),
            Scalar::Str(id) => (2, id as u64),
        }
    }
}

/// Canonical text rendering for numbers that participate in dictionary-space
/// set membership: integral values render without a fractional part so that
/// `10`, `10.0`, and an event-side `10` all intern to the same id.
pub fn canonical_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// ---------------------------------------------------------------------------
// Predicate values
// ---------------------------------------------------------------------------

/// Regex operand compiled once at registration. Identity is the source
/// pattern string; the compiled form enforces full-match by wrapping the
/// source as `^(?:pat)$`.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub source: String,
    pub regex: Regex,
}

impl CompiledPattern {
    pub fn compile(source: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{source})$"))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }
}

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Operator-dependent predicate operand.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateValue {
    /// EQUAL_TO / NOT_EQUAL_TO / GREATER_THAN / LESS_THAN.
    Scalar(Scalar),
    /// BETWEEN, inclusive on both ends.
    Range { lo: f64, hi: f64 },
    /// IS_ANY_OF / IS_NONE_OF: sorted ascending value-dictionary ids.
    Set(Vec<u32>),
    /// CONTAINS / STARTS_WITH / ENDS_WITH: raw substring operand.
    Text(String),
    /// REGEX.
    Pattern(CompiledPattern),
    /// IS_NULL / IS_NOT_NULL.
    None,
}

/// Hashable canonical identity of a predicate operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ValueKey {
    Scalar(u8, u64),
    Range(u64, u64),
    Set(Vec<u32>),
    Text(String),
    Pattern(String),
    None,
}

impl PredicateValue {
    fn key(&self) -> ValueKey {
        match self {
            PredicateValue::Scalar(s) => {
                let (tag, bits) = s.canon_bits();
                ValueKey::Scalar(tag, bits)
            }
            PredicateValue::Range { lo, hi } => ValueKey::Range(lo.to_bits(), hi.to_bits()),
            PredicateValue::Set(ids) => ValueKey::Set(ids.clone()),
            PredicateValue::Text(t) => ValueKey::Text(t.clone()),
            PredicateValue::Pattern(p) => ValueKey::Pattern(p.source.clone()),
            PredicateValue::None => ValueKey::None,
        }
    }
}

// ---------------------------------------------------------------------------
// FNV-1a hashing — canonical value hashes for base-condition signatures
// ---------------------------------------------------------------------------

pub const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
pub const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub fn fnv1a(hash: u64, bytes: &[u8]) -> u64 {
    let mut h = hash;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// Deterministic, type-specific hash of a predicate operand. Feeds the
/// base-condition canonical hash; must stay stable across model versions.
pub fn value_hash(value: &PredicateValue) -> u64 {
    let mut h = FNV_OFFSET;
    match value {
        PredicateValue::Scalar(s) => {
            let (tag, bits) = s.canon_bits();
            h = fnv1a(h, &[tag]);
            h = fnv1a(h, &bits.to_le_bytes());
        }
        PredicateValue::Range { lo, hi } => {
            h = fnv1a(h, &[3]);
            h = fnv1a(h, &lo.to_bits().to_le_bytes());
            h = fnv1a(h, &hi.to_bits().to_le_bytes());
        }
        PredicateValue::Set(ids) => {
            h = fnv1a(h, &[4]);
            for id in ids {
                h = fnv1a(h, &id.to_le_bytes());
            }
        }
        PredicateValue::Text(t) => {
            h = fnv1a(h, &[5]);
            h = fnv1a(h, t.as_bytes());
        }
        PredicateValue::Pattern(p) => {
            h = fnv1a(h, &[6]);
            h = fnv1a(h, p.source.as_bytes());
        }
        PredicateValue::None => h = fnv1a(h, &[7]),
    }
    h
}

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

/// A single (field, operator, value) atom.
///
/// `weight` is a compile-time evaluation-cost estimate and `selectivity` a
/// compile-time match-probability estimate; both are ordering metadata only
/// and excluded from canonical identity.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub id: u32,
    pub field_id: u32,
    pub op: Operator,
    pub value: PredicateValue,
    pub weight: f32,
    pub selectivity: f32,
}

// ---------------------------------------------------------------------------
// PredicateRegistry
// ---------------------------------------------------------------------------

/// Canonical predicate store. `register` deduplicates by
/// `(field_id, operator, canonical value)` and assigns dense ids.
#[derive(Debug, Default)]
pub struct PredicateRegistry {
    predicates: Vec<Predicate>,
    index: HashMap<(u32, u8, ValueKey), u32>,
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a predicate, returning its id. Idempotent per canonical key.
    pub fn register(&mut self, field_id: u32, op: Operator, value: PredicateValue) -> u32 {
        let key = (field_id, op.ordinal(), value.key());
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.predicates.len() as u32;
        let (weight, selectivity) = estimate(op, &value);
        self.predicates.push(Predicate {
            id,
            field_id,
            op,
            value,
            weight,
            selectivity,
        });
        self.index.insert(key, id);
        id
    }

    /// Register a REGEX predicate, compiling the pattern. Compile failures
    /// surface as `BadPattern` against the owning rule.
    pub fn register_regex(&mut self, field_id: u32, pattern: &str, rule: &str) -> CompileResult<u32> {
        let compiled = CompiledPattern::compile(pattern).map_err(|e| CompileError::BadPattern {
            rule: rule.to_string(),
            pattern: pattern.to_string(),
            source: Box::new(e),
        })?;
        Ok(self.register(field_id, Operator::Regex, PredicateValue::Pattern(compiled)))
    }

    pub fn get(&self, id: u32) -> Option<&Predicate> {
        self.predicates.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn into_predicates(self) -> Vec<Predicate> {
        self.predicates
    }
}

/// Cost/selectivity heuristics. Weights order field evaluation (cheap and
/// selective first); the hot path never recomputes them.
pub(crate) fn estimate(op: Operator, value: &PredicateValue) -> (f32, f32) {
    use Operator::*;
    match op {
        IsNull | IsNotNull => (0.5, 0.5),
        EqualTo => (1.0, 0.1),
        NotEqualTo => (1.2, 0.9),
        GreaterThan | LessThan => (1.5, 0.5),
        Between => (2.0, 0.3),
        IsAnyOf | IsNoneOf => {
            let len = match value {
                PredicateValue::Set(ids) => ids.len().max(1),
                _ => 1,
            };
            let weight = 1.0 + (len as f32).log2().max(0.0) * 0.1;
            let sel = (0.1 * len as f32).min(0.9);
            if op == IsAnyOf {
                (weight, sel)
            } else {
                (weight, 1.0 - sel * 0.5)
            }
        }
        Contains | StartsWith | EndsWith => (5.0, 0.3),
        Regex => (10.0, 0.2),
    }
}

/// Intern every member of a set operand through the value dictionary and
/// return the sorted, deduplicated id list.
pub fn canonical_set(values: &mut Dictionary, members: impl Iterator<Item = String>) -> Vec<u32> {
    let mut ids: Vec<u32> = members.map(|m| values.encode(&m)).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_deduplicates_by_canonical_key() {
        let mut reg = PredicateRegistry::new();
        let a = reg.register(0, Operator::EqualTo, PredicateValue::Scalar(Scalar::Str(7)));
        let b = reg.register(0, Operator::EqualTo, PredicateValue::Scalar(Scalar::Str(7)));
        let c = reg.register(1, Operator::EqualTo, PredicateValue::Scalar(Scalar::Str(7)));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn set_identity_is_order_independent_after_canonicalization() {
        let mut values = Dictionary::new();
        let a_ids = canonical_set(&mut values, ["CA", "US"].into_iter().map(String::from));
        let b_ids = canonical_set(&mut values, ["US", "CA", "US"].into_iter().map(String::from));
        assert_eq!(a_ids, b_ids);
        let mut reg = PredicateRegistry::new();
        let a = reg.register(0, Operator::IsAnyOf, PredicateValue::Set(a_ids));
        let b = reg.register(0, Operator::IsAnyOf, PredicateValue::Set(b_ids));
        assert_eq!(a, b);
    }

    #[test]
    fn negative_zero_canonicalizes_to_zero() {
        let mut reg = PredicateRegistry::new();
        let a = reg.register(0, Operator::EqualTo, PredicateValue::Scalar(Scalar::Num(0.0)));
        let b = reg.register(0, Operator::EqualTo, PredicateValue::Scalar(Scalar::Num(-0.0)));
        assert_eq!(a, b);
    }

    #[test]
    fn regex_is_anchored_full_match() {
        let p = CompiledPattern::compile("AB.?").unwrap();
        assert!(p.regex.is_match("ABX"));
        assert!(p.regex.is_match("AB"));
        assert!(!p.regex.is_match("XABX"));
        assert!(!p.regex.is_match("ABXY"));
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let mut reg = PredicateRegistry::new();
        let err = reg.register_regex(0, "(unclosed", "R1").unwrap_err();
        assert!(matches!(err, CompileError::BadPattern { .. }));
    }

    #[test]
    fn canonical_number_merges_integral_forms() {
        assert_eq!(canonical_number(10.0), "10");
        assert_eq!(canonical_number(-3.0), "-3");
        assert_eq!(canonical_number(2.5), "2.5");
    }
}
