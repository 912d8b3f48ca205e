pub mod basecond;
pub mod codec;
mod combine;
pub mod dict;
pub mod error;
mod factorize;
mod ir;
pub mod model;
pub mod predicate;
pub mod rules;
pub mod validate;

pub use basecond::{BaseConditionSet, DYNAMIC_BUILTIN, dynamic_field_set};
pub use codec::CodecError;
pub use dict::Dictionary;
pub use error::{CompileError, CompileResult};
pub use model::{CompileStats, EngineModel, RuleBinding};
pub use predicate::{
    CompiledPattern, FNV_OFFSET, Operator, Predicate, PredicateValue, Scalar, canonical_number,
    fnv1a,
};
pub use rules::{ConditionSpec, RuleSpec, parse_operator, parse_ruleset};

use tracing::info;

use hx_config::EngineConfig;

/// Compile a validated ruleset into an immutable [`EngineModel`].
///
/// Pipeline: validate → lower into dictionary space → factorize common
/// disjunction subsets → expand combinations → extract base-condition sets →
/// assemble the model. Any error halts compilation; no partial model is
/// emitted.
pub fn compile(rules: &[RuleSpec], config: &EngineConfig) -> CompileResult<EngineModel> {
    validate::validate(rules)?;

    let mut fields = Dictionary::new();
    let mut values = Dictionary::new();
    let mut registry = predicate::PredicateRegistry::new();

    let mut norm = ir::lower_rules(rules, &mut fields, &mut values, &mut registry)?;
    let factored_fields = factorize::factorize(&mut norm);
    let outcome = combine::build_combinations(&norm, &mut registry)?;

    let predicates = registry.into_predicates();
    let dynamic = dynamic_field_set(&config.engine.dynamic_fields);
    let base_sets = basecond::extract_base_sets(&outcome.drafts, &predicates, &fields, &dynamic);
    let postings = model::build_postings(&outcome.drafts, predicates.len());

    let stats = CompileStats {
        rules_total: rules.len() as u32,
        rules_disabled: rules.iter().filter(|r| !r.enabled).count() as u32,
        dead_rules: outcome.dead_rules,
        predicates: predicates.len() as u32,
        combinations: outcome.drafts.len() as u32,
        contradictions_dropped: outcome.contradictions_dropped,
        duplicate_bindings: outcome.duplicate_bindings,
        factored_fields,
        base_sets: base_sets.len() as u32,
    };

    info!(
        rules = stats.rules_total,
        predicates = stats.predicates,
        combinations = stats.combinations,
        base_sets = stats.base_sets,
        contradictions = stats.contradictions_dropped,
        "ruleset compiled"
    );

    let mut dynamic_fields = config.engine.dynamic_fields.clone();
    dynamic_fields.iter_mut().for_each(|f| *f = f.trim().to_ascii_uppercase());
    dynamic_fields.sort_unstable();
    dynamic_fields.dedup();

    EngineModel::from_parts(
        fields,
        values,
        predicates,
        outcome.drafts,
        postings,
        base_sets,
        config.engine.selection,
        dynamic_fields,
        stats,
    )
}

/// Parse a JSON rule array and compile it.
pub fn compile_json(json: &str, config: &EngineConfig) -> CompileResult<EngineModel> {
    let rules = parse_ruleset(json)?;
    compile(&rules, config)
}
