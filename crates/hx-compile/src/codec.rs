use std::io::{Read, Write};
use std::path::Path;

use roaring::RoaringBitmap;

use hx_config::SelectionStrategy;

use crate::basecond::BaseConditionSet;
use crate::combine::CombinationDraft;
use crate::dict::Dictionary;
use crate::model::{CompileStats, EngineModel, RuleBinding};
use crate::predicate::{CompiledPattern, Operator, Predicate, PredicateValue, Scalar};

// ---------------------------------------------------------------------------
// Model codec — self-describing binary persistence
// ---------------------------------------------------------------------------
//
// Layout (all integers little-endian, strings length-prefixed UTF-8):
//   header: magic "HLXM", version u16, selection u8, reserved u8
//   dynamic fields, field dictionary, value dictionary,
//   predicate table, combination tables, base-condition sets,
//   inverted-index postings (native RoaringBitmap wire format), stats.
//
// Derived tables (per-field lists, weight order, reverse lookups, the
// always-eligible bitmap) are rebuilt on load by the same finishing step the
// compiler uses, so a round-trip evaluates bit-for-bit identically.

const MAGIC: [u8; 4] = *b"HLXM";
const VERSION: u16 = 1;

/// Guard for length prefixes so a corrupt file cannot force huge allocations.
const MAX_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a helios model (bad magic)")]
    BadMagic,
    #[error("unsupported model version {0}")]
    UnsupportedVersion(u16),
    #[error("corrupt model: {0}")]
    Corrupt(String),
}

fn corrupt(what: impl Into<String>) -> CodecError {
    CodecError::Corrupt(what.into())
}

// ---------------------------------------------------------------------------
// Save
// ---------------------------------------------------------------------------

pub fn save(model: &EngineModel, path: &Path) -> Result<(), CodecError> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    write_model(model, &mut file)?;
    file.flush()?;
    Ok(())
}

pub fn write_model<W: Write>(model: &EngineModel, w: &mut W) -> Result<(), CodecError> {
    w.write_all(&MAGIC)?;
    put_u16(w, VERSION)?;
    put_u8(w, selection_tag(model.selection))?;
    put_u8(w, 0)?;

    put_u32(w, model.dynamic_fields.len() as u32)?;
    for name in &model.dynamic_fields {
        put_str(w, name)?;
    }

    write_dictionary(w, &model.fields)?;
    write_dictionary(w, &model.values)?;

    put_u32(w, model.predicates.len() as u32)?;
    for p in &model.predicates {
        put_u32(w, p.field_id)?;
        put_u8(w, p.op.ordinal())?;
        write_value(w, &p.value)?;
    }

    put_u32(w, model.num_combinations())?;
    for c in 0..model.num_combinations() as usize {
        put_ids(w, &model.predicate_ids[c])?;
        put_u32(w, model.all_rules[c].len() as u32)?;
        for binding in &model.all_rules[c] {
            put_str(w, &binding.code)?;
            put_i32(w, binding.priority)?;
            put_str(w, &binding.description)?;
        }
    }

    put_u32(w, model.base_sets.len() as u32)?;
    for set in &model.base_sets {
        put_u32(w, set.set_id)?;
        put_u64(w, set.canonical_hash)?;
        put_ids(w, &set.static_predicate_ids)?;
        put_f32(w, set.avg_selectivity)?;
        write_bitmap(w, &set.affected)?;
    }

    put_u32(w, model.postings.len() as u32)?;
    for posting in &model.postings {
        write_bitmap(w, posting)?;
    }

    write_stats(w, &model.stats)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

pub fn load(path: &Path) -> Result<EngineModel, CodecError> {
    let mut file = std::io::BufReader::new(std::fs::File::open(path)?);
    read_model(&mut file)
}

pub fn read_model<R: Read>(r: &mut R) -> Result<EngineModel, CodecError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = get_u16(r)?;
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let selection = selection_from_tag(get_u8(r)?)?;
    let _reserved = get_u8(r)?;

    let n_dynamic = get_len(r, "dynamic fields")?;
    let mut dynamic_fields = Vec::with_capacity(n_dynamic);
    for _ in 0..n_dynamic {
        dynamic_fields.push(get_str(r)?);
    }

    let fields = read_dictionary(r)?;
    let values = read_dictionary(r)?;

    let n_predicates = get_len(r, "predicates")?;
    let mut predicates = Vec::with_capacity(n_predicates);
    for id in 0..n_predicates {
        let field_id = get_u32(r)?;
        let op = Operator::from_ordinal(get_u8(r)?)
            .ok_or_else(|| corrupt("unknown operator ordinal"))?;
        let value = read_value(r)?;
        // Weights are deterministic compile metadata; re-deriving keeps the
        // wire format free of them.
        let (weight, selectivity) = crate::predicate::estimate(op, &value);
        predicates.push(Predicate {
            id: id as u32,
            field_id,
            op,
            value,
            weight,
            selectivity,
        });
    }

    let n_combos = get_len(r, "combinations")?;
    let mut drafts = Vec::with_capacity(n_combos);
    for _ in 0..n_combos {
        let predicate_ids = get_ids(r)?;
        let n_rules = get_len(r, "rule bindings")?;
        let mut rules = Vec::with_capacity(n_rules);
        for _ in 0..n_rules {
            let code = get_str(r)?;
            let priority = get_i32(r)?;
            let description = get_str(r)?;
            rules.push(RuleBinding {
                code,
                priority,
                description,
            });
        }
        drafts.push(CombinationDraft {
            predicate_ids,
            rules,
        });
    }

    let n_sets = get_len(r, "base sets")?;
    let mut base_sets = Vec::with_capacity(n_sets);
    for _ in 0..n_sets {
        let set_id = get_u32(r)?;
        let canonical_hash = get_u64(r)?;
        let static_predicate_ids = get_ids(r)?;
        let avg_selectivity = get_f32(r)?;
        let affected = read_bitmap(r)?;
        base_sets.push(BaseConditionSet {
            set_id,
            static_predicate_ids,
            canonical_hash,
            affected,
            avg_selectivity,
        });
    }

    let n_postings = get_len(r, "postings")?;
    if n_postings != predicates.len() {
        return Err(corrupt("postings table size mismatch"));
    }
    let mut postings = Vec::with_capacity(n_postings);
    for _ in 0..n_postings {
        postings.push(read_bitmap(r)?);
    }

    let stats = read_stats(r)?;

    EngineModel::from_parts(
        fields,
        values,
        predicates,
        drafts,
        postings,
        base_sets,
        selection,
        dynamic_fields,
        stats,
    )
    .map_err(|e| corrupt(e.to_string()))
}

// ---------------------------------------------------------------------------
// Section helpers
// ---------------------------------------------------------------------------

fn selection_tag(s: SelectionStrategy) -> u8 {
    match s {
        SelectionStrategy::AllMatches => 0,
        SelectionStrategy::FirstMatch => 1,
        SelectionStrategy::HighestPriority => 2,
    }
}

fn selection_from_tag(tag: u8) -> Result<SelectionStrategy, CodecError> {
    Ok(match tag {
        0 => SelectionStrategy::AllMatches,
        1 => SelectionStrategy::FirstMatch,
        2 => SelectionStrategy::HighestPriority,
        _ => return Err(corrupt("unknown selection strategy")),
    })
}

fn write_dictionary<W: Write>(w: &mut W, dict: &Dictionary) -> Result<(), CodecError> {
    put_u32(w, dict.len() as u32)?;
    for (_, s) in dict.iter() {
        put_str(w, s)?;
    }
    Ok(())
}

fn read_dictionary<R: Read>(r: &mut R) -> Result<Dictionary, CodecError> {
    let n = get_len(r, "dictionary")?;
    let mut dict = Dictionary::new();
    for expected in 0..n {
        let s = get_str(r)?;
        let id = dict.encode(&s);
        if id as usize != expected {
            return Err(corrupt("dictionary entries are not unique"));
        }
    }
    Ok(dict)
}

fn write_value<W: Write>(w: &mut W, value: &PredicateValue) -> Result<(), CodecError> {
    match value {
        PredicateValue::Scalar(Scalar::Num(n)) => {
            put_u8(w, 0)?;
            put_f64(w, *n)?;
        }
        PredicateValue::Scalar(Scalar::Bool(b)) => {
            put_u8(w, 1)?;
            put_u8(w, *b as u8)?;
        }
        PredicateValue::Scalar(Scalar::Str(id)) => {
            put_u8(w, 2)?;
            put_u32(w, *id)?;
        }
        PredicateValue::Range { lo, hi } => {
            put_u8(w, 3)?;
            put_f64(w, *lo)?;
            put_f64(w, *hi)?;
        }
        PredicateValue::Set(ids) => {
            put_u8(w, 4)?;
            put_ids(w, ids)?;
        }
        PredicateValue::Text(t) => {
            put_u8(w, 5)?;
            put_str(w, t)?;
        }
        PredicateValue::Pattern(p) => {
            put_u8(w, 6)?;
            put_str(w, &p.source)?;
        }
        PredicateValue::None => put_u8(w, 7)?,
    }
    Ok(())
}

fn read_value<R: Read>(r: &mut R) -> Result<PredicateValue, CodecError> {
    Ok(match get_u8(r)? {
        0 => PredicateValue::Scalar(Scalar::Num(get_f64(r)?)),
        1 => PredicateValue::Scalar(Scalar::Bool(get_u8(r)? != 0)),
        2 => PredicateValue::Scalar(Scalar::Str(get_u32(r)?)),
        3 => PredicateValue::Range {
            lo: get_f64(r)?,
            hi: get_f64(r)?,
        },
        4 => PredicateValue::Set(get_ids(r)?),
        5 => PredicateValue::Text(get_str(r)?),
        6 => {
            let source = get_str(r)?;
            let pattern = CompiledPattern::compile(&source)
                .map_err(|e| corrupt(format!("stored pattern {source:?} no longer compiles: {e}")))?;
            PredicateValue::Pattern(pattern)
        }
        7 => PredicateValue::None,
        _ => return Err(corrupt("unknown predicate value tag")),
    })
}

fn write_bitmap<W: Write>(w: &mut W, bitmap: &RoaringBitmap) -> Result<(), CodecError> {
    put_u32(w, bitmap.serialized_size() as u32)?;
    bitmap.serialize_into(&mut *w)?;
    Ok(())
}

fn read_bitmap<R: Read>(r: &mut R) -> Result<RoaringBitmap, CodecError> {
    let len = get_len(r, "bitmap")?;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    RoaringBitmap::deserialize_from(&buf[..]).map_err(|e| corrupt(format!("bitmap: {e}")))
}

fn write_stats<W: Write>(w: &mut W, stats: &CompileStats) -> Result<(), CodecError> {
    put_u32(w, stats.rules_total)?;
    put_u32(w, stats.rules_disabled)?;
    put_u32(w, stats.dead_rules.len() as u32)?;
    for code in &stats.dead_rules {
        put_str(w, code)?;
    }
    put_u32(w, stats.predicates)?;
    put_u32(w, stats.combinations)?;
    put_u32(w, stats.contradictions_dropped)?;
    put_u32(w, stats.duplicate_bindings)?;
    put_u32(w, stats.factored_fields)?;
    put_u32(w, stats.base_sets)?;
    Ok(())
}

fn read_stats<R: Read>(r: &mut R) -> Result<CompileStats, CodecError> {
    let rules_total = get_u32(r)?;
    let rules_disabled = get_u32(r)?;
    let n_dead = get_len(r, "dead rules")?;
    let mut dead_rules = Vec::with_capacity(n_dead);
    for _ in 0..n_dead {
        dead_rules.push(get_str(r)?);
    }
    Ok(CompileStats {
        rules_total,
        rules_disabled,
        dead_rules,
        predicates: get_u32(r)?,
        combinations: get_u32(r)?,
        contradictions_dropped: get_u32(r)?,
        duplicate_bindings: get_u32(r)?,
        factored_fields: get_u32(r)?,
        base_sets: get_u32(r)?,
    })
}

// ---------------------------------------------------------------------------
// Primitive helpers
// ---------------------------------------------------------------------------

fn put_u8<W: Write>(w: &mut W, v: u8) -> std::io::Result<()> {
    w.write_all(&[v])
}

fn put_u16<W: Write>(w: &mut W, v: u16) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn put_u32<W: Write>(w: &mut W, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn put_u64<W: Write>(w: &mut W, v: u64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn put_i32<W: Write>(w: &mut W, v: i32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn put_f32<W: Write>(w: &mut W, v: f32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn put_f64<W: Write>(w: &mut W, v: f64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn put_str<W: Write>(w: &mut W, s: &str) -> std::io::Result<()> {
    put_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes())
}

fn put_ids<W: Write>(w: &mut W, ids: &[u32]) -> std::io::Result<()> {
    put_u32(w, ids.len() as u32)?;
    for &id in ids {
        put_u32(w, id)?;
    }
    Ok(())
}

fn get_u8<R: Read>(r: &mut R) -> Result<u8, CodecError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn get_u16<R: Read>(r: &mut R) -> Result<u16, CodecError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn get_u32<R: Read>(r: &mut R) -> Result<u32, CodecError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn get_u64<R: Read>(r: &mut R) -> Result<u64, CodecError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn get_i32<R: Read>(r: &mut R) -> Result<i32, CodecError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn get_f32<R: Read>(r: &mut R) -> Result<f32, CodecError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

fn get_f64<R: Read>(r: &mut R) -> Result<f64, CodecError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn get_len<R: Read>(r: &mut R, what: &str) -> Result<usize, CodecError> {
    let len = get_u32(r)?;
    if len > MAX_LEN {
        return Err(corrupt(format!("{what} length {len} exceeds limit")));
    }
    Ok(len as usize)
}

fn get_str<R: Read>(r: &mut R) -> Result<String, CodecError> {
    let len = get_len(r, "string")?;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| corrupt("string is not UTF-8"))
}

fn get_ids<R: Read>(r: &mut R) -> Result<Vec<u32>, CodecError> {
    let len = get_len(r, "id list")?;
    let mut ids = Vec::with_capacity(len);
    for _ in 0..len {
        ids.push(get_u32(r)?);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile_json;
    use hx_config::EngineConfig;

    const RULES: &str = r#"[
      {"rule_code": "A", "priority": 3, "description": "active big", "conditions": [
        {"field": "status", "operator": "EQUAL_TO", "value": "ACTIVE"},
        {"field": "amount", "operator": "GREATER_THAN", "value": 100}]},
      {"rule_code": "B", "conditions": [
        {"field": "country", "operator": "IS_ANY_OF", "value": ["US", "CA"]},
        {"field": "note", "operator": "REGEX", "value": "N-[0-9]+"},
        {"field": "deleted", "operator": "IS_NULL"}]}
    ]"#;

    #[test]
    fn round_trip_preserves_model_shape() {
        let config = EngineConfig::default();
        let model = compile_json(RULES, &config).unwrap();

        let mut buf = Vec::new();
        write_model(&model, &mut buf).unwrap();
        let loaded = read_model(&mut &buf[..]).unwrap();

        assert_eq!(loaded.num_combinations(), model.num_combinations());
        assert_eq!(loaded.predicates.len(), model.predicates.len());
        assert_eq!(loaded.predicate_count, model.predicate_count);
        assert_eq!(loaded.priority, model.priority);
        assert_eq!(loaded.rule_code, model.rule_code);
        assert_eq!(loaded.predicate_ids, model.predicate_ids);
        assert_eq!(loaded.postings, model.postings);
        assert_eq!(loaded.base_sets.len(), model.base_sets.len());
        for (a, b) in loaded.base_sets.iter().zip(&model.base_sets) {
            assert_eq!(a.canonical_hash, b.canonical_hash);
            assert_eq!(a.static_predicate_ids, b.static_predicate_ids);
            assert_eq!(a.affected, b.affected);
        }
        assert_eq!(loaded.always_eligible, model.always_eligible);
        assert_eq!(loaded.selection, model.selection);
        assert_eq!(loaded.fields.len(), model.fields.len());
        assert_eq!(loaded.values.len(), model.values.len());

        // A second serialization must be byte-identical.
        let mut buf2 = Vec::new();
        write_model(&loaded, &mut buf2).unwrap();
        assert_eq!(buf, buf2);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = read_model(&mut &b"NOPE....."[..]).unwrap_err();
        assert!(matches!(err, CodecError::BadMagic));
    }

    #[test]
    fn truncated_model_is_corrupt_not_panic() {
        let config = EngineConfig::default();
        let model = compile_json(RULES, &config).unwrap();
        let mut buf = Vec::new();
        write_model(&model, &mut buf).unwrap();
        buf.truncate(buf.len() / 2);
        assert!(read_model(&mut &buf[..]).is_err());
    }
}
