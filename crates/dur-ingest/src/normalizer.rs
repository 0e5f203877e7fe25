//! Record normalizer.
//!
//! Maps one raw upstream record onto the fixed [`MixtureRecord`] schema:
//! - Column lookup through a per-column alias table (exact, lower, upper case)
//! - `NOTIFICATION_DATE` reformatting (YYYYMMDD -> YYYY-MM-DD)
//! - `DEL_YN` status coercion to a boolean
//!
//! Normalization is total. Missing or malformed fields fall back to defaults.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::models::{MixtureRecord, RawRecord, MIXTURE_COLUMNS};

/// Upstream `DEL_YN` value for a live (not deleted) entry
pub const NORMAL_STATUS: &str = "정상";

/// String tokens that mean "not deleted" in addition to [`NORMAL_STATUS`].
/// Boolean `false` and numeric zero are accepted as well.
pub const FALSY_TOKENS: [&str; 6] = ["f", "false", "False", "N", "n", "0"];

/// Normalizer for raw mixture records.
pub struct RecordNormalizer {
    /// Canonical column -> source key candidates, in priority order
    aliases: HashMap<&'static str, Vec<String>>,
    /// Every alias of every column
    known_keys: HashSet<String>,
}

impl Default for RecordNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordNormalizer {
    /// Build the alias table for the canonical columns.
    pub fn new() -> Self {
        let mut aliases = HashMap::with_capacity(MIXTURE_COLUMNS.len());
        let mut known_keys = HashSet::new();

        for column in MIXTURE_COLUMNS {
            let mut candidates: Vec<String> = Vec::with_capacity(3);
            for alias in [column.to_string(), column.to_lowercase(), column.to_uppercase()] {
                if !candidates.contains(&alias) {
                    candidates.push(alias);
                }
            }
            known_keys.extend(candidates.iter().cloned());
            aliases.insert(column, candidates);
        }

        Self {
            aliases,
            known_keys,
        }
    }

    /// Value for a canonical column: the first alias present in the record.
    ///
    /// A key present with a JSON null still wins over later aliases.
    pub fn resolve<'r>(&self, raw: &'r RawRecord, column: &str) -> Option<&'r Value> {
        self.aliases
            .get(column)?
            .iter()
            .find_map(|alias| raw.get(alias.as_str()))
    }

    /// Raw keys that match no alias, i.e. upstream schema drift
    pub fn unknown_keys<'r>(&self, raw: &'r RawRecord) -> Vec<&'r str> {
        raw.keys()
            .map(String::as_str)
            .filter(|key| !self.known_keys.contains(*key))
            .collect()
    }

    /// Normalize a raw record.
    pub fn normalize(&self, raw: &RawRecord) -> MixtureRecord {
        let text = |column: &str| to_text(self.resolve(raw, column));

        MixtureRecord {
            type_name: text("TYPE_NAME"),
            mix_type: text("MIX_TYPE"),
            ingr_code: text("INGR_CODE"),
            ingr_eng_name: text("INGR_ENG_NAME"),
            ingr_kor_name: text("INGR_KOR_NAME"),
            mix: text("MIX"),
            ori: text("ORI"),
            class: text("CLASS"),
            mixture_mix_type: text("MIXTURE_MIX_TYPE"),
            mixture_ingr_code: text("MIXTURE_INGR_CODE"),
            mixture_ingr_eng_name: text("MIXTURE_INGR_ENG_NAME"),
            mixture_ingr_kor_name: text("MIXTURE_INGR_KOR_NAME"),
            mixture_mix: text("MIXTURE_MIX"),
            mixture_ori: text("MIXTURE_ORI"),
            mixture_class: text("MIXTURE_CLASS"),
            notification_date: normalize_date(self.resolve(raw, "NOTIFICATION_DATE")),
            prohbt_content: text("PROHBT_CONTENT"),
            remark: text("REMARK"),
            del_yn: is_deleted(self.resolve(raw, "DEL_YN")),
        }
    }
}

/// Trimmed text form of a value; null and missing become "". Booleans are
/// written `True` / `False`.
pub fn to_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Bool(true)) => "True".to_string(),
        Some(Value::Bool(false)) => "False".to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

/// `"20230115"` -> `"2023-01-15"`. Other non-empty values pass through
/// trimmed; empty or falsy values become `None`.
pub fn normalize_date(value: Option<&Value>) -> Option<String> {
    let value = value?;
    if is_falsy(value) {
        return None;
    }

    let text = to_text(Some(value));
    if text.is_empty() {
        return None;
    }

    if text.len() == 8 && text.bytes().all(|b| b.is_ascii_digit()) {
        Some(format!("{}-{}-{}", &text[..4], &text[4..6], &text[6..]))
    } else {
        Some(text)
    }
}

/// `DEL_YN` coercion: `false` only for the normal status or a falsy token.
pub fn is_deleted(value: Option<&Value>) -> bool {
    let live = match value {
        Some(Value::Bool(false)) => true,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::String(s)) => s == NORMAL_STATUS || FALSY_TOKENS.contains(&s.as_str()),
        _ => false,
    };
    !live
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(list) => list.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}
