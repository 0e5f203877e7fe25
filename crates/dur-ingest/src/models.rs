//! Data model for DUR mixture records
//!
//! Records travel through three shapes: the raw JSON object delivered by the
//! upstream API ([`RawRecord`]), a decoded page of those objects ([`Page`]),
//! and the fixed 19-column row written to the store ([`MixtureRecord`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Destination columns, in table order
pub const MIXTURE_COLUMNS: [&str; 19] = [
    "TYPE_NAME",
    "MIX_TYPE",
    "INGR_CODE",
    "INGR_ENG_NAME",
    "INGR_KOR_NAME",
    "MIX",
    "ORI",
    "CLASS",
    "MIXTURE_MIX_TYPE",
    "MIXTURE_INGR_CODE",
    "MIXTURE_INGR_ENG_NAME",
    "MIXTURE_INGR_KOR_NAME",
    "MIXTURE_MIX",
    "MIXTURE_ORI",
    "MIXTURE_CLASS",
    "NOTIFICATION_DATE",
    "PROHBT_CONTENT",
    "REMARK",
    "DEL_YN",
];

/// Unique key of the `mixtures` table: contraindication category plus the
/// ordered ingredient pair.
pub const NATURAL_KEY: [&str; 3] = ["TYPE_NAME", "INGR_CODE", "MIXTURE_INGR_CODE"];

/// One upstream record, keys in whatever casing the API chose
pub type RawRecord = serde_json::Map<String, Value>;

/// Natural key value of a [`MixtureRecord`]
pub type NaturalKey = (String, String, String);

/// A decoded upstream page
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    /// `body.totalCount`, 0 when absent or unreadable
    pub total_count: u64,
    /// Items with `{"item": ...}` envelopes removed, in delivery order
    pub items: Vec<RawRecord>,
}

impl Page {
    /// Decode a response body of the form `{"body": {"totalCount", "items"}}`.
    ///
    /// Items may be an array of records, an array of `{"item": record}`
    /// envelopes, or an object `{"item": [...]}`. Anything that is not a JSON
    /// object after unwrapping is dropped.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut root) = value else {
            return Self::default();
        };
        let Some(Value::Object(mut body)) = root.remove("body") else {
            return Self::default();
        };

        let total_count = body.get("totalCount").map(read_count).unwrap_or(0);

        let mut items = Vec::new();
        for item in flatten_items(body.remove("items")) {
            match unwrap_item(item) {
                Value::Object(record) => items.push(record),
                other => warn!(item = %other, "Skipping non-object item in upstream page"),
            }
        }

        Self { total_count, items }
    }
}

fn read_count(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn flatten_items(items: Option<Value>) -> Vec<Value> {
    match items {
        Some(Value::Array(list)) => list,
        Some(Value::Object(mut map)) => match map.remove("item") {
            Some(Value::Array(list)) => list,
            Some(single) => vec![single],
            None => vec![Value::Object(map)],
        },
        _ => Vec::new(),
    }
}

fn unwrap_item(item: Value) -> Value {
    match item {
        Value::Object(mut map) if map.contains_key("item") => {
            map.remove("item").unwrap_or(Value::Null)
        },
        other => other,
    }
}

/// Normalized mixture row, exactly the destination columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MixtureRecord {
    pub type_name: String,
    pub mix_type: String,
    pub ingr_code: String,
    pub ingr_eng_name: String,
    pub ingr_kor_name: String,
    pub mix: String,
    pub ori: String,
    pub class: String,
    pub mixture_mix_type: String,
    pub mixture_ingr_code: String,
    pub mixture_ingr_eng_name: String,
    pub mixture_ingr_kor_name: String,
    pub mixture_mix: String,
    pub mixture_ori: String,
    pub mixture_class: String,
    /// `YYYY-MM-DD` when the upstream sent eight digits
    pub notification_date: Option<String>,
    pub prohbt_content: String,
    pub remark: String,
    /// `false` for live entries, `true` otherwise
    pub del_yn: bool,
}

/// Typed view of one column value, used when binding rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnValue<'a> {
    Text(&'a str),
    Date(Option<&'a str>),
    Flag(bool),
}

impl MixtureRecord {
    pub fn natural_key(&self) -> NaturalKey {
        (
            self.type_name.clone(),
            self.ingr_code.clone(),
            self.mixture_ingr_code.clone(),
        )
    }

    /// Values in [`MIXTURE_COLUMNS`] order
    pub fn column_values(&self) -> [ColumnValue<'_>; 19] {
        use ColumnValue::{Date, Flag, Text};
        [
            Text(&self.type_name),
            Text(&self.mix_type),
            Text(&self.ingr_code),
            Text(&self.ingr_eng_name),
            Text(&self.ingr_kor_name),
            Text(&self.mix),
            Text(&self.ori),
            Text(&self.class),
            Text(&self.mixture_mix_type),
            Text(&self.mixture_ingr_code),
            Text(&self.mixture_ingr_eng_name),
            Text(&self.mixture_ingr_kor_name),
            Text(&self.mixture_mix),
            Text(&self.mixture_ori),
            Text(&self.mixture_class),
            Date(self.notification_date.as_deref()),
            Text(&self.prohbt_content),
            Text(&self.remark),
            Flag(self.del_yn),
        ]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_unwraps_item_envelopes() {
        let page = Page::from_value(json!({
            "header": {"resultCode": "00"},
            "body": {
                "totalCount": 3,
                "items": [
                    {"item": {"INGR_CODE": "D000001"}},
                    {"INGR_CODE": "D000002"},
                    {"item": {"ingr_code": "D000003"}}
                ]
            }
        }));

        assert_eq!(page.total_count, 3);
        let codes: Vec<_> = page
            .items
            .iter()
            .map(|r| r.get("INGR_CODE").or_else(|| r.get("ingr_code")).unwrap().clone())
            .collect();
        assert_eq!(codes, vec![json!("D000001"), json!("D000002"), json!("D000003")]);
    }

    #[test]
    fn test_page_accepts_item_object_form() {
        let page = Page::from_value(json!({
            "body": {"totalCount": "2", "items": {"item": [{"A": 1}, {"A": 2}]}}
        }));
        assert_eq!(page.total_count, 2);
        assert_eq!(page.items.len(), 2);

        let single = Page::from_value(json!({
            "body": {"totalCount": 1, "items": {"item": {"A": 1}}}
        }));
        assert_eq!(single.items.len(), 1);
    }

    #[test]
    fn test_page_missing_parts_degrade_to_empty() {
        assert_eq!(Page::from_value(json!({})), Page::default());
        assert_eq!(Page::from_value(json!("<xml/>")), Page::default());

        let page = Page::from_value(json!({"body": {"items": ""}}));
        assert_eq!(page.total_count, 0);
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_page_drops_non_object_items() {
        let page = Page::from_value(json!({
            "body": {"totalCount": 3, "items": [{"A": 1}, "junk", {"item": null}]}
        }));
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn test_record_serializes_with_column_names() {
        let record = MixtureRecord {
            type_name: "병용금기".into(),
            mix_type: "단일".into(),
            ingr_code: "D000027".into(),
            ingr_eng_name: "Aceclofenac".into(),
            ingr_kor_name: "아세클로페낙".into(),
            mix: "단일".into(),
            ori: String::new(),
            class: "[114]해열.진통.소염제".into(),
            mixture_mix_type: "단일".into(),
            mixture_ingr_code: "D000893".into(),
            mixture_ingr_eng_name: "Methotrexate".into(),
            mixture_ingr_kor_name: "메토트렉세이트".into(),
            mixture_mix: "단일".into(),
            mixture_ori: String::new(),
            mixture_class: "[421]항악성종양제".into(),
            notification_date: Some("2009-03-09".into()),
            prohbt_content: "메토트렉세이트의 독성 증가".into(),
            remark: String::new(),
            del_yn: false,
        };

        let value = serde_json::to_value(&record).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        let mut expected: Vec<_> = MIXTURE_COLUMNS.iter().map(|c| c.to_string()).collect();
        expected.sort();
        assert_eq!(keys, expected);
        assert_eq!(value["DEL_YN"], json!(false));

        let values = record.column_values();
        assert_eq!(values[0], ColumnValue::Text("병용금기"));
        assert_eq!(values[15], ColumnValue::Date(Some("2009-03-09")));
        assert_eq!(values[18], ColumnValue::Flag(false));
        assert_eq!(
            record.natural_key(),
            ("병용금기".to_string(), "D000027".to_string(), "D000893".to_string())
        );
    }
}
