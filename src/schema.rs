//! The `tables_data` schema: balance sheet header, dates and the two main
//! tables, keyed by the Russian field names the extraction model emits.
//!
//! Every named field is described once in a declarative [`FieldSpec`]
//! table. The same table feeds the JSON schema embedded in the extraction
//! prompt ([`prompt_schema`]) and is checked against the serde renames in
//! the tests, so the prompt and the parser cannot drift apart.
//!
//! Parsing is strict about shape: a sub-table of the wrong JSON type, a
//! string where a number belongs, or a non-integral amount fails the whole
//! document. Only integer coercion is lenient (`"1234"`, `1234.0`).

use indexmap::IndexMap;
use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fmt;

use crate::output::TableStatus;

/// Top-level keys every `tables_data` object is reconciled against, in
/// report order.
pub const REQUIRED_TABLES: [&str; 5] = [
    "balance_head_table",
    "balance_dates_table",
    "balance_main_table_dates",
    "balance_main_table",
    "report_main_table",
];

// ── Declarative field table ──────────────────────────────────────────────

/// JSON type of a named scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    /// `ДД.ММ.ГГГГ` date carried as a string.
    Date,
}

/// One named field of a sub-table.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Rust field name.
    pub name: &'static str,
    /// Key in the model's JSON (and in the result).
    pub alias: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
}

pub const HEAD_TABLE_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "organization",
        alias: "Организация",
        kind: FieldKind::Text,
        description: "Название организации",
    },
    FieldSpec {
        name: "taxpayer_id",
        alias: "Учетный номер плательщика",
        kind: FieldKind::Integer,
        description: "Учетный номер плательщика",
    },
    FieldSpec {
        name: "economic_activity",
        alias: "Вид экономической деятельности",
        kind: FieldKind::Text,
        description: "Вид экономической деятельности",
    },
    FieldSpec {
        name: "legal_form",
        alias: "Организационно-правовая форма",
        kind: FieldKind::Text,
        description: "Организационно-правовая форма",
    },
    FieldSpec {
        name: "governing_body",
        alias: "Орган управления",
        kind: FieldKind::Text,
        description: "Орган управления",
    },
    FieldSpec {
        name: "unit",
        alias: "Единица измерения",
        kind: FieldKind::Text,
        description: "Единица измерения",
    },
    FieldSpec {
        name: "address",
        alias: "Адрес",
        kind: FieldKind::Text,
        description: "Адрес",
    },
];

pub const DATES_TABLE_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "approval_date",
        alias: "Дата утверждения",
        kind: FieldKind::Date,
        description: "Дата утверждения в формате ДД.ММ.ГГГГ",
    },
    FieldSpec {
        name: "submission_date",
        alias: "Дата отправки",
        kind: FieldKind::Date,
        description: "Дата отправки в формате ДД.ММ.ГГГГ",
    },
    FieldSpec {
        name: "acceptance_date",
        alias: "Дата принятия",
        kind: FieldKind::Date,
        description: "Дата принятия в формате ДД.ММ.ГГГГ",
    },
];

const MAIN_TABLE_DATES_DESCRIPTION: &str =
    "Даты, соответствующие двум столбцам основной таблицы баланса в формате ДД.ММ.ГГГГ";
const BALANCE_MAIN_TABLE_DESCRIPTION: &str =
    "Строки основной таблицы баланса: название статьи → значения по столбцам";
const REPORT_MAIN_TABLE_DESCRIPTION: &str =
    "Строки отчета о прибылях и убытках: название статьи → значения по столбцам";

// ── Typed schema ─────────────────────────────────────────────────────────

/// Document header: who filed the balance sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceHeadTable {
    #[serde(rename = "Организация", default)]
    pub organization: Option<String>,
    #[serde(
        rename = "Учетный номер плательщика",
        default,
        deserialize_with = "lenient_optional_int"
    )]
    pub taxpayer_id: Option<i64>,
    #[serde(rename = "Вид экономической деятельности", default)]
    pub economic_activity: Option<String>,
    #[serde(rename = "Организационно-правовая форма", default)]
    pub legal_form: Option<String>,
    #[serde(rename = "Орган управления", default)]
    pub governing_body: Option<String>,
    #[serde(rename = "Единица измерения", default)]
    pub unit: Option<String>,
    #[serde(rename = "Адрес", default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDatesTable {
    #[serde(rename = "Дата утверждения", default)]
    pub approval_date: Option<String>,
    #[serde(rename = "Дата отправки", default)]
    pub submission_date: Option<String>,
    #[serde(rename = "Дата принятия", default)]
    pub acceptance_date: Option<String>,
}

/// Row label → column values, in the order the rows appear in the form.
///
/// Rows are not required to have equal length; see [`Self::column_counts`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MainTable(pub IndexMap<String, Vec<Option<i64>>>);

impl MainTable {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&[Option<i64>]> {
        self.0.get(label).map(Vec::as_slice)
    }

    /// Distinct row lengths. A well-formed two-column table yields `{2}`.
    pub fn column_counts(&self) -> BTreeSet<usize> {
        self.0.values().map(Vec::len).collect()
    }
}

impl<'de> Deserialize<'de> for MainTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rows = IndexMap::<String, Vec<Option<LenientInt>>>::deserialize(deserializer)?;
        Ok(MainTable(
            rows.into_iter()
                .map(|(label, cells)| {
                    (label, cells.into_iter().map(|c| c.map(|n| n.0)).collect())
                })
                .collect(),
        ))
    }
}

/// Everything extracted from one document.
///
/// A sub-table missing from the model's answer is `None` and serialises as
/// `null`; its absence is reported separately through reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablesData {
    #[serde(default, deserialize_with = "object_only")]
    pub balance_head_table: Option<BalanceHeadTable>,
    #[serde(default, deserialize_with = "object_only")]
    pub balance_dates_table: Option<BalanceDatesTable>,
    #[serde(default)]
    pub balance_main_table_dates: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub balance_main_table: Option<MainTable>,
    #[serde(default)]
    pub report_main_table: Option<MainTable>,
}

/// Envelope the extraction model is asked to produce.
#[derive(Debug, Clone, Deserialize)]
pub struct ParsedDocument {
    pub tables_data: TablesData,
}

/// Named-field sub-tables must arrive as JSON objects. Derived struct
/// visitors also accept arrays and fill fields by position.
fn object_only<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Option::<Value>::deserialize(deserializer)? {
        None => Ok(None),
        Some(value @ Value::Object(_)) => T::deserialize(value).map(Some).map_err(de::Error::custom),
        Some(other) => Err(de::Error::invalid_type(unexpected(&other), &"a JSON object")),
    }
}

fn unexpected(value: &Value) -> de::Unexpected<'_> {
    match value {
        Value::Null => de::Unexpected::Unit,
        Value::Bool(b) => de::Unexpected::Bool(*b),
        Value::Number(_) => de::Unexpected::Other("number"),
        Value::String(s) => de::Unexpected::Str(s),
        Value::Array(_) => de::Unexpected::Seq,
        Value::Object(_) => de::Unexpected::Map,
    }
}

// ── Lenient integers ─────────────────────────────────────────────────────

/// An integer that may arrive as a JSON number or a numeric string.
struct LenientInt(i64);

impl<'de> Deserialize<'de> for LenientInt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(LenientIntVisitor)
    }
}

struct LenientIntVisitor;

impl<'de> Visitor<'de> for LenientIntVisitor {
    type Value = LenientInt;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or a string of digits")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(LenientInt(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v)
            .map(LenientInt)
            .map_err(|_| E::custom(format!("integer {v} out of range")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        if v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
            Ok(LenientInt(v as i64))
        } else {
            Err(E::invalid_value(de::Unexpected::Float(v), &self))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        let compact: String = v.chars().filter(|c| !c.is_whitespace()).collect();
        let digits = compact.strip_prefix('-').unwrap_or(&compact);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(E::invalid_value(de::Unexpected::Str(v), &self));
        }
        compact
            .parse()
            .map(LenientInt)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}

fn lenient_optional_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(Option::<LenientInt>::deserialize(deserializer)?.map(|n| n.0))
}

// ── Reconciliation ───────────────────────────────────────────────────────

/// `"OK"` for every required key present in `tables_data`, `"Missing"`
/// otherwise. A key holding `null` is present.
pub fn reconcile(tables_data: &Map<String, Value>) -> IndexMap<String, TableStatus> {
    REQUIRED_TABLES
        .iter()
        .map(|&key| {
            let status = if tables_data.contains_key(key) {
                TableStatus::Ok
            } else {
                TableStatus::Missing
            };
            (key.to_string(), status)
        })
        .collect()
}

// ── Prompt schema ────────────────────────────────────────────────────────

fn nullable(kind: FieldKind) -> Value {
    match kind {
        FieldKind::Text => json!({ "type": ["string", "null"] }),
        FieldKind::Integer => json!({ "type": ["integer", "null"] }),
        FieldKind::Date => json!({ "type": ["string", "null"], "pattern": r"^\d{2}\.\d{2}\.\d{4}$" }),
    }
}

fn object_schema(fields: &[FieldSpec]) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|f| {
            let mut prop = nullable(f.kind);
            prop["description"] = Value::from(f.description);
            (f.alias.to_string(), prop)
        })
        .collect();
    json!({ "type": "object", "properties": properties })
}

fn main_table_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "description": description,
        "additionalProperties": {
            "type": "array",
            "items": { "type": ["integer", "null"] }
        }
    })
}

/// JSON schema of the expected answer, as embedded in the extraction prompt.
pub fn prompt_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tables_data": {
                "type": "object",
                "properties": {
                    "balance_head_table": object_schema(HEAD_TABLE_FIELDS),
                    "balance_dates_table": object_schema(DATES_TABLE_FIELDS),
                    "balance_main_table_dates": {
                        "type": "array",
                        "description": MAIN_TABLE_DATES_DESCRIPTION,
                        "items": nullable(FieldKind::Date)
                    },
                    "balance_main_table": main_table_schema(BALANCE_MAIN_TABLE_DESCRIPTION),
                    "report_main_table": main_table_schema(REPORT_MAIN_TABLE_DESCRIPTION)
                },
                "required": REQUIRED_TABLES
            }
        },
        "required": ["tables_data"]
    })
}
