//! Stage 2: turn the joined Markdown into validated `tables_data`.
//!
//! 1. Digit groups in parentheses are unwrapped (`(1 234)` → `1234`).
//! 2. The model is called once with the JSON-extraction prompt under
//!    [`SamplingConfig::JSON_EXTRACTION`].
//! 3. The JSON object is cut out of the response (a code fence or a line of
//!    prose around it is tolerated) and parsed against the schema.
//! 4. The five required sub-tables are reconciled against the raw object.
//!
//! Any parse or validation failure ends the run with a
//! [`PipelineError::JsonParse`] carrying a bounded excerpt of the response.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::output::ExtractionReport;
use crate::pipeline::llm::{SamplingConfig, UserContent, VisionLanguageModel};
use crate::pipeline::postprocess::remove_parentheses_around_numbers;
use crate::prompts::JSON_SYSTEM_PROMPT;
use crate::schema::{reconcile, ParsedDocument};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

/// `JsonStage`: normalise, extract, parse, reconcile.
pub async fn extract_tables(
    markdown: &str,
    model: &dyn VisionLanguageModel,
    config: &PipelineConfig,
) -> Result<ExtractionReport, PipelineError> {
    let normalized = remove_parentheses_around_numbers(markdown);
    let sampling = SamplingConfig::JSON_EXTRACTION.with_max_tokens(config.max_tokens);

    let start = Instant::now();
    let raw = model
        .complete(&JSON_SYSTEM_PROMPT, &UserContent::text(normalized), &sampling)
        .await?;
    debug!("JSON response: {} chars in {:?}", raw.len(), start.elapsed());

    let report = parse_response(&raw, config.response_excerpt_chars)?;

    let missing = report.missing_tables();
    if missing.is_empty() {
        info!("All required tables present");
    } else {
        warn!("Missing tables: {}", missing.join(", "));
    }
    Ok(report)
}

/// Parse a raw model answer into a report.
pub fn parse_response(raw: &str, excerpt_chars: usize) -> Result<ExtractionReport, PipelineError> {
    let fail = |reason: String| PipelineError::json_parse(reason, raw, excerpt_chars);

    let payload = extract_json_payload(raw).ok_or_else(|| fail("ответ не содержит JSON-объекта".into()))?;
    let value: Value = serde_json::from_str(payload).map_err(|e| fail(e.to_string()))?;

    let message = value
        .get("tables_data")
        .and_then(Value::as_object)
        .map(reconcile)
        .ok_or_else(|| fail("поле tables_data отсутствует или не является объектом".into()))?;

    let parsed: ParsedDocument = serde_json::from_value(value).map_err(|e| fail(e.to_string()))?;

    Ok(ExtractionReport::new(message, parsed.tables_data))
}

static RE_JSON_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n(.*?)\r?\n?```").expect("json fence regex is valid")
});

/// The JSON object inside `raw`: a fenced block if present, otherwise the
/// span from the first `{` to the last `}`.
fn extract_json_payload(raw: &str) -> Option<&str> {
    let text = RE_JSON_FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map_or(raw, |m| m.as_str());

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::TableStatus;

    const FULL: &str = r#"{"tables_data": {
        "balance_head_table": {"Организация": "ООО Ромашка", "Учетный номер плательщика": 190000001},
        "balance_dates_table": {"Дата утверждения": "28.03.2024"},
        "balance_main_table_dates": ["31.12.2023", "31.12.2022"],
        "balance_main_table": {"Запасы": [1200, 1100]},
        "report_main_table": {"Выручка": [5000, null]}
    }}"#;

    #[test]
    fn plain_json_parses() {
        let report = parse_response(FULL, 500).unwrap();
        assert!(report.message.values().all(|s| *s == TableStatus::Ok));
        assert_eq!(
            report.tables_data.balance_head_table.as_ref().unwrap().taxpayer_id,
            Some(190000001)
        );
        assert!(report.xlsx.is_none());
    }

    #[test]
    fn fenced_json_with_prose_parses() {
        let raw = format!("Вот результат:\n```json\n{FULL}\n```\nГотово.");
        assert!(parse_response(&raw, 500).is_ok());
    }

    #[test]
    fn missing_tables_are_reported_not_failed() {
        let report = parse_response(r#"{"tables_data": {"balance_main_table": {}}}"#, 500).unwrap();
        assert_eq!(report.message["balance_main_table"], TableStatus::Ok);
        assert_eq!(report.missing_tables().len(), 4);
        assert!(report.tables_data.report_main_table.is_none());
    }

    #[test]
    fn null_table_counts_as_present() {
        let report = parse_response(r#"{"tables_data": {"balance_head_table": null}}"#, 500).unwrap();
        assert_eq!(report.message["balance_head_table"], TableStatus::Ok);
        assert!(report.tables_data.balance_head_table.is_none());
    }

    #[test]
    fn not_json_fails_with_excerpt() {
        let raw = "Извините, я не могу прочитать документ.".repeat(40);
        let err = parse_response(&raw, 500).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Ошибка парсинга JSON ответа от VLM:"), "{msg}");
        match err {
            PipelineError::JsonParse { excerpt, .. } => assert_eq!(excerpt.chars().count(), 500),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_envelope_fails() {
        let err = parse_response(r#"{"balance_main_table": {}}"#, 500).unwrap_err();
        assert!(err.to_string().contains("tables_data"));
    }

    #[test]
    fn wrong_cell_type_fails() {
        let err = parse_response(
            r#"{"tables_data": {"balance_main_table": {"Запасы": ["много"]}}}"#,
            500,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::JsonParse { .. }));
    }

    #[test]
    fn main_table_rows_keep_document_order() {
        let raw = r#"{"tables_data": {
            "balance_main_table": {"Запасы": [1, 2], "Денежные средства": [3, 4], "Итого": [4, 6]},
            "report_main_table": {"Выручка": [10, 9], "Активы": [1, 1]}
        }}"#;
        let report = parse_response(raw, 500).unwrap();

        let main = report.tables_data.balance_main_table.as_ref().unwrap();
        let labels: Vec<&str> = main.0.keys().map(String::as_str).collect();
        assert_eq!(labels, ["Запасы", "Денежные средства", "Итого"]);

        let out = serde_json::to_string(&report.tables_data.report_main_table).unwrap();
        assert_eq!(out, r#"{"Выручка":[10,9],"Активы":[1,1]}"#);
    }

    #[test]
    fn array_in_place_of_named_table_fails() {
        let err = parse_response(r#"{"tables_data": {"balance_dates_table": ["01.01.2024"]}}"#, 500)
            .unwrap_err();
        assert!(matches!(err, PipelineError::JsonParse { .. }));
    }

    #[test]
    fn payload_extraction() {
        assert_eq!(extract_json_payload("x {\"a\":1} y"), Some("{\"a\":1}"));
        assert_eq!(extract_json_payload("```\n{}\n```"), Some("{}"));
        assert_eq!(extract_json_payload("} {"), None);
        assert_eq!(extract_json_payload("no json"), None);
    }
}
