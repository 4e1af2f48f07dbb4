//! Pipeline integration tests with a scripted in-process model.
//!
//! No network and no pdfium: PDF rasterisation is covered by the gated
//! suite in `tests/e2e.rs`. Everything else (detection, DOCX and image
//! extraction, both model stages, reconciliation and the result contract)
//! runs here.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_doc2json::pipeline::encode::extract_uploaded_image;
use edgequake_doc2json::pipeline::markdown::transcribe;
use edgequake_doc2json::pipeline::tile::tile_page;
use edgequake_doc2json::{
    ExtractedImageSequence, ImageSource, Pipeline, PipelineConfig, PipelineError,
    PipelineProgressCallback, PipelineResult, SamplingConfig, Stage, TableStatus, UserContent,
    VisionLanguageModel, VlmError, REQUIRED_TABLES,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zip::write::SimpleFileOptions;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// One recorded model call.
#[derive(Debug, Clone)]
struct Call {
    system_prompt: String,
    text: String,
    images: Vec<String>,
    sampling: SamplingConfig,
}

/// Returns scripted responses in call order and records every request.
#[derive(Default)]
struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, VlmError>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedModel {
    fn new<I: IntoIterator<Item = &'static str>>(responses: I) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.to_string())).collect()),
            calls: Mutex::default(),
        })
    }

    fn failing(error: VlmError) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::from([Err(error)])),
            calls: Mutex::default(),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionLanguageModel for ScriptedModel {
    async fn complete(
        &self,
        system_prompt: &str,
        content: &UserContent,
        sampling: &SamplingConfig,
    ) -> Result<String, VlmError> {
        self.calls.lock().unwrap().push(Call {
            system_prompt: system_prompt.to_string(),
            text: content.text.clone(),
            images: content.images.iter().map(|i| i.data.clone()).collect(),
            sampling: *sampling,
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(VlmError::EmptyResponse))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([shade; 3])))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn docx(document_xml: &str, rels_xml: &str, media: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("word/document.xml", opts).unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.start_file("word/_rels/document.xml.rels", opts).unwrap();
        writer.write_all(rels_xml.as_bytes()).unwrap();
        for (name, bytes) in media {
            writer.start_file(*name, opts).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
    }
    buf.into_inner()
}

fn pipeline(model: Arc<ScriptedModel>) -> Pipeline {
    Pipeline::new(model, PipelineConfig::default())
}

const FULL_JSON: &str = r#"```json
{"tables_data": {
  "balance_head_table": {"Организация": "ОАО Ромашка", "Учетный номер плательщика": 190000001,
                         "Единица измерения": "тыс. руб."},
  "balance_dates_table": {"Дата утверждения": "28.03.2024", "Дата отправки": null, "Дата принятия": null},
  "balance_main_table_dates": ["31.12.2023", "31.12.2022"],
  "balance_main_table": {"Запасы": [1234, 1100], "Итого по разделу II": [5000, 4800]},
  "report_main_table": {"Выручка": [9000, 8000], "Чистая прибыль": [null, 700]}
}}
```"#;

// ── End-to-end scenarios ─────────────────────────────────────────────────────

#[tokio::test]
async fn image_document_succeeds_with_full_report() {
    let model = ScriptedModel::new(["| Убыток | (1 234) |", FULL_JSON]);
    let result = pipeline(model.clone())
        .process_document(&png(40, 30, 200), Some("scan.png"))
        .await;

    let report = result.report().expect("success");
    assert!(report.message.values().all(|s| *s == TableStatus::Ok));
    assert!(report.xlsx.is_none());
    let main = report.tables_data.balance_main_table.as_ref().unwrap();
    assert_eq!(main.get("Запасы"), Some(&[Some(1234), Some(1100)][..]));

    let calls = model.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].sampling, SamplingConfig::OCR);
    assert_eq!(calls[0].images.len(), 1);
    assert_eq!(calls[1].sampling, SamplingConfig::JSON_EXTRACTION);
    assert!(calls[1].images.is_empty());
    assert_eq!(calls[1].text, "| Убыток | 1234 |");
    assert!(calls[1].system_prompt.contains("tables_data"));
}

#[tokio::test]
async fn success_json_has_contract_shape() {
    let model = ScriptedModel::new(["text", FULL_JSON]);
    let result = pipeline(model)
        .process_document(&png(8, 8, 10), None)
        .await;

    let v: Value = serde_json::from_str(&result.to_json(true).unwrap()).unwrap();
    let keys: Vec<&str> = v.as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(keys.len(), 3);
    assert!(v["xlsx"].is_null());
    for key in REQUIRED_TABLES {
        assert_eq!(v["message"][key], "OK");
        assert!(v["tables_data"].get(key).is_some());
    }
    assert_eq!(
        v["tables_data"]["balance_head_table"]["Учетный номер плательщика"],
        190000001
    );
}

#[tokio::test]
async fn absent_tables_are_reported_missing() {
    let model = ScriptedModel::new(["text", r#"{"tables_data": {}}"#]);
    let result = pipeline(model).process_document(&png(8, 8, 10), None).await;

    let report = result.report().expect("success");
    assert_eq!(report.message.len(), 5);
    assert!(report.message.values().all(|s| *s == TableStatus::Missing));
    let v = serde_json::to_value(&result).unwrap();
    assert!(v["tables_data"]["balance_main_table"].is_null());
}

#[tokio::test]
async fn unsupported_bytes_fail_without_calling_the_model() {
    let model = ScriptedModel::new([]);
    let result = pipeline(model.clone())
        .process_document(b"just some plain text, no magic here", None)
        .await;

    let error = result.error().expect("failure");
    assert!(error.starts_with("Неподдерживаемый тип файла"), "{error}");
    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn invalid_json_fails_with_bounded_excerpt() {
    let model = ScriptedModel::new(["text", "Не удалось разобрать таблицу, попробуйте другой скан."]);
    let result = pipeline(model).process_document(&png(8, 8, 10), None).await;

    let error = result.error().expect("failure");
    assert!(error.starts_with("Ошибка парсинга JSON ответа от VLM:"), "{error}");
    assert!(error.ends_with("Ответ: Не удалось разобрать таблицу, попробуйте другой скан."));
}

#[tokio::test]
async fn blank_transcription_is_empty_ocr_failure() {
    let model = ScriptedModel::new(["  \n", "not reached"]);
    let result = pipeline(model.clone()).process_document(&png(8, 8, 10), None).await;

    assert!(result.error().unwrap().starts_with("OCR не вернул результатов"));
    assert_eq!(model.calls().len(), 1);
}

#[tokio::test]
async fn upstream_failure_is_reported() {
    let model = ScriptedModel::failing(VlmError::Http {
        status: 503,
        body: "overloaded".into(),
    });
    let result = pipeline(model).process_document(&png(8, 8, 10), None).await;

    let error = result.error().expect("failure");
    assert!(error.contains("503"), "{error}");
}

#[tokio::test]
async fn typed_error_is_available() {
    let model = ScriptedModel::new([]);
    let err = pipeline(model)
        .try_process_document(&[0u8; 64], None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnsupportedFileType));
}

// ── Stage 1 ──────────────────────────────────────────────────────────────────

fn three_images() -> ExtractedImageSequence {
    (0..3u8)
        .flat_map(|i| extract_uploaded_image(&png(4, 4, i * 50)).unwrap())
        .collect()
}

#[tokio::test]
async fn blank_fragments_are_dropped() {
    let model = ScriptedModel::new(["", "| | |", "text"]);
    let markdown = transcribe(&three_images(), model.as_ref(), &PipelineConfig::default())
        .await
        .unwrap();
    assert_eq!(markdown, "text");
    assert_eq!(model.calls().len(), 3);
}

#[tokio::test]
async fn fragments_are_joined_with_blank_line() {
    let model = ScriptedModel::new(["# Баланс", "```markdown\n| A | 1 |\n```", "Итого"]);
    let markdown = transcribe(&three_images(), model.as_ref(), &PipelineConfig::default())
        .await
        .unwrap();
    assert_eq!(markdown, "# Баланс\n\n| A | 1 |\n\nИтого");
}

/// Answers by image content, slower for earlier images.
struct ReversedLatencyModel {
    answers: Vec<(String, String)>,
}

#[async_trait]
impl VisionLanguageModel for ReversedLatencyModel {
    async fn complete(
        &self,
        _system_prompt: &str,
        content: &UserContent,
        _sampling: &SamplingConfig,
    ) -> Result<String, VlmError> {
        let data = &content.images[0].data;
        let pos = self
            .answers
            .iter()
            .position(|(img, _)| img == data)
            .ok_or(VlmError::EmptyResponse)?;
        tokio::time::sleep(Duration::from_millis(20 * (self.answers.len() - pos) as u64)).await;
        Ok(self.answers[pos].1.clone())
    }

    fn name(&self) -> &str {
        "reversed"
    }
}

#[tokio::test]
async fn concurrent_transcription_keeps_sequence_order() {
    let images = three_images();
    let answers = images
        .iter()
        .zip(["first", "second", "third"])
        .map(|(img, text)| (img.data.data.clone(), text.to_string()))
        .collect();
    let model = ReversedLatencyModel { answers };
    let config = PipelineConfig::builder().concurrency(3).build().unwrap();

    let markdown = transcribe(&images, &model, &config).await.unwrap();
    assert_eq!(markdown, "first\n\nsecond\n\nthird");
}

// ── Extraction paths ─────────────────────────────────────────────────────────

#[tokio::test]
async fn docx_images_reach_the_model_in_document_order() {
    let first = png(5, 5, 10);
    let second = png(6, 6, 20);
    let document = r#"<w:document xmlns:w="w" xmlns:a="a" xmlns:r="r"><w:body>
        <w:p><a:blip r:embed="rId2"/></w:p>
        <w:p><a:blip r:embed="rId1"/></w:p>
    </w:body></w:document>"#;
    let rels = r#"<Relationships>
        <Relationship Id="rId1" Target="media/image1.png"/>
        <Relationship Id="rId2" Target="media/image2.png"/>
    </Relationships>"#;
    let bytes = docx(
        document,
        rels,
        &[("word/media/image1.png", second.clone()), ("word/media/image2.png", first.clone())],
    );

    let model = ScriptedModel::new(["page one", "page two", r#"{"tables_data": {}}"#]);
    let result = pipeline(model.clone())
        .process_document(&bytes, Some("report.docx"))
        .await;
    assert!(result.is_success(), "{result:?}");

    let calls = model.calls();
    assert_eq!(calls[0].images, vec![STANDARD.encode(&first)]);
    assert_eq!(calls[1].images, vec![STANDARD.encode(&second)]);
    assert_eq!(calls[2].text, "page one\n\npage two");
}

#[tokio::test]
async fn docx_without_images_fails() {
    let bytes = docx(
        r#"<w:document xmlns:w="w"><w:body><w:p/></w:body></w:document>"#,
        "<Relationships/>",
        &[],
    );
    let result = pipeline(ScriptedModel::new([]))
        .process_document(&bytes, Some("empty.docx"))
        .await;
    assert!(result
        .error()
        .unwrap()
        .starts_with("Не удалось извлечь изображения из файла"));
}

#[test]
fn two_page_render_yields_three_tiles_in_order() {
    let page1 = DynamicImage::ImageRgb8(RgbImage::new(1240, 1754));
    let page2 = DynamicImage::ImageRgb8(RgbImage::new(5000, 3000));

    let tiles: Vec<_> = [page1, page2]
        .into_iter()
        .enumerate()
        .flat_map(|(idx, page)| tile_page(idx, page, 4096, 120))
        .map(|(tile, _)| (tile.page_index, tile.tile_index, tile.x))
        .collect();

    assert_eq!(tiles, vec![(0, 0, 0), (1, 0, 0), (1, 1, 3976)]);
}

#[test]
fn unvalidated_config_still_tiles_to_the_page_edge() {
    let config = PipelineConfig {
        max_tile_size: 300,
        tile_overlap: 4096,
        ..Default::default()
    };
    let page = DynamicImage::ImageRgb8(RgbImage::new(1000, 10));

    let tiles = tile_page(0, page, config.max_tile_size, config.tile_overlap);
    let (last, pixels) = tiles.last().unwrap();
    assert_eq!(last.end_x(), 1000);
    assert!(tiles.iter().all(|(t, _)| t.width <= 300));
    assert_eq!(pixels.width(), last.width);
}

#[test]
fn upload_is_a_single_image_sequence() {
    let seq = extract_uploaded_image(&png(3, 3, 1)).unwrap();
    assert_eq!(seq.sources(), vec![&ImageSource::Upload]);
}

// ── Progress and sync wrapper ────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl PipelineProgressCallback for Recorder {
    fn on_stage(&self, stage: Stage) {
        self.events.lock().unwrap().push(stage.to_string());
    }
    fn on_images_extracted(&self, count: usize) {
        self.events.lock().unwrap().push(format!("images:{count}"));
    }
    fn on_image_complete(&self, index: usize, total: usize, _len: usize) {
        self.events.lock().unwrap().push(format!("image:{index}/{total}"));
    }
    fn on_finished(&self, success: bool) {
        self.events.lock().unwrap().push(format!("finished:{success}"));
    }
}

#[tokio::test]
async fn progress_events_follow_the_state_machine() {
    let recorder = Arc::new(Recorder::default());
    let config = PipelineConfig::builder()
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let model = ScriptedModel::new(["text", r#"{"tables_data": {}}"#]);

    Pipeline::new(model, config)
        .process_document(&png(8, 8, 1), None)
        .await;

    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec![
            "detecting",
            "extracting",
            "images:1",
            "transcribing",
            "image:1/1",
            "extracting-json",
            "done",
            "finished:true",
        ]
    );
}

#[tokio::test]
async fn failure_stops_before_later_stages() {
    let recorder = Arc::new(Recorder::default());
    let config = PipelineConfig::builder()
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    Pipeline::new(ScriptedModel::new([]), config)
        .process_document(b"????", None)
        .await;

    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec!["detecting", "extracting", "finished:false"]
    );
}

#[test]
fn sync_wrapper_returns_result() {
    let model = ScriptedModel::new(["text", r#"{"tables_data": {}}"#]);
    let result = pipeline(model).process_document_sync(&png(8, 8, 1), Some("a.png"));
    assert!(matches!(result, PipelineResult::Success(_)));
}

#[test]
fn async_entry_point_runs_under_block_on() {
    let model = ScriptedModel::new([]);
    let result = tokio_test::block_on(pipeline(model).process_document(b"", None));
    assert!(result.error().is_some());
}
