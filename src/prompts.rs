//! System prompts for the two model passes.
//!
//! Centralising every prompt here keeps the stages free of prompt text and
//! lets unit tests inspect the prompts without a model.
//!
//! The JSON-extraction prompt embeds the schema rendered from
//! [`crate::schema::prompt_schema`], so the field names the model is told to
//! use are the same ones the parser accepts.

use crate::schema::prompt_schema;
use once_cell::sync::Lazy;

/// Stage 1 system prompt: transcribe one image into Markdown.
pub const OCR_SYSTEM_PROMPT: &str = r#"Ты — система точного распознавания финансовых документов (бухгалтерский баланс, отчет о прибылях и убытках).
Твоя задача — перенести содержимое изображения в Markdown без потерь.

Правила:
1. ТЕКСТ
   - Переноси весь текст дословно, в порядке чтения.
   - Не исправляй, не переводи и не сокращай текст.
   - Не добавляй ничего, чего нет на изображении.

2. ТАБЛИЦЫ
   - Каждую таблицу оформляй в формате GFM: строки через `|`, строка-разделитель `|---|` после заголовка.
   - Сохраняй все строки и столбцы, включая коды строк.
   - Пустую ячейку оставляй пустой; не выдумывай значения.
   - Числа переписывай как есть, с пробелами между разрядами и скобками.

3. ДАТЫ
   - Даты переписывай в формате ДД.ММ.ГГГГ, если он читается на изображении.

4. ФОРМАТ ВЫВОДА
   - Выводи ТОЛЬКО Markdown.
   - Не оборачивай ответ в ```markdown.
   - Не добавляй комментарии и пояснения.
   - Если на изображении нет текста, верни пустой ответ."#;

/// Stage 1 user instruction sent with every image.
///
/// An image may be one tile of a larger page; neighbouring tiles overlap.
pub const FRAGMENT_PROMPT: &str = "Распознай этот фрагмент документа и верни его содержимое в Markdown. \
Фрагмент может быть частью страницы: не достраивай обрезанные строки и не повторяй заголовки, которых на фрагменте нет.";

const JSON_PROMPT_HEADER: &str = r#"Ты — система извлечения данных из бухгалтерской отчетности.
На вход подается Markdown, полученный распознаванием скана документа.
Извлеки данные и верни ОДИН JSON-объект, соответствующий схеме ниже.

Правила:
1. Используй ТОЧНО те ключи, что указаны в схеме, включая русские названия полей.
2. Если значение отсутствует в документе, ставь null. Не выдумывай значения.
3. Даты — строки в формате ДД.ММ.ГГГГ.
4. balance_main_table_dates — даты двух столбцов значений основной таблицы баланса, слева направо.
5. balance_main_table и report_main_table — объекты вида {"название статьи": [значение1, значение2]}.
   Значения — целые числа без пробелов между разрядами, отсутствующие — null.
   Сохраняй порядок строк документа.
6. Не добавляй комментарии, пояснения и Markdown-разметку — только JSON."#;

/// Stage 2 system prompt: extract `tables_data` from the joined Markdown.
pub static JSON_SYSTEM_PROMPT: Lazy<String> = Lazy::new(|| {
    let schema = serde_json::to_string_pretty(&prompt_schema()).unwrap_or_default();
    format!("{JSON_PROMPT_HEADER}\n\nJSON-схема ответа:\n```json\n{schema}\n```")
});
