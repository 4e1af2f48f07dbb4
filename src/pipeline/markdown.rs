//! Stage 1: transcribe every extracted image into one Markdown document.
//!
//! Each image is sent with the OCR system prompt and the per-fragment
//! instruction under [`SamplingConfig::OCR`]. Responses are cleaned with
//! [`clean_fragment`]; empty fragments are dropped and the rest joined with
//! a blank line.
//!
//! `buffered(n)` keeps at most `n` calls in flight but yields results in
//! input order, so the joined text follows the image sequence for every
//! concurrency level. With the default of 1 the calls are strictly
//! sequential.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::encode::ExtractedImageSequence;
use crate::pipeline::llm::{SamplingConfig, UserContent, VisionLanguageModel};
use crate::pipeline::postprocess::clean_fragment;
use crate::prompts::{FRAGMENT_PROMPT, OCR_SYSTEM_PROMPT};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::time::Instant;
use tracing::{debug, info};

/// Separator between non-empty fragments.
pub const FRAGMENT_SEPARATOR: &str = "\n\n";

/// `MarkdownStage`: one model call per image, joined in sequence order.
pub async fn transcribe(
    images: &ExtractedImageSequence,
    model: &dyn VisionLanguageModel,
    config: &PipelineConfig,
) -> Result<String, PipelineError> {
    let total = images.len();
    let sampling = SamplingConfig::OCR.with_max_tokens(config.max_tokens);
    let callback = config.progress_callback.as_ref();

    let fragments: Vec<String> = stream::iter(images.iter().enumerate().map(|(idx, image)| {
        let content = UserContent::with_image(FRAGMENT_PROMPT, image.data.clone());
        async move {
            if let Some(cb) = callback {
                cb.on_image_start(idx + 1, total);
            }
            let start = Instant::now();
            let raw = model.complete(OCR_SYSTEM_PROMPT, &content, &sampling).await?;
            let fragment = clean_fragment(&raw);
            debug!(
                "Image {}/{}: {} chars raw, {} chars cleaned, {:?}",
                idx + 1,
                total,
                raw.len(),
                fragment.len(),
                start.elapsed()
            );
            if let Some(cb) = callback {
                cb.on_image_complete(idx + 1, total, fragment.len());
            }
            Ok::<_, PipelineError>(fragment)
        }
    }))
    .buffered(config.concurrency.max(1))
    .try_collect()
    .await?;

    let markdown = join_fragments(&fragments);
    if markdown.trim().is_empty() {
        return Err(PipelineError::EmptyOcrResult);
    }

    info!(
        "Transcribed {} images into {} chars of Markdown",
        total,
        markdown.len()
    );
    Ok(markdown)
}

/// Join non-empty fragments in order.
pub fn join_fragments<S: AsRef<str>>(fragments: &[S]) -> String {
    fragments
        .iter()
        .map(AsRef::as_ref)
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(FRAGMENT_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fragments_are_skipped() {
        assert_eq!(join_fragments(&["", "", "text"]), "text");
        assert_eq!(join_fragments(&["a", "", "b"]), "a\n\nb");
        assert_eq!(join_fragments::<&str>(&[]), "");
    }
}
