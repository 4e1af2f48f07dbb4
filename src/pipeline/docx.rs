//! DOCX image extraction: pull embedded raster images in document order.
//!
//! A DOCX file is a ZIP package. Pictures live under `word/media/` and are
//! referenced from `word/document.xml` through `<a:blip r:embed="rIdN"/>`,
//! where `rIdN` resolves to a media path in `word/_rels/document.xml.rels`.
//! Walking the body's blip references gives reading order; media parts that
//! the body never references (headers, unused parts) follow in archive order.
//!
//! No text is re-rendered and no tiling is applied: embedded images are
//! assumed to be within the VLM's input size.

use crate::error::PipelineError;
use crate::pipeline::encode::{normalize_image, ExtractedImage, ExtractedImageSequence, ImageSource};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use tracing::{debug, info, warn};
use zip::ZipArchive;

const DOCUMENT_PART: &str = "word/document.xml";
const RELS_PART: &str = "word/_rels/document.xml.rels";
const MEDIA_PREFIX: &str = "word/media/";

/// Extensions of vector/metafile parts a VLM cannot read.
const NON_RASTER: &[&str] = &["emf", "wmf", "svg", "eps"];

/// `DocxImageExtractor`: every embedded raster image, in document order.
pub fn extract_docx_images(docx_bytes: &[u8]) -> Result<ExtractedImageSequence, PipelineError> {
    let mut archive = ZipArchive::new(Cursor::new(docx_bytes)).map_err(|e| {
        PipelineError::InvalidDocx {
            detail: e.to_string(),
        }
    })?;

    let relationships = parse_relationships(&mut archive)?;
    let document_xml = read_part_to_string(&mut archive, DOCUMENT_PART)?.ok_or_else(|| {
        PipelineError::InvalidDocx {
            detail: format!("missing {DOCUMENT_PART}"),
        }
    })?;

    let part_names = ordered_media_parts(&document_xml, &relationships, &archive)?;
    debug!("DOCX references {} media parts", part_names.len());

    let mut sequence = ExtractedImageSequence::new();
    for part_name in part_names {
        if is_non_raster(&part_name) {
            warn!("Skipping non-raster DOCX part {}", part_name);
            continue;
        }
        let Some(bytes) = read_part(&mut archive, &part_name)? else {
            warn!("DOCX relationship points to missing part {}", part_name);
            continue;
        };
        match normalize_image(&bytes) {
            Ok(data) => sequence.push(ExtractedImage {
                source: ImageSource::DocxPart {
                    index: sequence.len(),
                    part_name,
                },
                data,
            }),
            Err(e) => warn!("Skipping undecodable DOCX image {}: {}", part_name, e),
        }
    }

    info!("Extracted {} images from DOCX", sequence.len());
    Ok(sequence)
}

/// Media part names in reading order, deduplicated.
fn ordered_media_parts(
    document_xml: &str,
    relationships: &HashMap<String, String>,
    archive: &ZipArchive<Cursor<&[u8]>>,
) -> Result<Vec<String>, PipelineError> {
    let mut seen = HashSet::new();
    let mut ordered = Vec::new();

    for rel_id in blip_references(document_xml)? {
        let Some(target) = relationships.get(&rel_id) else {
            warn!("Unresolved image relationship {}", rel_id);
            continue;
        };
        let part = resolve_target(target);
        if seen.insert(part.clone()) {
            ordered.push(part);
        }
    }

    for index in 0..archive.len() {
        let Some(name) = archive.name_for_index(index) else {
            continue;
        };
        if name.starts_with(MEDIA_PREFIX) && !name.ends_with('/') && seen.insert(name.to_string()) {
            ordered.push(name.to_string());
        }
    }

    Ok(ordered)
}

/// Relationship targets are relative to `word/` unless absolute.
fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("word/{}", target.trim_start_matches("./")),
    }
}

fn is_non_raster(part_name: &str) -> bool {
    part_name
        .rsplit_once('.')
        .map(|(_, ext)| NON_RASTER.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// `r:embed` ids of every `a:blip` in body order.
fn blip_references(document_xml: &str) -> Result<Vec<String>, PipelineError> {
    let mut reader = Reader::from_str(document_xml);
    reader.trim_text(true);

    let mut ids = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"a:blip" => {
                if let Some(id) = get_attr(&e, b"r:embed") {
                    ids.push(id);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(PipelineError::InvalidDocx {
                    detail: format!("Error parsing {DOCUMENT_PART}: {e}"),
                })
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(ids)
}

/// Map relationship ids (`rId7`) to targets (`media/image1.png`).
fn parse_relationships(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
) -> Result<HashMap<String, String>, PipelineError> {
    let Some(xml) = read_part_to_string(archive, RELS_PART)? else {
        return Ok(HashMap::new());
    };

    let mut relationships = HashMap::new();
    let mut reader = Reader::from_str(&xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (get_attr(&e, b"Id"), get_attr(&e, b"Target")) {
                    relationships.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(PipelineError::InvalidDocx {
                    detail: format!("Error parsing relationships: {e}"),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(relationships)
}

fn get_attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(Result::ok)
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

fn read_part(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<Vec<u8>>, PipelineError> {
    let mut file = match archive.by_name(name) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => {
            return Err(PipelineError::InvalidDocx {
                detail: format!("{name}: {e}"),
            })
        }
    };
    let mut bytes = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut bytes)
        .map_err(|e| PipelineError::InvalidDocx {
            detail: format!("{name}: {e}"),
        })?;
    Ok(Some(bytes))
}

fn read_part_to_string(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<String>, PipelineError> {
    read_part(archive, name)?
        .map(|bytes| {
            String::from_utf8(bytes).map_err(|e| PipelineError::InvalidDocx {
                detail: format!("{name} is not UTF-8: {e}"),
            })
        })
        .transpose()
}
