//! Chunking strategies
//!
//! Splits extracted text into pieces sized for embedding. Fixed-size
//! chunking is exact: reassembling the pieces (dropping each successor's
//! overlap prefix) reproduces the source character for character. Semantic
//! chunking packs paragraph and sentence units; structural chunking follows
//! document structure and records section titles in piece metadata.
//!
//! All character arithmetic is in `char`s, never bytes, so multi-byte text
//! cannot split mid-codepoint.

use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::content_type::ContentType;
use crate::config::ChunkingConfig;
use crate::error::{PipelineError, PipelineResult};

/// How source text is split into chunks
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChunkingStrategy {
    #[default]
    Fixed,
    Semantic,
    Structural,
}

/// One chunk of text before ids and embeddings are attached
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPiece {
    pub text: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ChunkPiece {
    fn plain(text: String) -> Self {
        Self {
            text,
            metadata: HashMap::new(),
        }
    }

    fn metadata_rows(mut self, first: usize, last: usize) -> Self {
        self.metadata
            .insert("rows".to_string(), serde_json::json!(format!("{first}-{last}")));
        self
    }
}

/// Split `text` into pieces per the configured strategy.
pub fn chunk_document(
    text: &str,
    content_type: ContentType,
    config: &ChunkingConfig,
) -> PipelineResult<Vec<ChunkPiece>> {
    if config.chunk_size == 0 {
        return Err(PipelineError::config("chunk_size must be greater than 0"));
    }
    if config.chunk_overlap >= config.chunk_size {
        return Err(PipelineError::config(format!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            config.chunk_overlap, config.chunk_size
        )));
    }
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let pieces = match config.strategy {
        ChunkingStrategy::Fixed => fixed_pieces(text, config.chunk_size, config.chunk_overlap),
        ChunkingStrategy::Semantic => semantic_pieces(text, config.chunk_size),
        ChunkingStrategy::Structural => match content_type {
            ContentType::Markdown | ContentType::Html => {
                markdown_sections(text, config.chunk_size)
            }
            ContentType::Tabular => tabular_groups(text, config.chunk_size),
            // No reliable structure survives naive PDF extraction
            ContentType::Pdf | ContentType::Text => paragraph_pieces(text, config.chunk_size),
        },
    };
    Ok(pieces)
}

/// Sliding-window split. Every chunk except the last is exactly
/// `size` chars; consecutive chunks share exactly `overlap` chars.
fn fixed_pieces(text: &str, size: usize, overlap: usize) -> Vec<ChunkPiece> {
    let chars: Vec<char> = text.chars().collect();
    let stride = size - overlap;
    let mut pieces = Vec::new();
    let mut start = 0;
    loop {
        let end = usize::min(start + size, chars.len());
        pieces.push(ChunkPiece::plain(chars[start..end].iter().collect()));
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    pieces
}

/// Greedy packing of paragraph units, falling back to sentence units for
/// paragraphs larger than `size`.
fn semantic_pieces(text: &str, size: usize) -> Vec<ChunkPiece> {
    let mut units: Vec<String> = Vec::new();
    for paragraph in split_paragraphs(text) {
        if char_len(&paragraph) <= size {
            units.push(paragraph);
        } else {
            // Sentence fragments are contiguous slices of the paragraph, so
            // packing them with an empty joiner keeps the original text intact
            let mut sentences: Vec<String> = Vec::new();
            for sentence in split_sentences(&paragraph) {
                if char_len(&sentence) <= size {
                    sentences.push(sentence);
                } else {
                    sentences.extend(
                        fixed_pieces(&sentence, size, 0)
                            .into_iter()
                            .map(|p| p.text),
                    );
                }
            }
            units.extend(pack_units(sentences, size, ""));
        }
    }
    pack_units(units, size, "\n\n")
        .into_iter()
        .map(ChunkPiece::plain)
        .collect()
}

/// Paragraph grouping for types without richer structure.
fn paragraph_pieces(text: &str, size: usize) -> Vec<ChunkPiece> {
    semantic_pieces(text, size)
}

/// One piece per markdown section, sub-split when a section outgrows
/// `size`. Section titles land in piece metadata.
fn markdown_sections(text: &str, size: usize) -> Vec<ChunkPiece> {
    let mut boundaries: Vec<(usize, String)> = Vec::new();
    let mut heading_start = 0usize;
    let mut title = String::new();
    let mut in_heading = false;
    for (event, range) in Parser::new(text).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                in_heading = true;
                heading_start = range.start;
                title.clear();
            }
            Event::Text(t) if in_heading => title.push_str(&t),
            Event::Code(t) if in_heading => title.push_str(&t),
            Event::End(TagEnd::Heading(_)) => {
                in_heading = false;
                boundaries.push((heading_start, title.trim().to_string()));
            }
            _ => {}
        }
    }

    let mut sections: Vec<(Option<String>, &str)> = Vec::new();
    let first_boundary = boundaries.first().map_or(text.len(), |(start, _)| *start);
    if let Some(preamble) = text.get(..first_boundary) {
        if !preamble.trim().is_empty() {
            sections.push((None, preamble));
        }
    }
    for (i, (start, section_title)) in boundaries.iter().enumerate() {
        let end = boundaries
            .get(i + 1)
            .map_or(text.len(), |(next, _)| *next);
        if let Some(body) = text.get(*start..end) {
            sections.push((Some(section_title.clone()), body));
        }
    }
    if sections.is_empty() {
        sections.push((None, text));
    }

    let mut pieces = Vec::new();
    for (section_title, body) in sections {
        let sub = if char_len(body) <= size {
            vec![body.to_string()]
        } else {
            fixed_pieces(body, size, 0).into_iter().map(|p| p.text).collect()
        };
        let parts = sub.len();
        for (part, chunk_text) in sub.into_iter().enumerate() {
            let mut piece = ChunkPiece::plain(chunk_text);
            if let Some(ref t) = section_title {
                piece
                    .metadata
                    .insert("section".to_string(), serde_json::json!(t));
            }
            if parts > 1 {
                piece
                    .metadata
                    .insert("part".to_string(), serde_json::json!(part + 1));
            }
            pieces.push(piece);
        }
    }
    pieces
}

/// Row groups that each repeat the header line, so every chunk is a
/// self-describing table slice.
fn tabular_groups(text: &str, size: usize) -> Vec<ChunkPiece> {
    let mut lines = text.lines();
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let header_len = char_len(header);

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    let mut first_row = 0usize;
    let mut last_row = 0usize;

    let mut flush = |current: &mut String, first_row: usize, last_row: usize| {
        if current.is_empty() {
            return;
        }
        let piece = ChunkPiece::plain(format!("{header}\n{current}"))
            .metadata_rows(first_row, last_row);
        pieces.push(piece);
        current.clear();
    };

    for (i, row) in lines.enumerate() {
        let row_number = i + 2; // header is line 1
        let row_len = char_len(row);
        let projected = header_len + 1 + current_len + if current_len > 0 { 1 } else { 0 } + row_len;
        if current_len > 0 && projected > size {
            flush(&mut current, first_row, last_row);
            current_len = 0;
        }
        if current_len == 0 {
            first_row = row_number;
        }
        if current_len > 0 {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(row);
        current_len += row_len;
        last_row = row_number;
    }
    flush(&mut current, first_row, last_row);
    pieces
}

fn split_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim_end)
        .filter(|p| !p.trim().is_empty())
        .map(String::from)
        .collect()
}

fn split_sentences(paragraph: &str) -> Vec<String> {
    paragraph
        .split_inclusive(|c| matches!(c, '.' | '!' | '?'))
        .map(String::from)
        .collect()
}

fn pack_units(units: Vec<String>, size: usize, joiner: &str) -> Vec<String> {
    let joiner_len = char_len(joiner);
    let mut packed = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for unit in units {
        let unit_len = char_len(&unit);
        if current_len > 0 && current_len + joiner_len + unit_len > size {
            packed.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push_str(joiner);
            current_len += joiner_len;
        }
        current.push_str(&unit);
        current_len += unit_len;
    }
    if !current.is_empty() {
        packed.push(current);
    }
    packed
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
