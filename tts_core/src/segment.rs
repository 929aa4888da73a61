//! Splitting normalized text into speakable chunks.
//!
//! Chunks follow linguistic boundaries so each synthesis call gets natural
//! prosody: paragraphs first, then sentences, then secondary pause points
//! (commas, semicolons, conjunctions, relative pronouns) and, as a last
//! resort, plain word boundaries. `max_chars` is a soft target measured in
//! characters, not bytes.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::config::MIN_CHUNK_CHARS;

/// An ordered piece of normalized text ready for synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    pub sequence_index: usize,
    pub text: String,
    pub approx_length: usize,
}

/// Abbreviations whose trailing period never ends a sentence.
const ABBREVIATIONS: &[&str] = &[
    "Dr.", "Mr.", "Mrs.", "Ms.", "Prof.", "Sr.", "Jr.", "St.", "Mt.", "vs.", "etc.", "e.g.",
    "i.e.", "U.S.", "U.K.", "U.N.", "a.m.", "p.m.", "Inc.", "Ltd.", "Corp.", "Co.", "No.",
    "approx.", "Fig.", "Jan.", "Feb.", "Aug.", "Sept.", "Oct.", "Nov.", "Dec.",
];

const CONJUNCTIONS: &[&str] = &[
    "and", "but", "or", "nor", "yet", "so", "however", "therefore", "moreover",
    "furthermore", "meanwhile", "otherwise",
];

const RELATIVE_PRONOUNS: &[&str] = &["which", "that", "who", "whom", "whose", "where", "when"];

/// Stands in for a protected period while sentences are split.
const PERIOD_MASK: char = '\u{E000}';

/// Sentences longer than this multiple of the target are split further.
const OVERLONG_FACTOR: f64 = 1.5;
/// A secondary split is accepted only if every part stays under this multiple.
const CLAUSE_LIMIT_FACTOR: f64 = 1.2;

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn scaled(max_chars: usize, factor: f64) -> usize {
    (max_chars as f64 * factor).floor() as usize
}

/// Blank lines, or a line break in front of a list item. The list marker is
/// part of the break.
pub(crate) fn paragraph_break() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\n[ \t]*\n\s*(?:(?:[-*+]|\d+\.)\s+)?|\n[ \t]*(?:[-*+]|\d+\.)\s+")
            .expect("paragraph regex")
    })
}

fn sentence_end() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+\s+").expect("sentence regex"))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split normalized text into ordered chunks of roughly `max_chars` characters.
///
/// Empty input yields no chunks. Chunks shorter than the minimum length are
/// folded into a neighbour so that joining the chunks with single spaces
/// reproduces the whitespace-collapsed input; text that is too short as a
/// whole yields no chunks at all.
pub fn segment(text: &str, max_chars: usize) -> Vec<TextChunk> {
    segment_with_min(text, max_chars, MIN_CHUNK_CHARS)
}

/// [`segment`] with an explicit minimum chunk length.
pub fn segment_with_min(text: &str, max_chars: usize, min_chars: usize) -> Vec<TextChunk> {
    let sections: Vec<&str> = paragraph_break().split(text).collect();
    segment_sections(&sections, max_chars, min_chars)
}

/// Segment text that is already split into paragraphs. No chunk spans two
/// sections, except where a piece under `min_chars` is folded into its
/// neighbour.
pub fn segment_sections<S: AsRef<str>>(
    sections: &[S],
    max_chars: usize,
    min_chars: usize,
) -> Vec<TextChunk> {
    let max_chars = max_chars.max(1);

    let mut pieces: Vec<String> = Vec::new();
    for section in sections {
        let section = collapse_whitespace(section.as_ref());
        if section.is_empty() {
            continue;
        }
        if char_len(&section) <= max_chars {
            pieces.push(section);
        } else {
            pieces.extend(pack_sentences(&split_sentences(&section), max_chars));
        }
    }

    merge_short(pieces, min_chars)
        .into_iter()
        .enumerate()
        .map(|(sequence_index, text)| TextChunk {
            sequence_index,
            approx_length: char_len(&text),
            text,
        })
        .collect()
}

fn mask_abbreviations(text: &str) -> String {
    text.split(' ')
        .map(|token| {
            let core = token.trim_start_matches(|c: char| matches!(c, '(' | '"' | '\'' | '['));
            if ABBREVIATIONS.contains(&core) {
                token.replace('.', &PERIOD_MASK.to_string())
            } else {
                token.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn unmask(text: &str) -> String {
    text.replace(PERIOD_MASK, ".")
}

/// Split a single-spaced section into sentences at `.`, `!` or `?`
/// followed by whitespace, leaving known abbreviations intact.
pub fn split_sentences(section: &str) -> Vec<String> {
    let masked = mask_abbreviations(section);
    let mut sentences = Vec::new();
    let mut start = 0;

    for m in sentence_end().find_iter(&masked) {
        let end = m.start() + m.as_str().trim_end().len();
        let sentence = masked[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(unmask(sentence));
        }
        start = m.end();
    }
    let tail = masked[start..].trim();
    if !tail.is_empty() {
        sentences.push(unmask(tail));
    }

    sentences
}

/// Greedily pack sentences into chunks, splitting over-long sentences first.
fn pack_sentences(sentences: &[String], max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();

    for sentence in sentences {
        if char_len(sentence) > scaled(max_chars, OVERLONG_FACTOR) {
            flush(&mut chunks, &mut buffer);
            chunks.extend(split_overlong(sentence, max_chars));
            continue;
        }
        push_packed(&mut chunks, &mut buffer, sentence, max_chars);
    }
    flush(&mut chunks, &mut buffer);

    chunks
}

fn push_packed(chunks: &mut Vec<String>, buffer: &mut String, part: &str, max_chars: usize) {
    if !buffer.is_empty() && char_len(buffer) + 1 + char_len(part) > max_chars {
        flush(chunks, buffer);
    }
    if !buffer.is_empty() {
        buffer.push(' ');
    }
    buffer.push_str(part);
}

fn flush(chunks: &mut Vec<String>, buffer: &mut String) {
    if !buffer.trim().is_empty() {
        chunks.push(buffer.trim().to_string());
    }
    buffer.clear();
}

/// Split one sentence at the first kind of secondary pause point that keeps
/// every part under the clause limit, otherwise at word boundaries.
fn split_overlong(sentence: &str, max_chars: usize) -> Vec<String> {
    let limit = scaled(max_chars, CLAUSE_LIMIT_FACTOR).max(1);

    let candidates = [
        split_after(sentence, ','),
        split_after(sentence, ';'),
        split_before_words(sentence, conjunctions()),
        split_before_words(sentence, relative_pronouns()),
    ];

    for parts in candidates {
        if parts.len() > 1 && parts.iter().all(|p| char_len(p) <= limit) {
            let mut chunks = Vec::new();
            let mut buffer = String::new();
            for part in &parts {
                push_packed(&mut chunks, &mut buffer, part, max_chars);
            }
            flush(&mut chunks, &mut buffer);
            return chunks;
        }
    }

    split_words(sentence, max_chars)
}

fn conjunctions() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| CONJUNCTIONS.iter().copied().collect())
}

fn relative_pronouns() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| RELATIVE_PRONOUNS.iter().copied().collect())
}

/// Split after every `mark` that is followed by a space; the mark stays with
/// the left part.
fn split_after(sentence: &str, mark: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = sentence.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if c == mark && chars.peek() == Some(&' ') {
            parts.push(current.trim().to_string());
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }

    parts
}

/// Start a new part in front of every word from `words` (case-insensitive,
/// trailing punctuation ignored), except at the very start of the sentence.
fn split_before_words(sentence: &str, words: &HashSet<&'static str>) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for token in sentence.split_whitespace() {
        let bare = token
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .to_lowercase();
        if !current.is_empty() && words.contains(bare.as_str()) {
            parts.push(current.join(" "));
            current.clear();
        }
        current.push(token);
    }
    if !current.is_empty() {
        parts.push(current.join(" "));
    }

    parts
}

/// Pack whitespace-delimited words greedily up to `max_chars`. A single word
/// longer than the limit becomes a chunk of its own.
fn split_words(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    for word in sentence.split_whitespace() {
        push_packed(&mut chunks, &mut buffer, word, max_chars);
    }
    flush(&mut chunks, &mut buffer);
    chunks
}

/// Fold pieces shorter than `min_chars` into the previous piece, or into the
/// next one when there is no previous piece.
fn merge_short(pieces: Vec<String>, min_chars: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(pieces.len());
    let mut carry: Option<String> = None;

    for piece in pieces {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let piece = match carry.take() {
            Some(prefix) => format!("{prefix} {piece}"),
            None => piece.to_string(),
        };
        if char_len(&piece) >= min_chars {
            merged.push(piece);
        } else if let Some(last) = merged.last_mut() {
            last.push(' ');
            last.push_str(&piece);
        } else {
            carry = Some(piece);
        }
    }

    // Whatever is still carried was too short to stand alone and had no
    // neighbour to join.
    merged
}
