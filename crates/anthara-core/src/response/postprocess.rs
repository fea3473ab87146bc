//! Text transforms applied once a streamed answer is complete.
//!
//! Trailer grammar, matched case-insensitively:
//!
//! ```text
//! <answer text>
//! [RELATED_QUESTIONS]
//! - first follow-up question
//! - second follow-up question
//! [/RELATED_QUESTIONS]
//! ```
//!
//! Citation grammar: every `~~source~~` token in the answer marks one
//! citation; the Nth token refers to the Nth deduplicated source.

use crate::constants::defaults;
use crate::conversation::Citation;
use regex::{Captures, Regex};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub main_content: String,
    pub related_queries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub main_content: String,
    pub related_queries: Vec<String>,
    /// `main_content` with citation sentinels rewritten into references.
    pub cited_content: String,
}

fn related_begin() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\[\s*related_questions\s*\]").expect("related begin regex is valid")
    })
}

fn related_end() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\[\s*/\s*related_questions\s*\]").expect("related end regex is valid")
    })
}

fn citation_sentinel() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)([ \t]*)~~\s*source\s*~~").expect("citation regex is valid")
    })
}

fn numbered_reference() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[ \t]*\[\d+\]\([^)\s]*\)").expect("reference regex is valid")
    })
}

/// Split the related-questions trailer off `text`.
///
/// Without a begin marker the text comes back unchanged with no queries.
/// A begin marker with no end marker takes everything after it.
pub fn extract_related(text: &str) -> Extracted {
    let Some(begin) = related_begin().find(text) else {
        return Extracted {
            main_content: text.to_string(),
            related_queries: Vec::new(),
        };
    };

    let after_begin = &text[begin.end()..];
    let (block, rest) = match related_end().find(after_begin) {
        Some(end) => (&after_begin[..end.start()], &after_begin[end.end()..]),
        None => (after_begin, ""),
    };

    let related_queries = block
        .lines()
        .filter_map(clean_query_line)
        .take(defaults::MAX_RELATED_QUERIES)
        .collect();

    let before = text[..begin.start()].trim_end();
    let rest = rest.trim();
    let main_content = match (before.is_empty(), rest.is_empty()) {
        (_, true) => before.to_string(),
        (true, false) => rest.to_string(),
        (false, false) => format!("{before}\n\n{rest}"),
    };

    Extracted {
        main_content,
        related_queries,
    }
}

fn clean_query_line(line: &str) -> Option<String> {
    let mut s = line.trim();
    loop {
        let before = s;
        s = s
            .trim_start_matches(|c: char| matches!(c, '-' | '*' | '•' | '['))
            .trim_start();
        s = strip_ordinal(s);
        if s == before {
            break;
        }
    }
    let s = s.trim_end_matches(']').trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Drop a leading `1.` / `2)` list ordinal.
fn strip_ordinal(s: &str) -> &str {
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return s;
    }
    let rest = &s[digits..];
    match rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
        Some(r) if r.is_empty() || r.starts_with(char::is_whitespace) => r.trim_start(),
        _ => s,
    }
}

/// Replace the Nth sentinel with a numbered reference to `sources[N-1]`.
/// Sentinels past the end of `sources` are removed.
pub fn rewrite_citations(text: &str, sources: &[Citation]) -> String {
    let mut index = 0usize;
    citation_sentinel()
        .replace_all(text, |caps: &Captures| {
            index += 1;
            match sources.get(index - 1) {
                Some(source) => format!("{}[{}]({})", &caps[1], index, source.uri),
                None => String::new(),
            }
        })
        .into_owned()
}

/// Extract the trailer, then rewrite citations in what remains.
pub fn process(text: &str, sources: &[Citation]) -> Processed {
    let Extracted {
        main_content,
        related_queries,
    } = extract_related(text);
    let cited_content = rewrite_citations(&main_content, sources);
    Processed {
        main_content,
        related_queries,
        cited_content,
    }
}

/// Answer text with references, sentinels and markdown emphasis removed,
/// suitable for reading aloud.
pub fn plain_text(text: &str) -> String {
    let without_refs = numbered_reference().replace_all(text, "");
    let without_sentinels = citation_sentinel().replace_all(&without_refs, "");
    without_sentinels
        .lines()
        .map(|line| {
            line.trim_start_matches(|c: char| c == '#' || c == '>')
                .replace("**", "")
                .replace('`', "")
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
