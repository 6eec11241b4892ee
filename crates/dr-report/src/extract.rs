//! Pure text and record extraction over interaction outputs.
//!
//! Everything here is side-effect free so the conservative matching rules
//! can be tested against near-miss inputs.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use dr_core::{Annotation, Output};

/// A citation handed back to callers. Same field set as a normalised annotation.
pub type Citation = Annotation;

/// An entry parsed from the report's trailing markdown source list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Source {
    /// `None` when the list number could not be parsed.
    pub index: Option<i64>,
    pub title: String,
    pub url: String,
}

static REFERENCES_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[ \t]*#{0,3}[ \t]*(?:\*\*)?references:?(?:\*\*)?:?[ \t]*$").unwrap()
});

static CITE_MARKER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*\[cite:[ \t]*\d+\][ \t]+\S").unwrap());

static SOURCE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(\d[^\s\]]*?)\.[ \t]+\[(.+?)\]\((\S+?)\)[ \t]*\r?$").unwrap()
});

/// Join every output's non-blank text with a blank line, in output order.
pub fn assemble_text(outputs: &[Output]) -> String {
    outputs
        .iter()
        .filter_map(|out| out.text.as_deref())
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
        .trim()
        .to_string()
}

/// Drop a trailing "References" section made up solely of `[cite: N] ...`
/// lines.
///
/// The section must be the last thing in the text and its body must be
/// contiguous marker lines; any other shape leaves the text untouched.
pub fn strip_redundant_references(text: &str) -> String {
    let mut offset = 0;
    let lines: Vec<(usize, &str)> = text
        .split_inclusive('\n')
        .map(|raw| {
            let start = offset;
            offset += raw.len();
            (start, raw.trim_end_matches(|c| c == '\n' || c == '\r'))
        })
        .collect();

    let Some(header) = lines
        .iter()
        .rposition(|(_, line)| REFERENCES_HEADER.is_match(line))
    else {
        return text.to_string();
    };

    let body: Vec<&str> = lines[header + 1..]
        .iter()
        .map(|(_, line)| *line)
        .skip_while(|line| line.trim().is_empty())
        .collect();
    let end = body
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map_or(0, |last| last + 1);
    let body = &body[..end];

    if body.is_empty() || !body.iter().all(|line| CITE_MARKER_LINE.is_match(line)) {
        return text.to_string();
    }

    let (header_start, _) = lines[header];
    text[..header_start].trim_end().to_string()
}

fn is_retained(annotation: &Annotation) -> bool {
    if annotation.is_citation() {
        // Citations may be bare quoted excerpts without a link.
        annotation.has_url_or_title() || annotation.cited_text.is_some()
    } else {
        annotation.has_url_or_title()
    }
}

fn citation_key(citation: &Citation) -> String {
    serde_json::json!([
        citation.kind,
        citation.id,
        citation.url,
        citation.title,
        citation.start_index,
        citation.end_index,
        citation.cited_text,
    ])
    .to_string()
}

/// Remove duplicate citations, keeping the first occurrence of each key.
pub fn dedup_citations(citations: Vec<Citation>) -> Vec<Citation> {
    let mut seen = HashSet::new();
    citations
        .into_iter()
        .filter(|citation| seen.insert(citation_key(citation)))
        .collect()
}

/// Collect source-bearing annotations across all outputs.
///
/// Span-only annotations (inline markers with nothing but offsets) are
/// dropped.
pub fn extract_citations(outputs: &[Output]) -> Vec<Citation> {
    let retained = outputs
        .iter()
        .flat_map(|out| out.annotations.iter())
        .filter(|annotation| is_retained(annotation))
        .cloned()
        .collect();
    dedup_citations(retained)
}

/// Parse `N. [title](url)` list items anywhere in the text.
pub fn parse_sources_section(text: &str) -> Vec<Source> {
    let mut seen = HashSet::new();
    SOURCE_LINE
        .captures_iter(text)
        .map(|caps| Source {
            index: caps[1].parse().ok(),
            title: caps[2].to_string(),
            url: caps[3].to_string(),
        })
        .filter(|source| seen.insert(source.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs(value: serde_json::Value) -> Vec<Output> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(Output::from_value)
            .collect()
    }

    #[test]
    fn test_assemble_text_joins_non_blank() {
        let outs = outputs(json!([
            {"type": "text", "text": "Hello"},
            {"type": "text", "text": "  "},
            {"type": "tool", "text": ""},
            {"type": "function_call"},
            {"type": "text", "text": "World"}
        ]));
        assert_eq!(assemble_text(&outs), "Hello\n\nWorld");
    }

    #[test]
    fn test_assemble_text_empty() {
        assert_eq!(assemble_text(&[]), "");
        assert_eq!(assemble_text(&outputs(json!([{"text": "\n\t"}]))), "");
    }

    #[test]
    fn test_assemble_text_trims_ends_only() {
        let outs = outputs(json!([{"text": "\n  # Title\n\nbody  \n"}, {"text": "tail\n"}]));
        assert_eq!(assemble_text(&outs), "# Title\n\nbody  \n\n\ntail");
    }

    #[test]
    fn test_strip_removes_marker_only_references() {
        let text = "Report body [cite: 1].\n\n## References\n[cite: 1] Example, https://example.com\n[cite: 2] Other source\n";
        assert_eq!(strip_redundant_references(text), "Report body [cite: 1].");
    }

    #[test]
    fn test_strip_header_variants() {
        for header in [
            "References",
            "# References",
            "### references:",
            "**References**",
            "**References:**",
        ] {
            let text = format!("Body\n\n{}\n\n[cite: 3] Something\n", header);
            assert_eq!(strip_redundant_references(&text), "Body", "header: {header}");
        }
    }

    #[test]
    fn test_strip_keeps_mixed_references() {
        let text = "Body\n\n## References\n[cite: 1] Example\nSee also the appendix.\n";
        assert_eq!(strip_redundant_references(text), text);
    }

    #[test]
    fn test_strip_keeps_near_misses() {
        let cases = [
            // Four header marks is not a section header.
            "Body\n\n#### References\n[cite: 1] Example",
            // Non-numeric marker.
            "Body\n\nReferences\n[cite: a] Example",
            // Marker without remainder.
            "Body\n\nReferences\n[cite: 1]",
            // Gap inside the body.
            "Body\n\nReferences\n[cite: 1] A\n\n[cite: 2] B",
            // Empty section.
            "Body\n\nReferences\n",
            // Not trailing: other content follows.
            "Body\n\nReferences\n[cite: 1] A\n## Sources\n1. [a](https://a.com)",
        ];
        for text in cases {
            assert_eq!(strip_redundant_references(text), text, "input: {text:?}");
        }
    }

    #[test]
    fn test_strip_without_references() {
        assert_eq!(strip_redundant_references("Just text"), "Just text");
        assert_eq!(strip_redundant_references(""), "");
    }

    #[test]
    fn test_extract_citations_keeps_sources() {
        let outs = outputs(json!([{
            "type": "text",
            "text": "Answer",
            "annotations": [{"type": "citation", "url": "https://example.com", "title": "Example"}]
        }]));
        let citations = extract_citations(&outs);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].url.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_extract_citations_drops_span_only() {
        let outs = outputs(json!([{
            "text": "Hello [cite: 1]",
            "annotations": [{"type": "citation", "start_index": 6, "end_index": 15}]
        }]));
        assert!(extract_citations(&outs).is_empty());
    }

    #[test]
    fn test_retention_asymmetry() {
        let outs = outputs(json!([{
            "annotations": [
                {"type": "citation", "cited_text": "a quoted excerpt"},
                {"type": "file_citation", "cited_text": "excerpt without source"},
                {"type": "file_citation", "title": "Doc"},
                {"cited_text": "untyped excerpt"},
                {"url": "https://untyped.example"}
            ]
        }]));
        let citations = extract_citations(&outs);
        assert_eq!(citations.len(), 3);
        assert_eq!(citations[0].cited_text.as_deref(), Some("a quoted excerpt"));
        assert_eq!(citations[1].title.as_deref(), Some("Doc"));
        assert_eq!(citations[2].url.as_deref(), Some("https://untyped.example"));
    }

    #[test]
    fn test_extract_citations_dedups_across_outputs() {
        let ann = json!({
            "type": "citation",
            "url": "https://a.com",
            "title": "A",
            "start_index": 1,
            "end_index": 4
        });
        let outs = outputs(json!([
            {"text": "one", "annotations": [
                ann.clone(),
                {"type": "citation", "url": "https://b.com"}
            ]},
            {"text": "two", "annotations": [
                ann,
                {"type": "citation", "url": "https://a.com", "title": "A"}
            ]}
        ]));
        let citations = extract_citations(&outs);
        let urls: Vec<_> = citations.iter().map(|c| (c.url.clone(), c.start_index)).collect();
        assert_eq!(
            urls,
            vec![
                (Some("https://a.com".to_string()), Some(1)),
                (Some("https://b.com".to_string()), None),
                (Some("https://a.com".to_string()), None),
            ]
        );
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let outs = outputs(json!([{"annotations": [
            {"type": "citation", "url": "https://a.com"},
            {"type": "citation", "url": "https://a.com"},
            {"type": "citation", "title": "B"}
        ]}]));
        let once = extract_citations(&outs);
        let twice = dedup_citations(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn test_dedup_ignores_extras() {
        let a = Annotation::from_value(
            &json!({"type": "citation", "url": "https://a.com", "extras": {"k": 1}}),
        );
        let b = Annotation::from_value(
            &json!({"type": "citation", "url": "https://a.com", "extras": {"k": 2}}),
        );
        assert_eq!(dedup_citations(vec![a.clone(), b]), vec![a]);
    }

    #[test]
    fn test_parse_sources_section() {
        let text = "Title\n\n**Sources:**\n1. [example.com](https://example.com)\n2. [foo](https://foo.bar)\n";
        let sources = parse_sources_section(text);
        assert_eq!(sources.len(), 2);
        assert_eq!(
            sources[0],
            Source {
                index: Some(1),
                title: "example.com".to_string(),
                url: "https://example.com".to_string(),
            }
        );
        assert_eq!(sources[1].url, "https://foo.bar");
    }

    #[test]
    fn test_parse_sources_malformed_index_and_noise() {
        let text = "Intro [link](https://inline.example) text\n\
                    1a. [odd](https://odd.example)\n\
                    - [bullet](https://bullet.example)\n\
                    3. [wiki](https://en.wikipedia.org/wiki/Rust_(language))\r\n\
                    3. [wiki](https://en.wikipedia.org/wiki/Rust_(language))\n\
                    4. not a link\n";
        let sources = parse_sources_section(text);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].index, None);
        assert_eq!(sources[0].title, "odd");
        assert_eq!(sources[1].index, Some(3));
        assert_eq!(sources[1].url, "https://en.wikipedia.org/wiki/Rust_(language)");
    }

    #[test]
    fn test_source_serializes_null_index() {
        let source = Source {
            index: None,
            title: "t".to_string(),
            url: "u".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&source).unwrap(),
            json!({"index": null, "title": "t", "url": "u"})
        );
    }
}
