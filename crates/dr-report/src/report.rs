use serde::Serialize;
use tracing::debug;

use dr_core::Interaction;

use crate::extract::{
    assemble_text, extract_citations, parse_sources_section, strip_redundant_references, Citation,
    Source,
};
use crate::resolve::RedirectResolver;

/// Element of a report's citation list.
///
/// A list is either all structured citations or all parsed sources, never a
/// mix of both.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CitationEntry {
    Citation(Citation),
    Source(Source),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    pub text: String,
    pub citations: Vec<CitationEntry>,
}

/// Structured citations, unless none of them names a source, in which case
/// the whole list is replaced by the sources parsed from `text`.
pub fn select_citations(citations: Vec<Citation>, text: &str) -> Vec<CitationEntry> {
    if citations.iter().any(|c| c.has_url_or_title()) {
        citations.into_iter().map(CitationEntry::Citation).collect()
    } else {
        parse_sources_section(text)
            .into_iter()
            .map(CitationEntry::Source)
            .collect()
    }
}

/// Turn an interaction's outputs into report text and citations.
pub async fn build_report(interaction: &Interaction, resolver: &RedirectResolver) -> Report {
    let assembled = assemble_text(&interaction.outputs);
    let stripped = strip_redundant_references(&assembled);
    let text = resolver.resolve_redirects(&stripped).await;

    let structured = extract_citations(&interaction.outputs);
    let structured_count = structured.len();
    let citations = select_citations(structured, &text);
    let from_sources = matches!(citations.first(), Some(CitationEntry::Source(_)));

    debug!(
        job_id = interaction.id.as_deref().unwrap_or("-"),
        text_len = text.len(),
        structured = structured_count,
        citations = citations.len(),
        from_sources,
        "Built report"
    );

    Report { text, citations }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::{RedirectProbe, ResolveError, DEFAULT_CACHE_CAPACITY};
    use async_trait::async_trait;
    use dr_core::{Annotation, Output};
    use serde_json::json;
    use std::sync::Arc;

    const REDIRECT: &str = "https://vertexaisearch.cloud.google.com/grounding-api-redirect/Xy_9";

    /// Every HEAD answers with the same location; GET is never needed.
    struct FixedProbe(Option<&'static str>);

    #[async_trait]
    impl RedirectProbe for FixedProbe {
        async fn head_location(&self, _url: &str) -> Result<Option<String>, ResolveError> {
            match self.0 {
                Some(location) => Ok(Some(location.to_string())),
                None => Err(ResolveError::Timeout("simulated".to_string())),
            }
        }

        async fn follow(&self, url: &str) -> Result<String, ResolveError> {
            Ok(url.to_string())
        }
    }

    fn resolver(location: Option<&'static str>) -> RedirectResolver {
        RedirectResolver::new(Arc::new(FixedProbe(location)), DEFAULT_CACHE_CAPACITY)
    }

    fn interaction(outputs: serde_json::Value) -> Interaction {
        Interaction::from_value(&json!({"id": "v1_job", "status": "completed", "outputs": outputs}))
    }

    #[tokio::test]
    async fn test_build_report_structured_citations() {
        let job = interaction(json!([{
            "type": "text",
            "text": "Rust is fast [cite: 1].",
            "annotations": [
                {"type": "citation", "url": "https://rust-lang.org", "title": "Rust"},
                {"type": "citation", "start_index": 13, "end_index": 22}
            ]
        }]));

        let report = build_report(&job, &resolver(None)).await;
        assert_eq!(report.text, "Rust is fast [cite: 1].");
        assert_eq!(report.citations.len(), 1);
        match &report.citations[0] {
            CitationEntry::Citation(c) => {
                assert_eq!(c.url.as_deref(), Some("https://rust-lang.org"))
            }
            other => panic!("expected structured citation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_build_report_falls_back_to_sources() {
        let job = interaction(json!([{
            "text": "Findings.\n\n**Sources:**\n1. [example.com](https://example.com)",
            "annotations": [
                {"type": "citation", "start_index": 0, "end_index": 8},
                {"type": "citation", "cited_text": "Findings"}
            ]
        }]));

        let report = build_report(&job, &resolver(None)).await;
        assert_eq!(
            serde_json::to_value(&report.citations).unwrap(),
            json!([{"index": 1, "title": "example.com", "url": "https://example.com"}])
        );
    }

    #[tokio::test]
    async fn test_build_report_resolves_text_urls_only() {
        let job = interaction(json!([
            {"text": format!("Body [cite: 1].\n\nSources:\n1. [site]({REDIRECT})")},
            {"text": "## References\n[cite: 1] site, somewhere"}
        ]));

        let report = build_report(&job, &resolver(Some("https://site.example/page"))).await;
        assert_eq!(
            report.text,
            "Body [cite: 1].\n\nSources:\n1. [site](https://site.example/page)"
        );
        // Parsed after resolution, so sources carry the resolved URL.
        assert_eq!(
            report.citations,
            vec![CitationEntry::Source(Source {
                index: Some(1),
                title: "site".to_string(),
                url: "https://site.example/page".to_string(),
            })]
        );
    }

    #[tokio::test]
    async fn test_build_report_keeps_unresolved_redirects() {
        let job = interaction(json!([{"text": format!("See {REDIRECT}")}]));
        let report = build_report(&job, &resolver(None)).await;
        assert_eq!(report.text, format!("See {REDIRECT}"));
        assert!(report.citations.is_empty());
    }

    #[tokio::test]
    async fn test_structured_citation_urls_are_not_rewritten() {
        let job = interaction(json!([{
            "text": "Body",
            "annotations": [{"type": "citation", "url": REDIRECT, "title": "Site"}]
        }]));
        let report = build_report(&job, &resolver(Some("https://site.example"))).await;
        match &report.citations[0] {
            CitationEntry::Citation(c) => assert_eq!(c.url.as_deref(), Some(REDIRECT)),
            other => panic!("expected structured citation, got {other:?}"),
        }
    }

    #[test]
    fn test_select_citations_switches_not_merges() {
        let titled = Annotation::from_value(&json!({"type": "citation", "title": "Doc"}));
        let quoted = Annotation::from_value(&json!({"type": "citation", "cited_text": "q"}));
        let text = "1. [a](https://a.example)";

        let structured = select_citations(vec![quoted.clone(), titled], text);
        assert_eq!(structured.len(), 2);
        assert!(structured.iter().all(|e| matches!(e, CitationEntry::Citation(_))));

        let fallback = select_citations(vec![quoted], text);
        assert_eq!(fallback.len(), 1);
        assert!(matches!(fallback[0], CitationEntry::Source(_)));

        assert!(select_citations(Vec::new(), "no list here").is_empty());
    }

    #[test]
    fn test_citation_entry_serializes_flat() {
        let output = Output::from_value(&json!({
            "annotations": [{"type": "citation", "url": "https://a.example", "start_index": 3}]
        }));
        let entry = CitationEntry::Citation(output.annotations[0].clone());
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({"type": "citation", "url": "https://a.example", "start_index": 3})
        );
    }
}
