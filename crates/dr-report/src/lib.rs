//! dr-report: Report extraction for deep-research-mcp
//!
//! Turns a finished interaction into report text and a citation list, and
//! rewrites grounding redirect URLs to the sources they point at.

pub mod extract;
pub mod report;
pub mod resolve;

pub use extract::{
    assemble_text, dedup_citations, extract_citations, parse_sources_section,
    strip_redundant_references, Citation, Source,
};
pub use report::{build_report, select_citations, CitationEntry, Report};
pub use resolve::{
    is_redirect_url, HttpProbe, RedirectCache, RedirectProbe, RedirectResolver, ResolveError,
    DEFAULT_CACHE_CAPACITY, REDIRECT_URL_PATTERN, RESOLVE_TIMEOUT,
};
