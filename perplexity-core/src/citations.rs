//! Citation normalization and rendering.
//!
//! The remote API reports sources in two shapes: a legacy list of bare URL
//! strings (`citations`) and a list of structured objects (`search_results`).
//! Both collapse into [`Citation`]. A non-empty structured list always wins and
//! the legacy list is then ignored entirely, even if it is longer.

use std::fmt::Write;

use crate::types::{ChatResponse, Citation, QueryResult};

/// Collapse both citation shapes of a response into one ordered list.
pub fn normalize(response: &ChatResponse) -> Vec<Citation> {
    if let Some(structured) = response.search_results.as_ref()
        && !structured.is_empty()
    {
        return structured.clone();
    }

    response
        .citations
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(Citation::from_url)
        .collect()
}

/// Render a result as text, appending a numbered sources section when there are citations.
pub fn render(result: &QueryResult) -> String {
    if result.citations.is_empty() {
        return result.content.clone();
    }

    let mut out = String::with_capacity(result.content.len() + 64 * result.citations.len());
    out.push_str(&result.content);
    out.push_str("\n\n---\n**Sources:**\n");

    for (i, citation) in result.citations.iter().enumerate() {
        let n = i + 1;
        // Writing into a String cannot fail.
        let _ = match present(&citation.title) {
            Some(title) => write!(out, "{}. [{}]({})", n, title, citation.url),
            None => write!(out, "{}. {}", n, citation.url),
        };
        if let Some(date) = present(&citation.date) {
            let _ = write!(out, " ({})", date);
        }
        out.push('\n');
        if let Some(snippet) = present(&citation.snippet) {
            let _ = writeln!(out, "   > {}", snippet);
        }
    }

    out
}

/// Empty strings count as absent.
fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}
