//! Web search for association scanning
//!
//! Uses SerpAPI when `SEARCH_PROVIDER=serpapi` and `SERPAPI_KEY` are set.
//! Without a provider (or on any request failure) it degrades to a
//! deterministic placeholder result, so callers never have to handle errors.

use std::env;
use std::time::Duration;

use serde_json::Value;

const DEFAULT_TOP_K: usize = 5;
const SERPAPI_ENDPOINT: &str = "https://serpapi.com/search";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A single search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

fn stub_results(query: &str) -> Vec<SearchResult> {
    vec![SearchResult {
        title: format!("Stubbed result for {}", query),
        url: "https://example.com".to_string(),
        snippet: "Search provider not configured; returning placeholder result.".to_string(),
    }]
}

fn serpapi_search(query: &str, api_key: &str, top_k: usize) -> Option<Vec<SearchResult>> {
    let url = format!(
        "{}?engine=google&q={}&num={}&hl=en&api_key={}",
        SERPAPI_ENDPOINT,
        urlencoding::encode(query),
        top_k.min(10),
        urlencoding::encode(api_key)
    );

    let response = attohttpc::get(&url).timeout(FETCH_TIMEOUT).send().ok()?;
    if !response.is_success() {
        return None;
    }

    let body = response.text().ok()?;
    let data: Value = serde_json::from_str(&body).ok()?;

    let organic = match data.get("organic_results") {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    };

    Some(
        organic
            .iter()
            .take(top_k)
            .map(|item| {
                let snippet = item
                    .get("snippet")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        item.get("snippet_highlighted_words")
                            .and_then(Value::as_array)
                            .map(|words| {
                                words
                                    .iter()
                                    .filter_map(Value::as_str)
                                    .collect::<Vec<_>>()
                                    .join(" ")
                            })
                            .unwrap_or_default()
                    });
                SearchResult {
                    title: item
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or("Untitled")
                        .to_string(),
                    url: item
                        .get("link")
                        .or_else(|| item.get("url"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    snippet,
                }
            })
            .collect(),
    )
}

/// Search the web for a query, returning at most `top_k` results.
pub fn search_web(query: &str, top_k: usize) -> Vec<SearchResult> {
    let top_k = if top_k == 0 { DEFAULT_TOP_K } else { top_k };

    let provider = env::var("SEARCH_PROVIDER").unwrap_or_default();
    let api_key = env::var("SERPAPI_KEY").unwrap_or_default();

    if provider == "serpapi" && !api_key.is_empty() {
        if let Some(results) = serpapi_search(query, &api_key, top_k) {
            return results;
        }
    }

    stub_results(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_search_returns_placeholder() {
        // SEARCH_PROVIDER is not set in the test environment
        let results = search_web("Iris scandal", 3);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Stubbed result for Iris scandal");
        assert_eq!(results[0].url, "https://example.com");
    }

    #[test]
    fn test_zero_top_k_falls_back_to_default() {
        let results = search_web("query", 0);
        assert_eq!(results.len(), 1);
    }
}
