//! Page title fetching
//!
//! Used by `marks add` when no title is given.

use anyhow::Result;
use scraper::{Html, Selector};
use std::time::Duration;

/// Fetch timeout in seconds
const FETCH_TIMEOUT: u64 = 10;

/// Fetch the title of the page at `url`
///
/// Returns `None` on any failure (graceful degradation).
pub async fn fetch_title(url: &str) -> Option<String> {
    match fetch_title_inner(url).await {
        Ok(title) => title,
        Err(e) => {
            tracing::debug!("Title fetch for {} failed: {}", url, e);
            None
        }
    }
}

async fn fetch_title_inner(url: &str) -> Result<Option<String>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(FETCH_TIMEOUT))
        .user_agent(concat!("Mozilla/5.0 (compatible; marks/", env!("CARGO_PKG_VERSION"), ")"))
        .build()?;

    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Ok(None);
    }

    let html = response.text().await?;
    Ok(parse_title(&html))
}

/// Extract the best title from an HTML document
///
/// og:title, then twitter:title, then `<title>`.
fn parse_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    extract_meta_content(&document, "og:title")
        .or_else(|| extract_meta_content(&document, "twitter:title"))
        .or_else(|| {
            let selector = Selector::parse("title").ok()?;
            document
                .select(&selector)
                .next()
                .map(|el| collapse_whitespace(&el.text().collect::<String>()))
                .filter(|s| !s.is_empty())
        })
}

/// Extract content from a meta tag by property or name
fn extract_meta_content(document: &Html, property: &str) -> Option<String> {
    for attr in ["property", "name"] {
        let Ok(selector) = Selector::parse(&format!(r#"meta[{}="{}"]"#, attr, property)) else {
            continue;
        };
        let content = document
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(collapse_whitespace)
            .filter(|s| !s.is_empty());
        if content.is_some() {
            return content;
        }
    }
    None
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
