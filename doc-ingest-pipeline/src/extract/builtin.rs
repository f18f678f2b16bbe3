//! Built-in extraction capabilities.

use scraper::{Html, Selector};

use doc_ingest_shared::{ExtractedRecord, Headers};

use crate::errors::ExtractionError;

use super::ContentExtractor;

/// Extracts UTF-8 text verbatim. Invalid UTF-8 is treated as corrupt
/// content, not silently lossy-decoded.
pub struct PlainTextExtractor;

impl ContentExtractor for PlainTextExtractor {
    fn extract(&self, body: &[u8], _headers: &Headers) -> Result<ExtractedRecord, ExtractionError> {
        let text = std::str::from_utf8(body)
            .map_err(|e| ExtractionError::corrupt(format!("invalid utf-8: {e}")))?;
        Ok(ExtractedRecord::with_text(text))
    }
}

/// Extracts visible text, the document title, and named `<meta>` tags from
/// HTML markup.
pub struct HtmlExtractor;

impl ContentExtractor for HtmlExtractor {
    fn extract(&self, body: &[u8], _headers: &Headers) -> Result<ExtractedRecord, ExtractionError> {
        let markup = std::str::from_utf8(body)
            .map_err(|e| ExtractionError::corrupt(format!("invalid utf-8: {e}")))?;
        let document = Html::parse_document(markup);

        let title_sel = selector("title")?;
        let meta_sel = selector("meta[name][content]")?;

        let mut record = ExtractedRecord::new();
        record.text = visible_text(&document)?;

        if let Some(title) = document.select(&title_sel).next() {
            let title = normalize_whitespace(&title.text().collect::<String>());
            if !title.is_empty() {
                record.push_value("title", title);
            }
        }

        for meta in document.select(&meta_sel) {
            let (Some(name), Some(content)) =
                (meta.value().attr("name"), meta.value().attr("content"))
            else {
                continue;
            };
            record.push_value(name.to_ascii_lowercase(), content);
        }

        Ok(record)
    }
}

fn selector(css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|e| ExtractionError::failed(format!("selector {css:?}: {e}")))
}

fn visible_text(document: &Html) -> Result<String, ExtractionError> {
    let body_sel = selector("body")?;
    let text = match document.select(&body_sel).next() {
        Some(body) => body.text().collect::<String>(),
        None => document.root_element().text().collect::<String>(),
    };
    Ok(normalize_whitespace(&text))
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
