//! Template layout records.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use super::LayoutId;

/// The token a wrapper must contain for the rendered template body.
///
/// Matching is exact: `{{Content}}` or `{{content }}` do not count.
pub const CONTENT_TOKEN: &str = "{{content}}";

/// An HTML shell wrapped around rendered template content.
///
/// The wrapper is a full HTML document with substitution tokens for the
/// rendered body (`{{content}}`), the optional header and footer fragments,
/// and the optional stylesheet. At most one layout is the default at any
/// time, the same invariant as servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTemplateLayout {
    /// Store-allocated identifier. Zero until the record is persisted.
    #[serde(default)]
    pub id: LayoutId,
    pub name: String,
    #[serde(default)]
    pub header_html: Option<String>,
    #[serde(default)]
    pub footer_html: Option<String>,
    #[serde(default = "default_wrapper")]
    pub wrapper_html: String,
    #[serde(default)]
    pub css_styles: Option<String>,
    #[serde(default)]
    pub settings: AHashMap<String, String>,
    #[serde(default)]
    pub is_default: bool,
}

fn default_wrapper() -> String {
    concat!(
        r#"<!DOCTYPE html><html><head><meta charset="utf-8">"#,
        "<style>{{css}}</style></head>",
        "<body>{{header}}{{content}}{{footer}}</body></html>",
    )
    .to_string()
}

impl Default for EmailTemplateLayout {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            header_html: None,
            footer_html: None,
            wrapper_html: default_wrapper(),
            css_styles: None,
            settings: AHashMap::new(),
            is_default: false,
        }
    }
}

impl EmailTemplateLayout {
    /// Whether the wrapper carries the mandatory `{{content}}` token.
    ///
    /// Layouts failing this check are rejected at store-write time.
    #[must_use]
    pub fn has_content_token(&self) -> bool {
        self.wrapper_html.contains(CONTENT_TOKEN)
    }
}
