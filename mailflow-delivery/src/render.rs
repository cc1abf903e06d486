//! Template rendering.
//!
//! Substitution is literal and single-pass: a `{{name}}` token is
//! replaced by its value exactly once, and values are never rescanned,
//! so data containing brace syntax cannot trigger further expansion.
//! Values are inserted verbatim with no HTML escaping; templates are
//! authored by trusted operators, and data flows into both HTML and
//! plain-text bodies unchanged.

use ahash::AHashMap;

use mailflow_common::model::{CONTENT_TOKEN, EmailTemplate, EmailTemplateLayout};

use crate::error::{DispatchError, Result};

/// A template rendered against a data map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

/// Render `template` with `data`, wrapping the HTML body in `layout`
/// when one is given.
///
/// Template defaults sit underneath the caller's data; a required
/// placeholder missing from the merged map fails the whole render, and
/// every missing name is reported at once. Unknown tokens are left in
/// place. The plain-text body is substituted but never wrapped.
pub fn render(
    template: &EmailTemplate,
    layout: Option<&EmailTemplateLayout>,
    data: &AHashMap<String, String>,
) -> Result<RenderedEmail> {
    let missing = template.validate_data(data);
    if !missing.is_empty() {
        return Err(DispatchError::MissingPlaceholders(missing));
    }

    let mut merged = template.default_values.clone();
    for (key, value) in data {
        merged.insert(key.clone(), value.clone());
    }

    let subject = substitute(&template.subject, &merged);
    let mut html = substitute(&template.content_html, &merged);
    if let Some(layout) = layout {
        html = wrap(layout, &html);
    }
    let text = template
        .content_text
        .as_deref()
        .map(|text| substitute(text, &merged));

    Ok(RenderedEmail {
        subject,
        html,
        text,
    })
}

/// Wrap rendered HTML in a layout.
///
/// The wrapper's `{{content}}`, `{{header}}`, `{{footer}}`, and `{{css}}`
/// tokens are filled in one pass; absent fragments become empty strings.
#[must_use]
pub fn wrap(layout: &EmailTemplateLayout, content: &str) -> String {
    let content_slot = CONTENT_TOKEN
        .trim_start_matches("{{")
        .trim_end_matches("}}");

    let mut slots = AHashMap::with_capacity(4);
    slots.insert(content_slot.to_string(), content.to_string());
    slots.insert(
        "header".to_string(),
        layout.header_html.clone().unwrap_or_default(),
    );
    slots.insert(
        "footer".to_string(),
        layout.footer_html.clone().unwrap_or_default(),
    );
    slots.insert(
        "css".to_string(),
        layout.css_styles.clone().unwrap_or_default(),
    );

    substitute(&layout.wrapper_html, &slots)
}

/// One left-to-right pass over `input`, replacing each `{{name}}` whose
/// name is present in `values`. Inserted values are not rescanned.
#[must_use]
pub fn substitute(input: &str, values: &AHashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };

        let name = &after[..end];
        if let Some(value) = values.get(name) {
            out.push_str(value);
        } else {
            // Unknown token stays verbatim.
            out.push_str(&rest[start..start + 2 + end + 2]);
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Collect the distinct `{{name}}` tokens appearing in `text`, in first
/// appearance order. Only names made of word characters count.
#[must_use]
pub fn merge_tags(text: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };

        let name = &after[..end];
        if !name.is_empty()
            && name.chars().all(|c| c.is_alphanumeric() || c == '_')
            && !tags.iter().any(|t| t == name)
        {
            tags.push(name.to_string());
        }

        rest = &after[end + 2..];
    }

    tags
}
