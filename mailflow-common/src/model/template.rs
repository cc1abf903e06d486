//! Email template records.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use super::{LayoutId, TemplateId};

/// A named substitution slot declared by a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Placeholder {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// A reusable message template.
///
/// Subject and bodies carry literal `{{name}}` tokens substituted at render
/// time. The slug is unique across templates and derived from the name when
/// not supplied explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTemplate {
    /// Store-allocated identifier. Zero until the record is persisted.
    #[serde(default)]
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    pub subject: String,
    pub content_html: String,
    #[serde(default)]
    pub content_text: Option<String>,
    #[serde(default)]
    pub layout_id: Option<LayoutId>,
    #[serde(default)]
    pub placeholders: Vec<Placeholder>,
    /// Quick-reference token names surfaced to template editors.
    #[serde(default)]
    pub merge_tags: Vec<String>,
    /// Base values merged underneath caller-supplied data at render time.
    #[serde(default)]
    pub default_values: AHashMap<String, String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for EmailTemplate {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            slug: String::new(),
            subject: String::new(),
            content_html: String::new(),
            content_text: None,
            layout_id: None,
            placeholders: Vec::new(),
            merge_tags: Vec::new(),
            default_values: AHashMap::new(),
            is_active: true,
        }
    }
}

impl EmailTemplate {
    /// Names of all declared placeholders, in declaration order.
    #[must_use]
    pub fn placeholder_names(&self) -> Vec<&str> {
        self.placeholders.iter().map(|p| p.name.as_str()).collect()
    }

    /// Names of placeholders declared `required`.
    #[must_use]
    pub fn required_placeholders(&self) -> Vec<&str> {
        self.placeholders
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Required placeholder names without a non-empty value once the
    /// template's defaults are accounted for, sorted. An empty string
    /// counts as missing.
    #[must_use]
    pub fn validate_data(&self, data: &AHashMap<String, String>) -> Vec<String> {
        let mut missing: Vec<String> = self
            .required_placeholders()
            .into_iter()
            .filter(|name| {
                data.get(*name)
                    .or_else(|| self.default_values.get(*name))
                    .is_none_or(String::is_empty)
            })
            .map(String::from)
            .collect();
        missing.sort();
        missing
    }
}

/// Derive a URL-safe slug from a template name.
///
/// Lowercases, maps runs of non-alphanumeric characters to single hyphens,
/// and trims leading/trailing hyphens.
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Welcome Email"), "welcome-email");
        assert_eq!(slugify("  Order #42 -- Shipped!  "), "order-42-shipped");
        assert_eq!(slugify("Résumé"), "résumé");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn test_placeholder_accessors() {
        let template = EmailTemplate {
            placeholders: vec![
                Placeholder {
                    name: "customer_name".to_string(),
                    required: true,
                    ..Placeholder::default()
                },
                Placeholder {
                    name: "coupon".to_string(),
                    ..Placeholder::default()
                },
            ],
            ..EmailTemplate::default()
        };

        assert_eq!(template.placeholder_names(), vec!["customer_name", "coupon"]);
        assert_eq!(template.required_placeholders(), vec!["customer_name"]);
    }

    #[test]
    fn test_validate_data_respects_defaults() {
        let mut template = EmailTemplate {
            placeholders: vec![
                Placeholder {
                    name: "customer_name".to_string(),
                    required: true,
                    ..Placeholder::default()
                },
                Placeholder {
                    name: "order_id".to_string(),
                    required: true,
                    ..Placeholder::default()
                },
            ],
            ..EmailTemplate::default()
        };

        assert_eq!(
            template.validate_data(&AHashMap::new()),
            vec!["customer_name", "order_id"]
        );

        template
            .default_values
            .insert("order_id".to_string(), "0".to_string());
        assert_eq!(
            template.validate_data(&AHashMap::new()),
            vec!["customer_name"]
        );

        let data: AHashMap<String, String> =
            std::iter::once(("customer_name".to_string(), "Ada".to_string())).collect();
        assert!(template.validate_data(&data).is_empty());

        // Empty strings do not satisfy a required placeholder.
        let data: AHashMap<String, String> =
            std::iter::once(("customer_name".to_string(), String::new())).collect();
        assert_eq!(template.validate_data(&data), vec!["customer_name"]);
    }
}
