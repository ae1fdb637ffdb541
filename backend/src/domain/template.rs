//! Stored template resolution and `{{var}}` substitution.
//!
//! Caller-supplied variables are applied first, then the template's declared
//! defaults fill whatever is left. Values are HTML-escaped on the way in;
//! placeholders that nothing fills stay literal.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;

use super::ports::{map_store_error, TemplateRepository};
use super::Error;

/// A tenant's stored template with its declared variables.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailTemplate {
    pub id: String,
    pub user_id: String,
    pub slug: String,
    pub subject: String,
    pub html_content: String,
    pub is_active: bool,
    pub variables: Vec<TemplateVariable>,
}

/// A declared variable and its optional default.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateVariable {
    pub name: String,
    pub default_value: Option<String>,
}

/// Result of rendering a template for one send.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTemplate {
    pub subject: String,
    pub html: String,
    pub template_id: String,
}

/// Resolves and renders stored templates.
#[derive(Clone)]
pub struct TemplateRenderer {
    templates: Arc<dyn TemplateRepository>,
}

impl TemplateRenderer {
    pub fn new(templates: Arc<dyn TemplateRepository>) -> Self {
        Self { templates }
    }

    /// Render the tenant's template identified by id or slug (id wins).
    /// Returns `None` when no active template matches.
    pub async fn render(
        &self,
        user_id: &str,
        key: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<Option<RenderedTemplate>, Error> {
        let Some(template) = self
            .templates
            .find_active(user_id, key)
            .await
            .map_err(map_store_error)?
        else {
            return Ok(None);
        };

        let mut subject = template.subject.clone();
        let mut html = template.html_content.clone();

        for (name, value) in variables {
            let escaped = escape_html(value);
            substitute(&mut subject, name, &escaped);
            substitute(&mut html, name, &escaped);
        }
        for variable in &template.variables {
            if let Some(default) = &variable.default_value {
                let escaped = escape_html(default);
                substitute(&mut subject, &variable.name, &escaped);
                substitute(&mut html, &variable.name, &escaped);
            }
        }

        Ok(Some(RenderedTemplate {
            subject,
            html,
            template_id: template.id,
        }))
    }
}

/// Replace every whitespace-tolerant `{{name}}` placeholder with `value`.
fn substitute(target: &mut String, name: &str, value: &str) {
    let pattern = format!(r"\{{\{{\s*{}\s*\}}\}}", regex::escape(name));
    // The pattern is built from an escaped literal, so compilation cannot fail.
    let placeholder = Regex::new(&pattern).expect("placeholder pattern is valid");
    if placeholder.is_match(target) {
        *target = placeholder
            .replace_all(target, regex::NoExpand(value))
            .into_owned();
    }
}

/// Escape `& < > " '` for safe interpolation into HTML.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rstest::rstest;

    use crate::domain::ports::StoreError;

    struct OneTemplate(EmailTemplate);

    #[async_trait]
    impl TemplateRepository for OneTemplate {
        async fn find_active(
            &self,
            user_id: &str,
            key: &str,
        ) -> Result<Option<EmailTemplate>, StoreError> {
            let t = &self.0;
            Ok((t.user_id == user_id && (t.id == key || t.slug == key) && t.is_active)
                .then(|| t.clone()))
        }
    }

    fn welcome_template() -> EmailTemplate {
        EmailTemplate {
            id: "tpl-1".into(),
            user_id: "u1".into(),
            slug: "welcome".into(),
            subject: "Hello {{ name }}".into(),
            html_content: "<p>Hi {{name}}, your plan: {{plan}}</p>".into(),
            is_active: true,
            variables: vec![TemplateVariable {
                name: "plan".into(),
                default_value: Some("free".into()),
            }],
        }
    }

    fn renderer() -> TemplateRenderer {
        TemplateRenderer::new(Arc::new(OneTemplate(welcome_template())))
    }

    #[rstest]
    #[case("tpl-1")]
    #[case("welcome")]
    #[tokio::test]
    async fn resolves_by_id_or_slug(#[case] key: &str) {
        let vars = BTreeMap::from([("name".to_owned(), "Ada".to_owned())]);
        let rendered = renderer()
            .render("u1", key, &vars)
            .await
            .expect("render")
            .expect("found");
        assert_eq!(rendered.subject, "Hello Ada");
        assert_eq!(rendered.template_id, "tpl-1");
    }

    #[tokio::test]
    async fn defaults_fill_unsupplied_placeholders() {
        let vars = BTreeMap::from([("name".to_owned(), "Ada".to_owned())]);
        let rendered = renderer()
            .render("u1", "welcome", &vars)
            .await
            .expect("render")
            .expect("found");
        assert_eq!(rendered.html, "<p>Hi Ada, your plan: free</p>");
    }

    #[tokio::test]
    async fn caller_values_beat_defaults() {
        let vars = BTreeMap::from([
            ("name".to_owned(), "Ada".to_owned()),
            ("plan".to_owned(), "pro".to_owned()),
        ]);
        let rendered = renderer()
            .render("u1", "welcome", &vars)
            .await
            .expect("render")
            .expect("found");
        assert!(rendered.html.contains("your plan: pro"));
    }

    #[tokio::test]
    async fn values_are_html_escaped() {
        let vars = BTreeMap::from([(
            "name".to_owned(),
            "<script>alert('x')</script>".to_owned(),
        )]);
        let rendered = renderer()
            .render("u1", "welcome", &vars)
            .await
            .expect("render")
            .expect("found");
        assert!(!rendered.subject.contains('<'), "{}", rendered.subject);
        assert!(rendered
            .html
            .contains("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"));
    }

    #[tokio::test]
    async fn unfilled_placeholders_stay_literal() {
        let rendered = renderer()
            .render("u1", "welcome", &BTreeMap::new())
            .await
            .expect("render")
            .expect("found");
        assert_eq!(rendered.subject, "Hello {{ name }}");
    }

    #[tokio::test]
    async fn unknown_key_is_none() {
        assert!(renderer()
            .render("u1", "missing", &BTreeMap::new())
            .await
            .expect("render")
            .is_none());
        assert!(renderer()
            .render("other-user", "welcome", &BTreeMap::new())
            .await
            .expect("render")
            .is_none());
    }

    #[rstest]
    #[case("a&b", "a&amp;b")]
    #[case("<b>", "&lt;b&gt;")]
    #[case("\"hi\"", "&quot;hi&quot;")]
    #[case("it's", "it&#39;s")]
    #[case("plain", "plain")]
    fn escape_covers_special_characters(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(escape_html(raw), expected);
    }
}
