// ABOUTME: Template engine implementation using Handlebars
// ABOUTME: Renders single strings and walks YAML task payloads resolving every string leaf

use handlebars::Handlebars;
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

use super::context::TemplateContext;
use super::error::{Result, TemplateError};
use super::helpers;

#[derive(Clone)]
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    /// Create a strict engine with the built-in helpers.
    ///
    /// Referencing an undefined name is an error, so a typo in a payload
    /// cannot silently produce an empty table name or storage path.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.set_dev_mode(false);

        // SQL, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        helpers::register_helpers(&mut handlebars);

        Self { handlebars }
    }

    /// Render a template string with the given context
    pub fn render(&self, template: &str, context: &TemplateContext) -> Result<String> {
        let json_context = context.to_json()?;
        self.render_with_json(template, &json_context)
    }

    pub fn render_with_json(&self, template: &str, context: &JsonValue) -> Result<String> {
        self.handlebars
            .render_template(template, context)
            .map_err(TemplateError::HandlebarsError)
    }

    /// Resolve templates in every string of a task payload. Mapping keys
    /// are left untouched.
    pub fn resolve_payload(
        &self,
        payload: &YamlValue,
        context: &TemplateContext,
    ) -> Result<YamlValue> {
        let json_context = context.to_json()?;
        self.resolve_yaml(payload, &json_context)
    }

    fn resolve_yaml(&self, value: &YamlValue, context: &JsonValue) -> Result<YamlValue> {
        match value {
            YamlValue::String(s) if self.has_templates(s) => {
                Ok(YamlValue::String(self.render_with_json(s, context)?))
            }
            YamlValue::Sequence(items) => items
                .iter()
                .map(|item| self.resolve_yaml(item, context))
                .collect::<Result<Vec<_>>>()
                .map(YamlValue::Sequence),
            YamlValue::Mapping(map) => {
                let mut resolved = serde_yaml::Mapping::new();
                for (key, val) in map {
                    resolved.insert(key.clone(), self.resolve_yaml(val, context)?);
                }
                Ok(YamlValue::Mapping(resolved))
            }
            // Numbers, booleans, nulls and plain strings don't need resolution
            other => Ok(other.clone()),
        }
    }

    /// Validate template syntax without rendering
    pub fn validate_template(&self, template: &str) -> Result<()> {
        handlebars::Template::compile(template)
            .map(|_| ())
            .map_err(|e| TemplateError::SyntaxError(e.to_string()))
    }

    /// Check every string of a payload for syntax errors
    pub fn validate_payload(&self, payload: &YamlValue) -> Result<()> {
        match payload {
            YamlValue::String(s) if self.has_templates(s) => self.validate_template(s),
            YamlValue::Sequence(items) => items.iter().try_for_each(|i| self.validate_payload(i)),
            YamlValue::Mapping(map) => map.values().try_for_each(|v| self.validate_payload(v)),
            _ => Ok(()),
        }
    }

    /// Check if a string contains template expressions
    pub fn has_templates(&self, text: &str) -> bool {
        text.contains("{{") && text.contains("}}")
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}
