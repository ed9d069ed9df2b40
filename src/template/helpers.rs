// ABOUTME: Handlebars helper functions for payload templates
// ABOUTME: Implements time formatting, case conversion, and defaulting helpers

use chrono::{DateTime, TimeZone, Utc};
use handlebars::{
    Context, Handlebars, Helper, Output, RenderContext, RenderError, RenderErrorReason,
};

fn string_param<'a>(h: &'a Helper, index: usize, helper: &str) -> Result<&'a str, RenderError> {
    h.param(index)
        .and_then(|v| v.value().as_str())
        .ok_or_else(|| {
            RenderErrorReason::Other(format!(
                "{} helper requires a string parameter at position {}",
                helper, index
            ))
            .into()
        })
}

/// Format time helper - `{{format_time window_start "%Y/%m"}}`
pub fn format_time_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _rc: &mut RenderContext,
    out: &mut dyn Output,
) -> Result<(), RenderError> {
    let timestamp = string_param(h, 0, "format_time")?;
    let format = h
        .param(1)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%d %H:%M:%S");

    let datetime: DateTime<Utc> = match DateTime::parse_from_rfc3339(timestamp) {
        Ok(parsed) => parsed.with_timezone(&Utc),
        Err(_) => timestamp
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| {
                RenderErrorReason::Other(format!("Failed to parse timestamp: {}", timestamp))
            })?,
    };

    out.write(&datetime.format(format).to_string())?;
    Ok(())
}

/// Uppercase helper
pub fn upper_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _rc: &mut RenderContext,
    out: &mut dyn Output,
) -> Result<(), RenderError> {
    out.write(&string_param(h, 0, "upper")?.to_uppercase())?;
    Ok(())
}

/// Lowercase helper
pub fn lower_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _rc: &mut RenderContext,
    out: &mut dyn Output,
) -> Result<(), RenderError> {
    out.write(&string_param(h, 0, "lower")?.to_lowercase())?;
    Ok(())
}

/// Default helper - provides a fallback when the value is empty
pub fn default_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _rc: &mut RenderContext,
    out: &mut dyn Output,
) -> Result<(), RenderError> {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    let fallback = string_param(h, 1, "default")?;

    out.write(if value.is_empty() { fallback } else { value })?;
    Ok(())
}

/// Register all built-in helpers with a Handlebars instance
pub fn register_helpers(handlebars: &mut Handlebars) {
    handlebars.register_helper("format_time", Box::new(format_time_helper));
    handlebars.register_helper("upper", Box::new(upper_helper));
    handlebars.register_helper("lower", Box::new(lower_helper));
    handlebars.register_helper("default", Box::new(default_helper));
}
