//! `{{ placeholder }}` substitution for stored email templates

use std::collections::HashMap;

/// Values available to a template
pub type TemplateVars = HashMap<&'static str, String>;

/// Replace `{{ key }}` placeholders with values from `vars`.
///
/// Unknown keys render as empty strings. With `escape_html`, substituted
/// values are HTML-escaped; the template text itself is never touched.
/// An unterminated `{{` is copied through verbatim.
pub fn render(text: &str, vars: &TemplateVars, escape_html: bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        let Some(close) = after_open.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };

        let key = after_open[..close].trim();
        if let Some(value) = vars.get(key) {
            if escape_html {
                push_escaped(&mut out, value);
            } else {
                out.push_str(value);
            }
        } else {
            tracing::debug!(placeholder = %key, "Template placeholder has no value");
        }

        rest = &after_open[close + 2..];
    }

    out.push_str(rest);
    out
}

fn push_escaped(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}

/// Escape a value for direct inclusion in HTML
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    push_escaped(&mut out, value);
    out
}
