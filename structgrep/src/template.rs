//! Compiles an operation template into a runnable semantic patch.
//!
//! Templates carry named placeholders — `${type}`, `${attribute}` (alias
//! `${field}`) and `${cocci_regexp_equal}` — which are substituted with the
//! searched type, the searched attribute and the version-gated regexp
//! operator. A fixed result-emission trailer is then appended so the engine
//! prints one `file:line:col:line_end:col_end` line per match. Templates
//! that declare a `@filter` rule get the trailer variant that depends on
//! that rule, so only positions the filter accepted are emitted.
//!
//! A placeholder the compiler does not know, or a template that never names
//! `${type}` or `${attribute}`, is a malformed operation definition and
//! therefore a configuration error, raised before any process is spawned.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{GrepError, GrepResult};

/// Trailer for plain templates: emit every position bound by the `init` rule
const INIT_TRAILER: &str = r#"

@ script:python @
p1 << init.p1;
@@

for p in p1:
    print("%s:%s:%s:%s:%s" % (p.file, p.line, p.column, p.line_end, p.column_end))
"#;

/// Trailer for templates with a `filter` rule: emit only accepted positions
const FILTER_TRAILER: &str = r#"

@ script:python depends on filter @
p1 << filter.p1;
@@

for p in p1:
    print("%s:%s:%s:%s:%s" % (p.file, p.line, p.column, p.line_end, p.column_end))
"#;

/// A rule header introducing a filter stage, e.g. `@filter@` or
/// `@ filter depends on init @`
static FILTER_STAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^@\s*filter\b").expect("filter stage pattern is valid"));

/// Compiles a template into the final script text.
///
/// Pure text-to-text: the same inputs always produce byte-identical output,
/// and persisting the script is the caller's business.
pub fn compile(
    template: &str,
    type_name: &str,
    attribute: &str,
    regexp_operator: &str,
) -> GrepResult<String> {
    let mut body = String::with_capacity(template.len());
    let mut saw_type = false;
    let mut saw_attribute = false;

    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        body.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];

        // $$ is a literal dollar
        if let Some(after) = rest.strip_prefix('$') {
            body.push('$');
            rest = after;
            continue;
        }

        let (name, after) = read_placeholder(rest)?;
        match name {
            "type" => {
                saw_type = true;
                body.push_str(type_name);
            }
            "attribute" | "field" => {
                saw_attribute = true;
                body.push_str(attribute);
            }
            "cocci_regexp_equal" => body.push_str(regexp_operator),
            other => {
                return Err(GrepError::config(format!(
                    "malformed operation template: unknown placeholder '${{{}}}'",
                    other
                )))
            }
        }
        rest = after;
    }
    body.push_str(rest);

    if !saw_type {
        return Err(GrepError::config(
            "malformed operation template: no ${type} placeholder",
        ));
    }
    if !saw_attribute {
        return Err(GrepError::config(
            "malformed operation template: no ${attribute} placeholder",
        ));
    }

    let trailer = if FILTER_STAGE.is_match(&body) {
        FILTER_TRAILER
    } else {
        INIT_TRAILER
    };
    Ok(body + trailer)
}

/// Reads a `{name}` or bare `name` placeholder from the text following a `$`
fn read_placeholder(rest: &str) -> GrepResult<(&str, &str)> {
    if let Some(after_brace) = rest.strip_prefix('{') {
        let end = after_brace.find('}').ok_or_else(|| {
            GrepError::config("malformed operation template: unterminated '${' placeholder")
        })?;
        return Ok((&after_brace[..end], &after_brace[end + 1..]));
    }
    let end = rest
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(rest.len());
    if end == 0 {
        return Err(GrepError::config(
            "malformed operation template: '$' not followed by a placeholder name",
        ));
    }
    Ok((&rest[..end], &rest[end..]))
}
