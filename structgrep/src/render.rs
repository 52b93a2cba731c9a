//! Merges per-match context windows and renders them.
//!
//! Windows are a transient projection: recomputed on every render call,
//! never stored on the match records, so rendering twice with different
//! context widths cannot leak state between calls.
//!
//! # Output Formats
//!
//! Field order and separators are part of the contract — editors and
//! scripts parse them — so they are pinned byte-for-byte by the tests:
//!
//! - `raw` match line: `{file}:{line} ({type} {ptr}{token}): {text}`
//! - `raw` context line: `{file}-{line} {pad} - {text}` where `pad` is
//!   `2 + len(type + ptr + token)` spaces
//! - `vim` (every line): `{file}|{line}| ({type} {ptr}{token}): {text}`
//! - `emacs` (every line): `{file}:{line}: ({type} {ptr}{token}): {text}`
//! - `grep` match line: `{file}:{line}:{text}` (token colored), context
//!   line: `{file}-{line}-{text}`
//! - `color`: a `{file}: l.{line} -{b}, l.{line} +{a}, {type} {ptr}{token}`
//!   header plus the window's source lines, the whole block handed to the
//!   [`Highlighter`] collaborator and returned verbatim
//!
//! `{ptr}` is `*` unless the text right after the matched token starts with
//! a member access (`.`), in which case the attribute is held by value.
//! This is display decoration only; it never affects matching.
//!
//! Non-contiguous windows are separated by a `--` line. Windows of matches
//! in different files never merge and always get the separator.

use colored::Colorize;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::{GrepError, GrepResult};
use crate::results::{FieldMatch, SearchOutput};

/// Attribute held by value: the matched token is followed by a member access
static VALUE_ACCESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ )]*\.").expect("value access pattern is valid"));

/// Separator emitted between non-contiguous windows
const GAP_SEPARATOR: &str = "--\n";

/// How matches are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Annotated context block (the default)
    Raw,
    /// Delegate to the syntax highlighter
    Color,
    /// One annotated line per window line, vim quickfix separators
    Vim,
    /// One annotated line per window line, emacs compilation separators
    Emacs,
    /// grep-style one-liners with the matched token colored
    Grep,
}

impl FromStr for DisplayMode {
    type Err = GrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Self::Raw),
            "color" => Ok(Self::Color),
            "vim" => Ok(Self::Vim),
            "emacs" => Ok(Self::Emacs),
            "grep" => Ok(Self::Grep),
            other => Err(GrepError::run(format!("unknown display mode '{}'", other))),
        }
    }
}

/// Output flavor for the color mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    Term,
    Html,
}

impl FromStr for ColorFormat {
    type Err = GrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "term" => Ok(Self::Term),
            "html" => Ok(Self::Html),
            other => Err(GrepError::run(format!("unknown color format '{}'", other))),
        }
    }
}

/// Options for one render call
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub mode: DisplayMode,
    /// Context lines before each match
    pub before: usize,
    /// Context lines after each match
    pub after: usize,
    /// Output flavor when `mode` is [`DisplayMode::Color`]
    pub format: ColorFormat,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Raw,
            before: 0,
            after: 0,
            format: ColorFormat::Term,
        }
    }
}

/// The inclusive line range displayed for one match, plus whether a gap
/// separator follows it. Derived per render call, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayWindow {
    pub start: usize,
    pub stop: usize,
    pub separator: bool,
}

/// External collaborator turning a window's text into colorized output.
/// Invoked only in the color display mode.
pub trait Highlighter {
    /// Renders `source`, highlighting every occurrence of `token`
    fn highlight(&self, source: &str, token: &str, format: ColorFormat) -> String;
}

/// Built-in highlighter: colors the matched token and nothing else
#[derive(Debug, Default)]
pub struct TokenHighlighter;

impl Highlighter for TokenHighlighter {
    fn highlight(&self, source: &str, token: &str, format: ColorFormat) -> String {
        if token.is_empty() {
            return source.to_string();
        }
        match format {
            ColorFormat::Term => source.replace(token, &token.red().bold().to_string()),
            ColorFormat::Html => {
                let escaped = html_escape(source);
                let escaped_token = html_escape(token);
                let marked = escaped.replace(&escaped_token, &format!("<b>{}</b>", escaped_token));
                format!("<pre>{}</pre>\n", marked)
            }
        }
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Computes display windows for the given context widths.
///
/// With both widths zero every match shows exactly its own line and no
/// merge logic applies. Otherwise consecutive same-file windows are
/// adjusted so no source line is ever displayed twice, and the separator
/// flag is cleared between contiguous windows.
pub fn windows(matches: &[FieldMatch], before: usize, after: usize) -> Vec<DisplayWindow> {
    if before == 0 && after == 0 {
        return matches
            .iter()
            .map(|m| DisplayWindow {
                start: m.line,
                stop: m.line,
                separator: false,
            })
            .collect();
    }

    let mut wins: Vec<DisplayWindow> = matches
        .iter()
        .map(|m| DisplayWindow {
            start: m.line.saturating_sub(before).max(1),
            stop: m.line + after,
            separator: false,
        })
        .collect();

    for i in 1..wins.len() {
        wins[i - 1].separator = true;
        if matches[i - 1].file != matches[i].file {
            continue;
        }
        // Never re-display the current match inside the predecessor's
        // trailing context
        if wins[i - 1].stop >= matches[i].line {
            wins[i - 1].stop = matches[i].line.saturating_sub(1);
        }
        // And never overlap the windows themselves
        if wins[i - 1].stop >= wins[i].start {
            wins[i].start = wins[i - 1].stop + 1;
        }
        if wins[i - 1].stop + 1 == wins[i].start {
            wins[i - 1].separator = false;
        }
    }
    wins
}

/// Renders a search result with the built-in highlighter
pub fn render(output: &SearchOutput, opts: &RenderOptions) -> GrepResult<String> {
    render_with(output, opts, &TokenHighlighter)
}

/// Renders a search result, delegating color output to `highlighter`
pub fn render_with(
    output: &SearchOutput,
    opts: &RenderOptions,
    highlighter: &dyn Highlighter,
) -> GrepResult<String> {
    let wins = windows(&output.matches, opts.before, opts.after);
    let mut cache: HashMap<PathBuf, Vec<String>> = HashMap::new();
    let mut text = String::new();

    for (m, win) in output.matches.iter().zip(&wins) {
        if !cache.contains_key(&m.file) {
            let content = fs::read_to_string(&m.file)?;
            cache.insert(m.file.clone(), content.lines().map(String::from).collect());
        }
        let lines = &cache[&m.file];
        text.push_str(&render_match(m, win, &output.type_name, lines, opts, highlighter));
    }

    Ok(text.trim_end().to_string())
}

fn render_match(
    m: &FieldMatch,
    win: &DisplayWindow,
    type_name: &str,
    lines: &[String],
    opts: &RenderOptions,
    highlighter: &dyn Highlighter,
) -> String {
    let file = m.file.display();
    let match_line = match m.line.checked_sub(1).and_then(|i| lines.get(i)) {
        Some(line) => line.as_str(),
        // Stale coordinates (file shorter than the engine saw); skip
        None => return String::new(),
    };
    let token = match_line.get(m.column..m.column_end).unwrap_or("");
    let after_token = match_line.get(m.column_end..).unwrap_or("");
    let ptr = if VALUE_ACCESS.is_match(after_token) {
        ""
    } else {
        "*"
    };

    let mut body = String::new();
    let last = win.stop.min(lines.len());
    for idx in (win.start - 1)..last {
        let lineno = idx + 1;
        let line = &lines[idx];
        match opts.mode {
            DisplayMode::Raw => {
                if lineno == m.line {
                    body.push_str(&format!(
                        "{}:{} ({} {}{}): {}\n",
                        file, lineno, type_name, ptr, token, line
                    ));
                } else {
                    let pad = " ".repeat(2 + type_name.len() + ptr.len() + token.len());
                    body.push_str(&format!("{}-{} {} - {}\n", file, lineno, pad, line));
                }
            }
            DisplayMode::Vim => {
                body.push_str(&format!(
                    "{}|{}| ({} {}{}): {}\n",
                    file, lineno, type_name, ptr, token, line
                ));
            }
            DisplayMode::Emacs => {
                body.push_str(&format!(
                    "{}:{}: ({} {}{}): {}\n",
                    file, lineno, type_name, ptr, token, line
                ));
            }
            DisplayMode::Grep => {
                if lineno == m.line {
                    let colored_line = if token.is_empty() {
                        line.to_string()
                    } else {
                        line.replace(token, &token.red().bold().to_string())
                    };
                    body.push_str(&format!("{}:{}:{}\n", file, lineno, colored_line));
                } else {
                    body.push_str(&format!("{}-{}-{}\n", file, lineno, line));
                }
            }
            DisplayMode::Color => {
                body.push_str(line);
                body.push('\n');
            }
        }
    }

    if opts.mode == DisplayMode::Color {
        let header = format!(
            "{}: l.{} -{}, l.{} +{}, {} {}{}\n",
            file,
            m.line,
            m.line - win.start,
            m.line,
            win.stop as isize - m.line as isize,
            type_name,
            ptr,
            token
        );
        // The highlighter's output is returned verbatim; no separator
        return highlighter.highlight(&(header + &body), token, opts.format);
    }

    if win.separator {
        body.push_str(GAP_SEPARATOR);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn m(file: &str, line: usize, col: usize, col_end: usize) -> FieldMatch {
        FieldMatch {
            file: PathBuf::from(file),
            line,
            column: col,
            line_end: line,
            column_end: col_end,
        }
    }

    fn output_for(matches: Vec<FieldMatch>) -> SearchOutput {
        SearchOutput {
            type_name: "Packet".to_string(),
            attribute: "flags".to_string(),
            operation: "used".to_string(),
            matches,
        }
    }

    #[test]
    fn test_windows_gap() {
        // Matches at lines 10 and 20 with one line of context each way stay
        // two separate windows with a separator between them
        let wins = windows(&[m("a.c", 10, 4, 7), m("a.c", 20, 1, 4)], 1, 1);
        assert_eq!(
            wins,
            vec![
                DisplayWindow { start: 9, stop: 11, separator: true },
                DisplayWindow { start: 19, stop: 21, separator: false },
            ]
        );
    }

    #[test]
    fn test_windows_contiguous_merge() {
        // Matches at lines 10 and 11: the first window's trailing context
        // would re-display line 11, so it is shrunk, and the contiguous
        // windows carry no separator
        let wins = windows(&[m("a.c", 10, 4, 7), m("a.c", 11, 2, 5)], 0, 1);
        assert_eq!(
            wins,
            vec![
                DisplayWindow { start: 10, stop: 10, separator: false },
                DisplayWindow { start: 11, stop: 12, separator: false },
            ]
        );
    }

    #[test]
    fn test_windows_overlap_advances_start() {
        let wins = windows(&[m("a.c", 10, 0, 3), m("a.c", 12, 0, 3)], 3, 0);
        // Predecessor keeps 7..10; current would start at 9 but advances
        // past the predecessor's stop
        assert_eq!(wins[0], DisplayWindow { start: 7, stop: 10, separator: false });
        assert_eq!(wins[1], DisplayWindow { start: 11, stop: 12, separator: false });
    }

    #[test]
    fn test_windows_clamped_at_first_line() {
        let wins = windows(&[m("a.c", 2, 0, 3)], 5, 0);
        assert_eq!(wins[0].start, 1);
    }

    #[test]
    fn test_windows_cross_file_always_separated() {
        let wins = windows(&[m("a.c", 10, 0, 3), m("b.c", 11, 0, 3)], 1, 1);
        // Windows would be contiguous line-wise, but files differ
        assert_eq!(wins[0], DisplayWindow { start: 9, stop: 11, separator: true });
        assert_eq!(wins[1], DisplayWindow { start: 10, stop: 12, separator: false });
    }

    #[test]
    fn test_windows_zero_context_skips_merge() {
        let wins = windows(&[m("a.c", 10, 0, 3), m("a.c", 10, 5, 8)], 0, 0);
        assert_eq!(
            wins,
            vec![
                DisplayWindow { start: 10, stop: 10, separator: false },
                DisplayWindow { start: 10, stop: 10, separator: false },
            ]
        );
    }

    /// Ten-line fixture; `pkt->flags` sits on line 4, `ps.flags` on line 8
    fn write_fixture(dir: &Path) -> PathBuf {
        let path = dir.join("a.c");
        fs::write(
            &path,
            "struct Packet *pkt;\n\
             struct Packet ps;\n\
             int before;\n\
             pkt->flags = 1;\n\
             int after;\n\
             int filler1;\n\
             int filler2;\n\
             ps.flags = 2;\n\
             int filler3;\n\
             int filler4;\n",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_render_raw_match_line() {
        let dir = tempdir().unwrap();
        let path = write_fixture(dir.path());
        let file = path.display().to_string();

        // "pkt->flags" on line 4: token "flags" at columns 5..10
        let output = output_for(vec![m(&file, 4, 5, 10)]);
        let text = render(&output, &RenderOptions::default()).unwrap();
        assert_eq!(text, format!("{}:4 (Packet *flags): pkt->flags = 1;", file));
    }

    #[test]
    fn test_render_raw_context_and_gap() {
        let dir = tempdir().unwrap();
        let path = write_fixture(dir.path());
        let file = path.display().to_string();

        let output = output_for(vec![m(&file, 4, 5, 10), m(&file, 8, 3, 8)]);
        let opts = RenderOptions {
            before: 1,
            after: 1,
            ..RenderOptions::default()
        };
        let text = render(&output, &opts).unwrap();

        let pad = " ".repeat(2 + "Packet".len() + "*".len() + "flags".len());
        let expected = format!(
            "{f}-3 {pad} - int before;\n\
             {f}:4 (Packet *flags): pkt->flags = 1;\n\
             {f}-5 {pad} - int after;\n\
             --\n\
             {f}-7 {pad} - int filler2;\n\
             {f}:8 (Packet *flags): ps.flags = 2;\n\
             {f}-9 {pad} - int filler3;",
            f = file,
            pad = pad,
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn test_render_merges_contiguous_windows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.c");
        fs::write(
            &path,
            (1..=11)
                .map(|i| format!("line{}\n", i))
                .collect::<String>(),
        )
        .unwrap();
        let file = path.display().to_string();

        // Matches on lines 10 and 11; token spans "line10"/"line11"
        let output = output_for(vec![m(&file, 10, 0, 6), m(&file, 11, 0, 6)]);
        let opts = RenderOptions {
            after: 1,
            ..RenderOptions::default()
        };
        let text = render(&output, &opts).unwrap();
        assert!(!text.contains("--"), "contiguous windows must not be separated");
        // Each line appears exactly once
        assert_eq!(text.matches("line10").count(), 1);
        assert_eq!(text.matches("line11").count(), 1);
    }

    #[test]
    fn test_render_pointer_marker() {
        let dir = tempdir().unwrap();
        let path = write_fixture(dir.path());
        let file = path.display().to_string();

        // "ps.flags": the token "ps" is followed by ".flags", so the
        // attribute is held by value and the marker is dropped
        let output = output_for(vec![m(&file, 8, 0, 2)]);
        let text = render(&output, &RenderOptions::default()).unwrap();
        assert_eq!(text, format!("{}:8 (Packet ps): ps.flags = 2;", file));
    }

    #[test]
    fn test_render_vim_and_emacs_modes() {
        let dir = tempdir().unwrap();
        let path = write_fixture(dir.path());
        let file = path.display().to_string();
        let output = output_for(vec![m(&file, 4, 5, 10)]);

        let opts = RenderOptions {
            mode: DisplayMode::Vim,
            before: 1,
            ..RenderOptions::default()
        };
        let text = render(&output, &opts).unwrap();
        assert_eq!(
            text,
            format!(
                "{f}|3| (Packet *flags): int before;\n{f}|4| (Packet *flags): pkt->flags = 1;",
                f = file
            )
        );

        let opts = RenderOptions {
            mode: DisplayMode::Emacs,
            before: 1,
            ..RenderOptions::default()
        };
        let text = render(&output, &opts).unwrap();
        assert_eq!(
            text,
            format!(
                "{f}:3: (Packet *flags): int before;\n{f}:4: (Packet *flags): pkt->flags = 1;",
                f = file
            )
        );
    }

    #[test]
    fn test_render_grep_mode_separators() {
        let dir = tempdir().unwrap();
        let path = write_fixture(dir.path());
        let file = path.display().to_string();
        let output = output_for(vec![m(&file, 4, 5, 10)]);

        colored::control::set_override(false);
        let opts = RenderOptions {
            mode: DisplayMode::Grep,
            before: 1,
            ..RenderOptions::default()
        };
        let text = render(&output, &opts).unwrap();
        colored::control::unset_override();
        assert_eq!(
            text,
            format!("{f}-3-int before;\n{f}:4:pkt->flags = 1;", f = file)
        );
    }

    #[test]
    fn test_render_color_html_delegates_to_highlighter() {
        let dir = tempdir().unwrap();
        let path = write_fixture(dir.path());
        let file = path.display().to_string();
        let output = output_for(vec![m(&file, 4, 5, 10)]);

        let opts = RenderOptions {
            mode: DisplayMode::Color,
            format: ColorFormat::Html,
            ..RenderOptions::default()
        };
        let text = render(&output, &opts).unwrap();
        assert!(text.starts_with("<pre>"));
        assert!(text.contains("<b>flags</b>"));
        assert!(text.contains(&format!("{}: l.4 -0, l.4 +0, Packet *", file)));
    }

    #[test]
    fn test_render_custom_highlighter() {
        struct Upper;
        impl Highlighter for Upper {
            fn highlight(&self, source: &str, _token: &str, _format: ColorFormat) -> String {
                source.to_uppercase()
            }
        }

        let dir = tempdir().unwrap();
        let path = write_fixture(dir.path());
        let file = path.display().to_string();
        let output = output_for(vec![m(&file, 4, 5, 10)]);

        let opts = RenderOptions {
            mode: DisplayMode::Color,
            ..RenderOptions::default()
        };
        let text = render_with(&output, &opts, &Upper).unwrap();
        assert!(text.contains("PKT->FLAGS = 1;"));
    }

    #[test]
    fn test_render_window_clipped_at_eof() {
        let dir = tempdir().unwrap();
        let path = write_fixture(dir.path());
        let file = path.display().to_string();
        let output = output_for(vec![m(&file, 8, 3, 8)]);

        let opts = RenderOptions {
            after: 10,
            ..RenderOptions::default()
        };
        let text = render(&output, &opts).unwrap();
        assert!(text.contains("int filler4;"));
        assert_eq!(text.lines().count(), 3, "only lines 8..10 exist");
    }

    #[test]
    fn test_display_mode_parsing() {
        assert_eq!("raw".parse::<DisplayMode>().unwrap(), DisplayMode::Raw);
        assert_eq!("grep".parse::<DisplayMode>().unwrap(), DisplayMode::Grep);
        assert!(matches!(
            "fancy".parse::<DisplayMode>(),
            Err(GrepError::Run(_))
        ));
        assert_eq!("html".parse::<ColorFormat>().unwrap(), ColorFormat::Html);
    }
}
