//! Placeholder compilation.
//!
//! Queries are written with percent-style placeholders (`%s`). The server
//! expects positional `$n` markers, so the n-th `%s` becomes `$n` and `%%`
//! collapses to a literal `%`.
//!
//! Quoted text (string literals, `E'...'` escape strings, quoted
//! identifiers, dollar-quoted bodies) and comments are copied through
//! verbatim: a `%s` inside `'...'` is data,
//! not a placeholder. `%%` still collapses there so that escaping works the
//! same way everywhere in the query.

use std::fmt;

/// Advisory produced while compiling a query. Never changes the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A `%` not followed by `s` or `%` outside quoted text.
    UnescapedPercent { offset: usize },
    /// The query already uses `$1`-style placeholders.
    DeprecatedNumericPlaceholder { offset: usize },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnescapedPercent { offset } => {
                write!(f, "unescaped % in SQL at offset {}", offset)
            }
            Diagnostic::DeprecatedNumericPlaceholder { .. } => {
                f.write_str("PostgreSQL-style bind-parameters deprecated")
            }
        }
    }
}

/// Result of [`compile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSql {
    pub sql: String,
    /// Number of `%s` placeholders rewritten.
    pub placeholders: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompiledSql {
    /// Emit every diagnostic as a warning.
    pub fn log_diagnostics(&self) {
        for diagnostic in &self.diagnostics {
            tracing::warn!(sql = %self.sql, "{}", diagnostic);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Plain,
    SingleQuoted,
    /// `E'...'`, where a backslash escapes the next character.
    EscapeQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment,
}

/// Rewrite `%s` placeholders into positional `$n` markers.
pub fn compile(sql: &str) -> CompiledSql {
    let chars: Vec<(usize, char)> = sql.char_indices().collect();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut placeholders = 0usize;
    let mut diagnostics = Vec::new();
    let mut context = Context::Plain;
    let mut dollar_tag: Option<String> = None;
    let mut warned_numeric = false;

    let mut i = 0;
    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        // Percent handling is shared by every context.
        if c == '%' {
            match next {
                Some('%') => {
                    out.push('%');
                    i += 2;
                    continue;
                }
                Some('s') if context == Context::Plain && dollar_tag.is_none() => {
                    placeholders += 1;
                    out.push('$');
                    out.push_str(&placeholders.to_string());
                    i += 2;
                    continue;
                }
                _ => {
                    if context == Context::Plain && dollar_tag.is_none() {
                        diagnostics.push(Diagnostic::UnescapedPercent { offset });
                    }
                    out.push('%');
                    i += 1;
                    continue;
                }
            }
        }

        if let Some(tag) = &dollar_tag {
            if sql[offset..].starts_with(tag.as_str()) {
                out.push_str(tag);
                i += tag.chars().count();
                dollar_tag = None;
            } else {
                out.push(c);
                i += 1;
            }
            continue;
        }

        match context {
            Context::Plain => match c {
                '\'' if opens_escape_string(&chars, i) => context = Context::EscapeQuoted,
                '\'' => context = Context::SingleQuoted,
                '"' => context = Context::DoubleQuoted,
                '-' if next == Some('-') => context = Context::LineComment,
                '/' if next == Some('*') => context = Context::BlockComment,
                '$' => {
                    if next.is_some_and(|n| n.is_ascii_digit()) {
                        if !warned_numeric {
                            diagnostics.push(Diagnostic::DeprecatedNumericPlaceholder { offset });
                            warned_numeric = true;
                        }
                    } else if let Some(tag) = dollar_quote_tag(&sql[offset..]) {
                        out.push_str(&tag);
                        i += tag.chars().count();
                        dollar_tag = Some(tag);
                        continue;
                    }
                }
                _ => {}
            },
            Context::SingleQuoted if c == '\'' => context = Context::Plain,
            // A backslash swallows the next character, unless that is a `%`
            // which the percent handling above must still see.
            Context::EscapeQuoted if c == '\\' => {
                out.push(c);
                i += 1;
                if let Some(&(_, escaped)) = chars.get(i).filter(|(_, n)| *n != '%') {
                    out.push(escaped);
                    i += 1;
                }
                continue;
            }
            Context::EscapeQuoted if c == '\'' && next == Some('\'') => {
                out.push_str("''");
                i += 2;
                continue;
            }
            Context::EscapeQuoted if c == '\'' => context = Context::Plain,
            Context::DoubleQuoted if c == '"' => context = Context::Plain,
            Context::LineComment if c == '\n' => context = Context::Plain,
            Context::BlockComment if c == '*' && next == Some('/') => {
                out.push_str("*/");
                i += 2;
                context = Context::Plain;
                continue;
            }
            _ => {}
        }

        out.push(c);
        i += 1;
    }

    CompiledSql {
        sql: out,
        placeholders,
        diagnostics,
    }
}

/// Whether the quote at `chars[i]` opens an `E'...'` string: it follows a
/// lone `E` or `e` that is not the tail of a longer identifier.
fn opens_escape_string(chars: &[(usize, char)], i: usize) -> bool {
    let prefix = i.checked_sub(1).map(|j| chars[j].1);
    if !matches!(prefix, Some('E' | 'e')) {
        return false;
    }
    match i.checked_sub(2).map(|j| chars[j].1) {
        Some(before) => !(before.is_alphanumeric() || before == '_' || before == '$'),
        None => true,
    }
}

/// Opening tag of a dollar-quoted string (`$$` or `$tag$`), if `rest` starts with one.
fn dollar_quote_tag(rest: &str) -> Option<String> {
    let body = rest.strip_prefix('$')?;
    let end = body.find('$')?;
    let tag = &body[..end];
    let valid = tag
        .chars()
        .enumerate()
        .all(|(n, c)| c == '_' || c.is_ascii_alphabetic() || (n > 0 && c.is_ascii_digit()));
    if valid {
        Some(format!("${}$", tag))
    } else {
        None
    }
}
