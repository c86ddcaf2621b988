//! Human-readable rendering of a query with its arguments inlined.
//!
//! The output is for logs only. It is never sent to the database.

use std::fmt::Write as _;

use crate::query::Value;

/// Positional placeholder syntax used in query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placeholder {
    /// `$1, $2, ...` (Postgres; also understood by SQLite through sqlx).
    #[default]
    Dollar,
    /// Sequential `?` (SQLite, MySQL).
    Question,
}

/// Render `raw` with `args` substituted into their placeholders.
///
/// Whitespace runs and `--` comments outside string literals collapse to a
/// single space. Placeholders inside literals are left alone, and a
/// placeholder with no matching argument is kept verbatim.
pub fn render(raw: &str, placeholder: Placeholder, args: &[Value]) -> String {
    let mut out = String::with_capacity(raw.len() + args.len() * 8);
    let mut chars = raw.chars().peekable();
    let mut quote: Option<char> = None;
    let mut pending_space = false;
    let mut next_question = 0usize;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }

        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if c == '-' && chars.peek() == Some(&'-') {
            for skipped in chars.by_ref() {
                if skipped == '\n' {
                    break;
                }
            }
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;

        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            '$' if placeholder == Placeholder::Dollar
                && chars.peek().is_some_and(|d| d.is_ascii_digit()) =>
            {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    chars.next();
                }
                let arg = digits
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| args.get(i));
                match arg {
                    Some(value) => push_literal(&mut out, value),
                    None => {
                        out.push('$');
                        out.push_str(&digits);
                    }
                }
            }
            '?' if placeholder == Placeholder::Question => {
                match args.get(next_question) {
                    Some(value) => push_literal(&mut out, value),
                    None => out.push('?'),
                }
                next_question += 1;
            }
            other => out.push(other),
        }
    }

    out
}

fn push_literal(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("NULL"),
        Value::Bool(true) => out.push_str("TRUE"),
        Value::Bool(false) => out.push_str("FALSE"),
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Float(f) if f.is_finite() => {
            let _ = write!(out, "{f}");
        }
        Value::Float(f) => {
            let _ = write!(out, "'{f}'");
        }
        Value::Text(s) => {
            out.push('\'');
            out.push_str(&s.replace('\'', "''"));
            out.push('\'');
        }
        Value::Bytes(bytes) => {
            out.push_str("'\\x");
            for b in bytes {
                let _ = write!(out, "{b:02x}");
            }
            out.push('\'');
        }
    }
}
