//! Structural validation for python payloads executed on farm machines.
//!
//! Malformed code has to fail at submission time, not minutes later on a
//! worker. This is not a full parser: it catches the failure modes that
//! generated/wrapped code actually produces - unterminated strings,
//! unbalanced brackets and missing block bodies.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Python syntax error at line {line}: {msg}")]
pub struct PyCheckError {
    pub line: usize,
    pub msg: String,
}

fn err(line: usize, msg: impl Into<String>) -> PyCheckError {
    PyCheckError {
        line,
        msg: msg.into(),
    }
}

/// One logical line: physical line number, indent width and source text
/// with string contents blanked out.
struct Logical {
    line: usize,
    indent: usize,
    text: String,
}

pub fn check(py: &str) -> Result<(), PyCheckError> {
    let logicals = split_logical_lines(py)?;

    // A line ending with ':' introduces a block which must be indented
    let mut opener: Option<&Logical> = None;
    for logical in &logicals {
        let trimmed = logical.text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(prev) = opener {
            if logical.indent <= prev.indent {
                return Err(err(prev.line, "expected an indented block"));
            }
        }
        opener = if trimmed.ends_with(':') {
            Some(logical)
        } else {
            None
        };
    }
    if let Some(prev) = opener {
        return Err(err(prev.line, "expected an indented block"));
    }
    Ok(())
}

/// Walk the source tracking string/bracket state, yielding logical lines.
fn split_logical_lines(py: &str) -> Result<Vec<Logical>, PyCheckError> {
    let chars: Vec<char> = py.chars().collect();
    let mut logicals = Vec::new();
    let mut brackets: Vec<(char, usize)> = Vec::new();
    let mut text = String::new();
    let mut line = 1;
    let mut start_line = 1;
    let mut idx = 0;

    while idx < chars.len() {
        let c = chars[idx];
        match c {
            '\'' | '"' => {
                let triple = chars.get(idx + 1) == Some(&c) && chars.get(idx + 2) == Some(&c);
                let quote_line = line;
                idx += if triple { 3 } else { 1 };
                loop {
                    match chars.get(idx) {
                        None => {
                            return Err(err(quote_line, format!("unterminated string ({c})")));
                        }
                        Some('\\') => idx += 2,
                        Some('\n') if !triple => {
                            return Err(err(quote_line, format!("unterminated string ({c})")));
                        }
                        Some('\n') => {
                            line += 1;
                            idx += 1;
                        }
                        Some(&q) if q == c => {
                            if !triple {
                                idx += 1;
                                break;
                            }
                            if chars.get(idx + 1) == Some(&c) && chars.get(idx + 2) == Some(&c) {
                                idx += 3;
                                break;
                            }
                            idx += 1;
                        }
                        Some(_) => idx += 1,
                    }
                }
                // Stand-in so ':' suffix checks still work around strings
                text.push('\u{0}');
            }
            '#' => {
                while idx < chars.len() && chars[idx] != '\n' {
                    idx += 1;
                }
            }
            '(' | '[' | '{' => {
                brackets.push((c, line));
                text.push(c);
                idx += 1;
            }
            ')' | ']' | '}' => {
                let want = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match brackets.pop() {
                    Some((open, _)) if open == want => {}
                    _ => return Err(err(line, format!("unmatched '{c}'"))),
                }
                text.push(c);
                idx += 1;
            }
            '\\' if chars.get(idx + 1) == Some(&'\n') => {
                // Explicit line continuation
                line += 1;
                idx += 2;
                text.push(' ');
            }
            '\n' => {
                if brackets.is_empty() {
                    logicals.push(to_logical(&text, start_line));
                    text.clear();
                    start_line = line + 1;
                } else {
                    text.push(' ');
                }
                line += 1;
                idx += 1;
            }
            _ => {
                text.push(c);
                idx += 1;
            }
        }
    }
    if let Some((open, open_line)) = brackets.first() {
        return Err(err(*open_line, format!("unclosed '{open}'")));
    }
    if !text.trim().is_empty() {
        logicals.push(to_logical(&text, start_line));
    }
    Ok(logicals)
}

fn to_logical(text: &str, line: usize) -> Logical {
    let indent = text.len() - text.trim_start_matches([' ', '\t']).len();
    Logical {
        line,
        indent,
        text: text.to_string(),
    }
}
