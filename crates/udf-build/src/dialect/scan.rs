//! Lightweight source scanner.
//!
//! Blanks out comments and string literals (newlines are kept so line
//! numbers survive) and checks that `()`, `[]` and `{}` are balanced in what
//! remains. The blanked text is what declaration checks run against.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Syntax {
    /// `//` and `/* */` comments, `"`/`'` literals, `"""` text blocks.
    CLike,
    /// `#` comments, `'`/`"` literals, `'''`/`"""` blocks.
    Python,
}

/// Returns the source with comments and literal contents replaced by spaces.
pub(crate) fn scan(source: &str, syntax: Syntax) -> Result<String, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut open: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        let line_comment = match syntax {
            Syntax::CLike => c == '/' && next == Some('/'),
            Syntax::Python => c == '#',
        };
        if line_comment {
            let end = find_from(&chars, i, '\n').unwrap_or(chars.len());
            blank(&mut out, &chars[i..end], &mut line);
            i = end;
            continue;
        }

        if syntax == Syntax::CLike && c == '/' && next == Some('*') {
            let end = find_seq(&chars, i + 2, &['*', '/'])
                .map(|p| p + 2)
                .ok_or_else(|| format!("line {line}: unterminated block comment"))?;
            blank(&mut out, &chars[i..end], &mut line);
            i = end;
            continue;
        }

        if c == '"' || c == '\'' {
            let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
            let allows_triple = syntax == Syntax::Python || c == '"';
            let end = if triple && allows_triple {
                find_seq_escaped(&chars, i + 3, &[c, c, c])
                    .map(|p| p + 3)
                    .ok_or_else(|| format!("line {line}: unterminated multi-line string"))?
            } else {
                close_literal(&chars, i + 1, c)
                    .map(|p| p + 1)
                    .ok_or_else(|| format!("line {line}: unterminated literal"))?
            };
            out.push(c);
            blank(&mut out, &chars[i + 1..end - 1], &mut line);
            out.push(c);
            i = end;
            continue;
        }

        match c {
            '(' | '[' | '{' => open.push((c, line)),
            ')' | ']' | '}' => match open.pop() {
                Some((o, _)) if matching(o) == c => {}
                Some((o, at)) => {
                    return Err(format!(
                        "line {line}: '{c}' does not close '{o}' opened at line {at}"
                    ))
                }
                None => return Err(format!("line {line}: unexpected '{c}'")),
            },
            '\n' => line += 1,
            _ => {}
        }
        out.push(c);
        i += 1;
    }

    if let Some((o, at)) = open.pop() {
        return Err(format!("line {at}: '{o}' is never closed"));
    }
    Ok(out)
}

fn matching(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn blank(out: &mut String, span: &[char], line: &mut usize) {
    for &ch in span {
        if ch == '\n' {
            *line += 1;
            out.push('\n');
        } else {
            out.push(' ');
        }
    }
}

fn find_from(chars: &[char], start: usize, target: char) -> Option<usize> {
    chars[start..].iter().position(|&c| c == target).map(|p| p + start)
}

fn find_seq(chars: &[char], start: usize, seq: &[char]) -> Option<usize> {
    (start..chars.len()).find(|&p| chars[p..].starts_with(seq))
}

fn find_seq_escaped(chars: &[char], start: usize, seq: &[char]) -> Option<usize> {
    let mut p = start;
    while p < chars.len() {
        if chars[p] == '\\' {
            p += 2;
            continue;
        }
        if chars[p..].starts_with(seq) {
            return Some(p);
        }
        p += 1;
    }
    None
}

/// Position of the closing quote of a single-line literal.
fn close_literal(chars: &[char], start: usize, quote: char) -> Option<usize> {
    let mut p = start;
    while p < chars.len() {
        match chars[p] {
            '\\' => p += 2,
            '\n' => return None,
            c if c == quote => return Some(p),
            _ => p += 1,
        }
    }
    None
}
