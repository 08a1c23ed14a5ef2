/// Splits a batch into individual SQLite statements.
///
/// Semicolons inside string literals, quoted identifiers and comments do not
/// split. A `CREATE TRIGGER` body runs until its closing `END;`. Empty
/// statements are dropped.
pub fn split_statements(batch: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = batch.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                current.push(c);
                copy_quoted(&mut chars, &mut current, c);
            }
            '[' => {
                current.push(c);
                copy_quoted(&mut chars, &mut current, ']');
            }
            '-' if chars.peek() == Some(&'-') => {
                current.push(c);
                for next in chars.by_ref() {
                    current.push(next);
                    if next == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                current.push(c);
                let mut prev = '\0';
                for next in chars.by_ref() {
                    current.push(next);
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            ';' => {
                current.push(c);
                if is_open_trigger(&current) {
                    continue;
                }
                push_statement(&mut statements, &mut current);
            }
            _ => current.push(c),
        }
    }

    push_statement(&mut statements, &mut current);
    statements
}

fn copy_quoted(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    current: &mut String,
    close: char,
) {
    while let Some(next) = chars.next() {
        current.push(next);
        if next == close {
            // Doubled quote is an escaped quote.
            if close != ']' && chars.peek() == Some(&close) {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
                continue;
            }
            return;
        }
    }
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    let statement = statement.strip_suffix(';').unwrap_or(statement).trim();

    if !statement.is_empty() && !is_only_comments(statement) {
        statements.push(statement.to_string());
    }
    current.clear();
}

fn words(sql: &str) -> impl Iterator<Item = String> + '_ {
    sql.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_uppercase())
}

/// `true` while `sql` is a trigger definition whose body has not ended.
fn is_open_trigger(sql: &str) -> bool {
    let leading: Vec<String> = words(sql).take(4).collect();
    if leading.first().map(String::as_str) != Some("CREATE")
        || !leading.iter().any(|w| w == "TRIGGER")
    {
        return false;
    }

    let body = sql.trim_end().trim_end_matches(';');
    words(body).last().as_deref() != Some("END")
}

fn is_only_comments(sql: &str) -> bool {
    let mut rest = sql.trim_start();

    loop {
        if rest.is_empty() {
            return true;
        }

        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail).trim_start();
        } else {
            return false;
        }
    }
}
