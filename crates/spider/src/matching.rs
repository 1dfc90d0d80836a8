//! SQL lexing, normalization and exact-match comparison.
//!
//! Two queries match when their normalized token sequences are equal.
//! Normalization lowercases keywords and identifiers, masks literals as
//! `value`, drops `AS` aliases and table qualifiers, folds `<>` into `!=`
//! and strips a trailing semicolon.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlToken {
    Word(String),
    Number(String),
    Str(String),
    Op(&'static str),
    Punct(char),
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SqlLexError {
    #[error("unterminated string literal starting at byte {0}")]
    UnterminatedString(usize),

    #[error("unexpected character '{ch}' at byte {pos}")]
    UnexpectedChar { ch: char, pos: usize },
}

const OPERATORS: [&str; 10] = ["!=", "<>", "<=", ">=", "=", "<", ">", "+", "-", "/"];

pub fn lex(sql: &str) -> Result<Vec<SqlToken>, SqlLexError> {
    let mut tokens = Vec::new();
    let mut chars = sql.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_alphabetic() || c == '_' {
            let mut word = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    word.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(SqlToken::Word(word));
        } else if c.is_ascii_digit() {
            let mut number = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_digit() || c == '.' {
                    number.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(SqlToken::Number(number));
        } else if c == '\'' || c == '"' || c == '`' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some((_, d)) = chars.next() {
                if d == c {
                    // A doubled quote is an escaped quote.
                    if chars.peek().is_some_and(|&(_, e)| e == c) {
                        text.push(c);
                        chars.next();
                        continue;
                    }
                    closed = true;
                    break;
                }
                text.push(d);
            }
            if !closed {
                return Err(SqlLexError::UnterminatedString(pos));
            }
            // Backticks quote identifiers, not literals.
            tokens.push(if c == '`' {
                SqlToken::Word(text)
            } else {
                SqlToken::Str(text)
            });
        } else if matches!(c, '(' | ')' | ',' | '.' | ';' | '*') {
            chars.next();
            tokens.push(SqlToken::Punct(c));
        } else {
            let rest = &sql[pos..];
            let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
                return Err(SqlLexError::UnexpectedChar { ch: c, pos });
            };
            for _ in 0..op.chars().count() {
                chars.next();
            }
            tokens.push(SqlToken::Op(*op));
        }
    }
    Ok(tokens)
}

/// Normalized token sequence of a query.
pub fn normalize(sql: &str) -> Result<Vec<String>, SqlLexError> {
    let mut tokens = lex(sql)?;
    while matches!(tokens.last(), Some(SqlToken::Punct(';'))) {
        tokens.pop();
    }

    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        match &tokens[i] {
            SqlToken::Word(w) if w.eq_ignore_ascii_case("as") => {
                // Skip `AS alias`.
                i += 2;
                continue;
            }
            SqlToken::Word(_) if matches!(tokens.get(i + 1), Some(SqlToken::Punct('.'))) => {
                // Skip `qualifier.`
                i += 2;
                continue;
            }
            SqlToken::Word(w) => out.push(w.to_lowercase()),
            SqlToken::Number(_) | SqlToken::Str(_) => out.push("value".to_string()),
            SqlToken::Op("<>") => out.push("!=".to_string()),
            SqlToken::Op(op) => out.push(op.to_string()),
            SqlToken::Punct(c) => out.push(c.to_string()),
        }
        i += 1;
    }
    Ok(out)
}

/// Whether `predicted` matches `gold` after normalization.
pub fn exact_match(gold: &str, predicted: &str) -> Result<bool, SqlLexError> {
    Ok(normalize(gold)? == normalize(predicted)?)
}
