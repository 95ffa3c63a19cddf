//! Recipient list parsing.
//!
//! Uploads are CSV files exported from the driver database. Only the
//! `token` column matters; every other column is ignored.

const TOKEN_COLUMN: &str = "token";

/// Extract push tokens from a CSV with a header row.
pub fn parse_tokens(csv: &str) -> Result<Vec<String>, RecipientError> {
    let mut lines = csv.lines().filter(|line| !line.trim().is_empty());

    let header = lines.next().ok_or(RecipientError::Empty)?;
    let column = split_row(header)
        .iter()
        .position(|name| name.eq_ignore_ascii_case(TOKEN_COLUMN))
        .ok_or(RecipientError::MissingTokenColumn)?;

    let tokens: Vec<String> = lines
        .filter_map(|line| split_row(line).into_iter().nth(column))
        .filter(|token| !token.is_empty())
        .collect();

    if tokens.is_empty() {
        return Err(RecipientError::NoTokens);
    }
    Ok(tokens)
}

/// Split one CSV row. Handles double-quoted fields with `""` escapes; tokens
/// never contain newlines so multi-line fields are not supported.
fn split_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field).trim().to_string()),
            _ => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecipientError {
    #[error("CSV file is empty")]
    Empty,

    #[error("CSV header has no `token` column")]
    MissingTokenColumn,

    #[error("No valid tokens found in CSV file")]
    NoTokens,
}
