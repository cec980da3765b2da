//! Schedule statement parsing
//!
//! A schedule is a sequence of `;`-terminated statements:
//!
//! ```text
//! b1; r1(X); w1(Y); e1;
//! ```
//!
//! where the leading letter is the operation (`b`egin, `r`ead, `w`rite,
//! `e`nd), the number is a positive transaction id, and the parenthesized
//! item name is required for reads and writes and forbidden otherwise.
//! Whitespace (including newlines) between statements and between the id
//! and the item is insignificant. Anything that does not fit the grammar is
//! a `MalformedOperation`; the statement iterator yields the error and
//! continues with the next statement, so one bad line never poisons the
//! rest of the schedule.

use lockstep_core::types::{ItemId, Operation, Statement, TxnId};
use lockstep_core::{Error, Result};

/// Iterate over the statements of a schedule.
pub fn statements(input: &str) -> Statements<'_> {
    Statements { rest: input }
}

/// Iterator returned by [`statements`].
#[derive(Debug, Clone)]
pub struct Statements<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Statements<'a> {
    type Item = Result<Statement>;

    fn next(&mut self) -> Option<Self::Item> {
        let trimmed = self.rest.trim_start();
        if trimmed.is_empty() {
            self.rest = trimmed;
            return None;
        }
        match trimmed.find(';') {
            Some(end) => {
                let raw = &trimmed[..end];
                self.rest = &trimmed[end + 1..];
                Some(parse_statement(raw))
            }
            None => {
                // Trailing text without a terminator is one malformed
                // statement.
                self.rest = "";
                Some(Err(Error::MalformedOperation(trimmed.trim().to_string())))
            }
        }
    }
}

/// Parse one statement body (the text before the `;`).
pub fn parse_statement(raw: &str) -> Result<Statement> {
    let text = raw.trim();
    let malformed = || Error::MalformedOperation(text.to_string());

    let op_char = text.chars().next().ok_or_else(malformed)?;

    // Positive integer id directly after the operation letter.
    let digits_start = op_char.len_utf8();
    let digits_len = text[digits_start..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits_len == 0 {
        return Err(malformed());
    }
    let id: u64 = text[digits_start..digits_start + digits_len]
        .parse()
        .map_err(|_| malformed())?;
    if id == 0 {
        return Err(malformed());
    }
    let tid = TxnId(id);

    let tail = text[digits_start + digits_len..].trim_start();

    let op = match op_char {
        'b' | 'e' => {
            if !tail.is_empty() {
                return Err(malformed());
            }
            if op_char == 'b' {
                Operation::Begin
            } else {
                Operation::End
            }
        }
        'r' | 'w' => {
            let item = parse_item(tail).ok_or_else(malformed)?;
            if op_char == 'r' {
                Operation::Read(item)
            } else {
                Operation::Write(item)
            }
        }
        _ => return Err(malformed()),
    };

    Ok(Statement::new(tid, op))
}

/// Parse a `(name)` item reference; `name` is one or more word characters.
fn parse_item(tail: &str) -> Option<ItemId> {
    let inner = tail.strip_prefix('(')?.strip_suffix(')')?;
    let name = inner.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some(ItemId::new(name))
}
