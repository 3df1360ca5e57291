//! Minimal comma-separated values codec
//!
//! Fields containing a comma, a double quote or a line break are quoted and
//! embedded quotes are doubled. Records end with CRLF on write; the reader
//! accepts CRLF, LF and bare CR, and skips empty lines.

use std::io::{self, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CsvSyntaxError {
    pub line_number: usize,
    pub message: String,
}

fn needs_quoting(field: &str) -> bool {
    field.contains([',', '"', '\r', '\n'])
}

/// Write one record followed by CRLF
pub(crate) fn write_record<W, S>(writer: &mut W, fields: &[S]) -> io::Result<()>
where
    W: Write,
    S: AsRef<str>,
{
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            writer.write_all(b",")?;
        }
        let field = field.as_ref();
        if needs_quoting(field) {
            write!(writer, "\"{}\"", field.replace('"', "\"\""))?;
        } else {
            writer.write_all(field.as_bytes())?;
        }
    }
    writer.write_all(b"\r\n")
}

/// Parse a whole document into records
pub(crate) fn parse(input: &str) -> Result<Vec<Vec<String>>, CsvSyntaxError> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    // Set after a quoted field closes; only a delimiter or line end may follow
    let mut after_quote = false;
    let mut line_number = 1;
    let mut record_line = 1;

    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => {
                    in_quotes = false;
                    after_quote = true;
                }
                '\n' => {
                    line_number += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            ',' => {
                record.push(std::mem::take(&mut field));
                after_quote = false;
            }
            '\r' | '\n' => {
                if c == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                record.push(std::mem::take(&mut field));
                // An empty line yields a single empty field; skip it
                if !(record.len() == 1 && record[0].is_empty() && !after_quote) {
                    records.push(std::mem::take(&mut record));
                } else {
                    record.clear();
                }
                after_quote = false;
                line_number += 1;
                record_line = line_number;
            }
            '"' if field.is_empty() && !after_quote => in_quotes = true,
            _ if after_quote => {
                return Err(CsvSyntaxError {
                    line_number,
                    message: format!("unexpected character {:?} after closing quote", c),
                });
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(CsvSyntaxError {
            line_number: record_line,
            message: "unterminated quoted field".to_string(),
        });
    }

    if !field.is_empty() || !record.is_empty() || after_quote {
        record.push(field);
        records.push(record);
    }

    Ok(records)
}
