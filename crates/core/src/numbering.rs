//! Document number format: `{prefix}-{year}-{sequence:04}`.

use crate::error::{DomainError, DomainResult};

/// Minimum width of the zero-padded sequence part.
pub const SEQUENCE_WIDTH: usize = 4;

/// Render a document number, e.g. `QT-2025-0001`.
///
/// Sequences wider than four digits are printed in full.
pub fn format_document_number(prefix: &str, year: i32, sequence: u64) -> String {
    format!("{prefix}-{year}-{sequence:0width$}", width = SEQUENCE_WIDTH)
}

/// Split a document number back into `(prefix, year, sequence)`.
pub fn parse_document_number(number: &str) -> DomainResult<(&str, i32, u64)> {
    let invalid = || DomainError::validation(format!("malformed document number: {number}"));

    let mut parts = number.rsplitn(3, '-');
    let sequence = parts.next().ok_or_else(invalid)?;
    let year = parts.next().ok_or_else(invalid)?;
    let prefix = parts.next().ok_or_else(invalid)?;

    if prefix.is_empty() || sequence.len() < SEQUENCE_WIDTH {
        return Err(invalid());
    }

    let year = year.parse::<i32>().map_err(|_| invalid())?;
    let sequence = sequence.parse::<u64>().map_err(|_| invalid())?;
    Ok((prefix, year, sequence))
}
