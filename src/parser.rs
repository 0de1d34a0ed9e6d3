// CSV Parser - normalizes heterogeneous transaction exports
//
// Statement exports name their columns differently ("Id,Date,Transaction" vs
// "number,date,amount"). Everything past this module only sees TransactionRow.

use std::io::Read;
use std::str::FromStr;

use csv::{ReaderBuilder, StringRecord, Trim};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// CORE TYPES
// ============================================================================

/// One parsed CSV record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub number: String,
    /// "M/D", no year
    pub date: String,
    /// Positive = credit, negative = debit
    pub amount: Decimal,
}

impl TransactionRow {
    pub fn new(number: impl Into<String>, date: impl Into<String>, amount: Decimal) -> Self {
        TransactionRow {
            number: number.into(),
            date: date.into(),
            amount,
        }
    }
}

/// All rows of one run, in file order
pub type TransactionTable = Vec<TransactionRow>;

/// Canonical column names after normalization
pub const NUMBER_COLUMN: &str = "number";
pub const DATE_COLUMN: &str = "date";
pub const AMOUNT_COLUMN: &str = "amount";

/// Map a raw header onto its canonical column name.
///
/// Bank exports use `Id`, `Date`, `Transaction`; anything already canonical
/// passes through. Matching ignores case and surrounding whitespace.
pub fn normalize_header(raw: &str) -> Option<&'static str> {
    match raw.trim().to_lowercase().as_str() {
        "id" | "number" => Some(NUMBER_COLUMN),
        "date" => Some(DATE_COLUMN),
        "transaction" | "amount" => Some(AMOUNT_COLUMN),
        _ => None,
    }
}

/// Column positions resolved from the header row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnMap {
    number: usize,
    date: usize,
    amount: usize,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord, origin: &str) -> Result<Self> {
        let mut number = None;
        let mut date = None;
        let mut amount = None;

        // First matching header wins
        for (idx, header) in headers.iter().enumerate() {
            match normalize_header(header) {
                Some(NUMBER_COLUMN) => {
                    number.get_or_insert(idx);
                }
                Some(DATE_COLUMN) => {
                    date.get_or_insert(idx);
                }
                Some(AMOUNT_COLUMN) => {
                    amount.get_or_insert(idx);
                }
                _ => {}
            }
        }

        match (number, date, amount) {
            (Some(number), Some(date), Some(amount)) => Ok(ColumnMap {
                number,
                date,
                amount,
            }),
            _ => {
                let missing = [
                    (NUMBER_COLUMN, number),
                    (DATE_COLUMN, date),
                    (AMOUNT_COLUMN, amount),
                ]
                .into_iter()
                .filter(|(_, idx)| idx.is_none())
                .map(|(name, _)| name.to_string())
                .collect();

                Err(Error::SchemaMismatch {
                    source_name: origin.to_string(),
                    missing,
                })
            }
        }
    }
}

// ============================================================================
// PARSING
// ============================================================================

/// Parse a comma-separated export into a TransactionTable.
///
/// `origin` names the source in error messages (path or `s3://bucket/key`).
/// Blank lines are skipped; a row with an unparseable amount fails the whole
/// table.
pub fn parse_csv<R: Read>(reader: R, origin: &str) -> Result<TransactionTable> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b',')
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| Error::source_unavailable(origin, e))?
        .clone();
    let columns = ColumnMap::from_headers(&headers, origin)?;

    let mut rows = Vec::new();

    for result in reader.records() {
        let record = result.map_err(|e| Error::source_unavailable(origin, e))?;

        if record.iter().all(|field| field.is_empty()) {
            continue;
        }

        let number = record.get(columns.number).unwrap_or("").to_string();
        let row_label = if number.is_empty() {
            match record.position() {
                Some(position) => format!("line {}", position.line()),
                None => "line ?".to_string(),
            }
        } else {
            number.clone()
        };

        let date = record.get(columns.date).unwrap_or("").to_string();
        let amount = parse_amount(record.get(columns.amount).unwrap_or(""))
            .map_err(|reason| Error::parse(row_label, reason))?;

        rows.push(TransactionRow {
            number,
            date,
            amount,
        });
    }

    log::debug!("Parsed {} rows from {}", rows.len(), origin);
    Ok(rows)
}

/// Parse an amount such as "60.5", "+60.5", "-10.3" or "1e2".
pub fn parse_amount(raw: &str) -> std::result::Result<Decimal, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("missing amount".to_string());
    }

    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);

    Decimal::from_str(unsigned)
        .or_else(|_| Decimal::from_scientific(unsigned))
        .map_err(|_| format!("invalid amount '{}'", raw))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("Id"), Some("number"));
        assert_eq!(normalize_header(" Date "), Some("date"));
        assert_eq!(normalize_header("Transaction"), Some("amount"));
        assert_eq!(normalize_header("AMOUNT"), Some("amount"));
        assert_eq!(normalize_header("Description"), None);
    }

    #[test]
    fn test_parse_bank_export_headers() {
        let csv = b"\
Id,Date,Transaction
0,7/15,+60.5
1,7/28,-10.3
2,8/2,-20.46
3,8/13,+10
";
        let rows = parse_csv(&csv[..], "test.csv").unwrap();

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], TransactionRow::new("0", "7/15", dec!(60.5)));
        assert_eq!(rows[1].amount, dec!(-10.3));
        assert_eq!(rows[2].date, "8/2");
        assert_eq!(rows[3].amount, dec!(10));
    }

    #[test]
    fn test_parse_canonical_headers_any_order_with_extra_columns() {
        let csv = b"\
amount, memo, date, number
12.00, coffee, 1/3, A-1
";
        let rows = parse_csv(&csv[..], "test.csv").unwrap();

        assert_eq!(rows, vec![TransactionRow::new("A-1", "1/3", dec!(12.00))]);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let csv = b"Id,Date,Transaction\n\n1,1/1,5\n\n  ,  ,  \n2,1/2,15\n";
        let rows = parse_csv(&csv[..], "test.csv").unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].number, "2");
    }

    #[test]
    fn test_header_only_gives_empty_table() {
        let rows = parse_csv(&b"Id,Date,Transaction\n"[..], "test.csv").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_missing_column_is_schema_mismatch() {
        let csv = b"Id,Date\n1,7/1\n";
        let err = parse_csv(&csv[..], "test.csv").unwrap_err();

        match err {
            Error::SchemaMismatch {
                source_name,
                missing,
            } => {
                assert_eq!(source_name, "test.csv");
                assert_eq!(missing, vec!["amount".to_string()]);
            }
            other => panic!("expected SchemaMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_amount_names_row() {
        let csv = b"Id,Date,Transaction\n1,7/1,5\n42,7/2,abc\n";
        let err = parse_csv(&csv[..], "test.csv").unwrap_err();

        match err {
            Error::Parse { row, reason } => {
                assert_eq!(row, "42");
                assert!(reason.contains("abc"));
            }
            other => panic!("expected Parse, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_amount_without_number_names_line() {
        let csv = b"Id,Date,Transaction\n,7/2,\n";
        let err = parse_csv(&csv[..], "test.csv").unwrap_err();

        assert!(matches!(err, Error::Parse { ref row, .. } if row == "line 2"));
    }

    #[test]
    fn test_line_label_counts_blank_lines() {
        let data = b"Id,Date,Transaction\n\n\n\n,7/2,\n";

        let err = parse_csv(&data[..], "test").unwrap_err();

        match err {
            Error::Parse { row, .. } => assert_eq!(row, "line 5"),
            other => panic!("expected Parse, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_amount_forms() {
        assert_eq!(parse_amount("+60.5"), Ok(dec!(60.5)));
        assert_eq!(parse_amount(" -0.01 "), Ok(dec!(-0.01)));
        assert_eq!(parse_amount("0"), Ok(dec!(0)));
        assert_eq!(parse_amount("1e2"), Ok(dec!(100)));
        assert!(parse_amount("NaN").is_err());
        assert!(parse_amount("").is_err());
    }
}
