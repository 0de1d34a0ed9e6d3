// Summary Engine - balance, credit/debit averages and monthly counts
//
// Pure computation over a TransactionTable: no I/O besides logging, and the
// table is never modified.

use std::collections::BTreeMap;

use chrono::{Datelike, Month, NaiveDate};
use log::info;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::DEFAULT_SUMMARY_YEAR;
use crate::error::{Error, Result};
use crate::parser::{TransactionRow, TransactionTable};

/// Decimal places every money figure is rounded to
pub const MONEY_DP: u32 = 2;

// ============================================================================
// SUMMARY RECORD
// ============================================================================

/// Aggregate statistics for one run. Built once, never persisted.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SummaryRecord {
    pub username: String,
    pub total_balance: Decimal,
    /// None when the table has no credits
    pub average_credit_amount: Option<Decimal>,
    /// None when the table has no debits
    pub average_debit_amount: Option<Decimal>,
    pub month_transactions: MonthCounts,
}

/// Transaction counts keyed by English month name, in calendar order.
///
/// Serializes as a JSON object whose keys keep that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonthCounts(Vec<(String, usize)>);

impl MonthCounts {
    pub fn get(&self, month: &str) -> Option<usize> {
        self.0
            .iter()
            .find(|(name, _)| name == month)
            .map(|(_, count)| *count)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(name, count)| (name.as_str(), *count))
    }

    pub fn months(&self) -> Vec<&str> {
        self.0.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Sum over every bucket
    pub fn total(&self) -> usize {
        self.0.iter().map(|(_, count)| count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for MonthCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (month, count) in &self.0 {
            map.serialize_entry(month, count)?;
        }
        map.end()
    }
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// Summarize a table, reading "M/D" dates in the default year (1900).
pub fn summarize(table: &TransactionTable, display_name: &str) -> Result<SummaryRecord> {
    summarize_in_year(table, display_name, DEFAULT_SUMMARY_YEAR)
}

/// Summarize a table, reading "M/D" dates in `year`.
///
/// Fails with `Error::Parse` on the first row whose date is not a valid
/// month/day in that year; no row is skipped.
pub fn summarize_in_year(
    table: &TransactionTable,
    display_name: &str,
    year: i32,
) -> Result<SummaryRecord> {
    info!("Summary information");

    let total_balance = round_money(checked_sum(table.iter())?.0);
    let average_credit_amount = mean(table.iter().filter(|row| row.amount > Decimal::ZERO))?;
    let average_debit_amount = mean(table.iter().filter(|row| row.amount < Decimal::ZERO))?;
    let month_transactions = count_by_month(table, year)?;

    info!("Total balance is {}", total_balance);
    info!("Average credit amount: {}", display_optional(average_credit_amount));
    info!("Average debit amount: {}", display_optional(average_debit_amount));
    for (month, total) in month_transactions.iter() {
        info!("Number of transactions in {}: {}", month, total);
    }

    Ok(SummaryRecord {
        username: display_name.to_string(),
        total_balance,
        average_credit_amount,
        average_debit_amount,
        month_transactions,
    })
}

/// Round half to even to two places, always carrying a scale of two.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(MONEY_DP);
    rounded
}

/// Sum and count of the rows' amounts.
///
/// Fails with `Error::Parse` naming the row at which the running total leaves
/// the decimal range.
fn checked_sum<'a>(mut rows: impl Iterator<Item = &'a TransactionRow>) -> Result<(Decimal, u64)> {
    rows.try_fold((Decimal::ZERO, 0u64), |(sum, count), row| {
        let sum = sum
            .checked_add(row.amount)
            .ok_or_else(|| Error::parse(row.number.clone(), "amount overflow"))?;
        Ok((sum, count + 1))
    })
}

fn mean<'a>(rows: impl Iterator<Item = &'a TransactionRow>) -> Result<Option<Decimal>> {
    let (sum, count) = checked_sum(rows)?;
    if count == 0 {
        return Ok(None);
    }

    Ok(Some(round_money(sum / Decimal::from(count))))
}

fn display_optional(value: Option<Decimal>) -> String {
    value.map_or_else(|| "none".to_string(), |v| v.to_string())
}

/// Parse a "M/D" date in the given year.
pub fn parse_month_day(raw: &str, year: i32) -> Option<NaiveDate> {
    let (month, day) = raw.trim().split_once('/')?;
    let month = parse_date_part(month)?;
    let day = parse_date_part(day)?;

    NaiveDate::from_ymd_opt(year, month, day)
}

// Digits only; `u32::from_str` would also take a leading '+'
fn parse_date_part(raw: &str) -> Option<u32> {
    let digits = raw.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Bucket rows by calendar month.
///
/// Buckets span every month from the earliest to the latest one seen, so a
/// month with no rows between two active months is reported with a count of 0.
fn count_by_month(table: &[TransactionRow], year: i32) -> Result<MonthCounts> {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();

    for row in table {
        let date = parse_month_day(&row.date, year).ok_or_else(|| {
            Error::parse(
                row.number.clone(),
                format!("invalid date '{}', expected month/day", row.date),
            )
        })?;
        *counts.entry(date.month()).or_insert(0) += 1;
    }

    let (first, last) = match (counts.keys().next(), counts.keys().next_back()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Ok(MonthCounts::default()),
    };

    let buckets = (first..=last)
        .map(|month| (month_name(month), counts.get(&month).copied().unwrap_or(0)))
        .collect();

    Ok(MonthCounts(buckets))
}

fn month_name(month: u32) -> String {
    u8::try_from(month)
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .map(|m| m.name().to_string())
        .unwrap_or_default()
}

// ============================================================================
// TESTS
// ============================================================================
