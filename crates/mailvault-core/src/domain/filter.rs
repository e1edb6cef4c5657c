//! Message filter with inclusive date bounds
//!
//! The query string is opaque and handed to the provider as-is (a Gmail
//! search expression like `in:sent`, or an OData filter like
//! `parentFolderId eq 'Inbox'`). The date bounds are interpreted here.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Filter applied when listing remote messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    query: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

impl FilterSpec {
    /// Creates a filter, rejecting an inverted date range
    ///
    /// An empty or whitespace-only query is treated as no query.
    pub fn new(
        query: Option<String>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Self, DomainError> {
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start > end {
                return Err(DomainError::InvalidDate(format!(
                    "start date {} is after end date {}",
                    start.format("%Y/%m/%d"),
                    end.format("%Y/%m/%d")
                )));
            }
        }

        let query = query
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());

        Ok(Self {
            query,
            start_date,
            end_date,
        })
    }

    /// A filter that matches every message
    pub fn all() -> Self {
        Self::default()
    }

    /// Returns the provider-specific query expression
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the inclusive lower date bound
    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start_date
    }

    /// Returns the inclusive upper date bound
    pub fn end_date(&self) -> Option<NaiveDate> {
        self.end_date
    }

    /// Returns the day after `end_date`
    ///
    /// Provider APIs take an exclusive upper bound (`before:` in Gmail,
    /// `lt` in OData), so inclusive end dates are shifted by one day.
    pub fn end_date_exclusive(&self) -> Option<NaiveDate> {
        self.end_date.and_then(|d| d.succ_opt())
    }

    /// Checks a listed message's received time against the date bounds
    ///
    /// Messages without a known date always match; the provider already
    /// applied the filter server-side.
    pub fn matches_date(&self, received_at: Option<DateTime<Utc>>) -> bool {
        let Some(received) = received_at else {
            return true;
        };
        let day = received.date_naive();
        if self.start_date.is_some_and(|start| day < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| day > end) {
            return false;
        }
        true
    }
}

/// Parses a date in `YYYY/MM/DD` form (`YYYY-MM-DD` is also accepted)
pub fn parse_date(value: &str) -> Result<NaiveDate, DomainError> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y/%m/%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .map_err(|_| DomainError::InvalidDate(format!("expected YYYY/MM/DD, got '{value}'")))
}
