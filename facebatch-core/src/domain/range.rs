//! Job sub-range selection
//!
//! Accepts `N` or `START-END` (1-based, inclusive). Ranges that fall outside
//! the catalog select nothing rather than failing.

use std::str::FromStr;
use thiserror::Error;

/// Inclusive 1-based range of catalog positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSelector {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid range '{0}': expected N or START-END")]
pub struct RangeParseError(pub String);

impl RangeSelector {
    pub fn single(index: usize) -> Self {
        Self {
            start: index,
            end: index,
        }
    }

    /// Applies the selection to an ordered slice
    pub fn select<T: Clone>(&self, items: &[T]) -> Vec<T> {
        // Position 0 and reversed ranges select nothing.
        if self.start == 0 || self.end < self.start {
            return Vec::new();
        }
        let from = self.start - 1;
        let to = self.end.min(items.len());
        if from >= to {
            return Vec::new();
        }
        items[from..to].to_vec()
    }
}

impl FromStr for RangeSelector {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parse = |part: &str| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| RangeParseError(s.to_string()))
        };

        match trimmed.split_once('-') {
            Some((start, end)) => Ok(Self {
                start: parse(start)?,
                end: parse(end)?,
            }),
            None => Ok(Self::single(parse(trimmed)?)),
        }
    }
}

impl std::fmt::Display for RangeSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}
