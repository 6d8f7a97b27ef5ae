//! Human-readable invoice numbers: `INV-YYYYMMDD-NNNNNN`, the sequence
//! zero-padded to six digits and widening past a million.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use torque_core::{DomainError, DomainResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceNumber(String);

impl InvoiceNumber {
    pub fn new(issued_on: NaiveDate, sequence: u64) -> Self {
        Self(format!("INV-{}-{:06}", issued_on.format("%Y%m%d"), sequence))
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        let invalid = || DomainError::validation(format!("malformed invoice number: {s}"));
        let rest = s.strip_prefix("INV-").ok_or_else(invalid)?;
        let (date, seq) = rest.split_once('-').ok_or_else(invalid)?;
        NaiveDate::parse_from_str(date, "%Y%m%d").map_err(|_| invalid())?;
        if seq.len() < 6 || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-wide invoice number sequence.
///
/// The sequence is global rather than per day; numbers never repeat within a
/// process.
#[derive(Debug)]
pub struct InvoiceNumberGenerator {
    next: AtomicU64,
}

impl InvoiceNumberGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next(&self, issued_on: NaiveDate) -> InvoiceNumber {
        InvoiceNumber::new(issued_on, self.next.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for InvoiceNumberGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    #[test]
    fn numbers_are_formatted_and_unique() {
        let generator = InvoiceNumberGenerator::new();
        let a = generator.next(day());
        let b = generator.next(day());

        assert_eq!(a.as_str(), "INV-20250610-000001");
        assert_eq!(b.as_str(), "INV-20250610-000002");
        assert_ne!(a, b);
    }

    #[test]
    fn parse_accepts_only_the_canonical_shape() {
        assert!(InvoiceNumber::parse("INV-20250610-000042").is_ok());
        assert!(InvoiceNumber::parse("INV-20251310-000042").is_err());
        assert!(InvoiceNumber::parse("INV-20250610-42").is_err());
        assert!(InvoiceNumber::parse("20250610-000042").is_err());
        assert!(InvoiceNumber::parse("INV-20250610-1000042").is_ok());
    }

    #[test]
    fn sequence_widens_instead_of_wrapping() {
        let generator = InvoiceNumberGenerator::starting_at(999_999);
        let last_six = generator.next(day());
        let first_seven = generator.next(day());

        assert_eq!(last_six.as_str(), "INV-20250610-999999");
        assert_eq!(first_seven.as_str(), "INV-20250610-1000000");
        assert_ne!(first_seven, InvoiceNumber::new(day(), 0));
        assert!(InvoiceNumber::parse(first_seven.as_str()).is_ok());
    }
}
