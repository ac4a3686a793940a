//! Human-readable document codes backed by an injected sequence generator.

use crate::error::SequenceError;
use chrono::{Local, NaiveDate};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of monotonically increasing sequence numbers.
pub trait SequenceGenerator: Send + Sync {
    fn next_sequence(&self) -> Result<u64, SequenceError>;
}

/// In-process sequence starting after a given value.
#[derive(Debug, Default)]
pub struct AtomicSequence {
    last: AtomicU64,
}

impl AtomicSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume after `last`, e.g. a value loaded from storage.
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    pub fn last(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

impl SequenceGenerator for AtomicSequence {
    fn next_sequence(&self) -> Result<u64, SequenceError> {
        self.last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
            .map(|previous| previous + 1)
            .map_err(|_| SequenceError::Exhausted)
    }
}

/// Generates codes like `INV-20240131-000042`.
#[derive(Clone)]
pub struct CodeGenerator {
    sequence: Arc<dyn SequenceGenerator>,
}

impl CodeGenerator {
    pub fn new(sequence: Arc<dyn SequenceGenerator>) -> Self {
        Self { sequence }
    }

    /// Code for today's local date.
    pub fn generate(&self, prefix: &str) -> Result<String, SequenceError> {
        self.generate_on(prefix, Local::now().date_naive())
    }

    /// Code for a given date.
    pub fn generate_on(&self, prefix: &str, date: NaiveDate) -> Result<String, SequenceError> {
        let sequence = self.sequence.next_sequence()?;
        Ok(format!(
            "{}-{}-{:06}",
            prefix.to_uppercase(),
            date.format("%Y%m%d"),
            sequence
        ))
    }
}
