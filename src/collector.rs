//! Order-preserving, index-addressed result set.
//!
//! Slot `i` belongs to work item `i` and is written at most once, no matter in
//! which order items complete. Failed items leave their slot empty, which is
//! serialized as `null`.

use crate::models::Outcome;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CollectError {
    #[error("slot {index} is out of range for a batch of {total}")]
    OutOfRange { index: usize, total: usize },
    #[error("slot {index} was already recorded")]
    Duplicate { index: usize },
}

#[derive(Debug)]
pub struct ResultCollector<T> {
    slots: Vec<Option<T>>,
    recorded: Vec<bool>,
    completed: usize,
    failed: Vec<usize>,
}

impl<T> ResultCollector<T> {
    /// A result set of `total` empty slots.
    pub fn new(total: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(total).collect(),
            recorded: vec![false; total],
            completed: 0,
            failed: Vec::new(),
        }
    }

    /// Store the terminal outcome for item `index`.
    ///
    /// # Arguments
    ///
    /// * `index` - Position of the item in the input list
    /// * `outcome` - Its terminal outcome; only successes fill the slot
    ///
    /// # Returns
    ///
    /// * `Err(CollectError::OutOfRange)` if `index` is not a slot
    /// * `Err(CollectError::Duplicate)` if the item was already recorded
    pub fn record(&mut self, index: usize, outcome: Outcome<T>) -> Result<(), CollectError> {
        let total = self.slots.len();
        let seen = self
            .recorded
            .get_mut(index)
            .ok_or(CollectError::OutOfRange { index, total })?;
        if *seen {
            return Err(CollectError::Duplicate { index });
        }
        *seen = true;

        match outcome {
            Outcome::Success(value) => {
                self.slots[index] = Some(value);
                self.completed += 1;
            }
            Outcome::Failed(_) => self.failed.push(index),
        }
        Ok(())
    }

    /// Slots holding a result.
    pub fn count_completed(&self) -> usize {
        self.completed
    }

    /// Outcomes recorded so far, successes and failures alike.
    pub fn count_resolved(&self) -> usize {
        self.completed + self.failed.len()
    }

    /// Number of slots, fixed at construction.
    pub fn total(&self) -> usize {
        self.slots.len()
    }

    /// `true` once every item has either a result or a recorded failure.
    pub fn is_fully_resolved(&self) -> bool {
        self.count_resolved() == self.total()
    }

    /// Indices of failed items, sorted.
    pub fn failed_indices(&self) -> Vec<usize> {
        let mut failed = self.failed.clone();
        failed.sort_unstable();
        failed
    }

    /// The slots in input order; `None` for failed or unresolved items.
    pub fn slots(&self) -> &[Option<T>] {
        &self.slots
    }
}

impl<T: Serialize> ResultCollector<T> {
    /// The whole result set as pretty JSON, one slot per item.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.slots)
    }
}
