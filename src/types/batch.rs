//! Observation batches delivered to the consumer

use super::Observation;

/// One watched item and the observation reported for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Update<R> {
    /// Consumer-supplied reference for the data item
    pub item: R,
    pub observation: Observation,
}

/// All watched observations decoded from one document, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationBatch<R> {
    pub updates: Vec<Update<R>>,
    /// Agent incarnation the batch was observed under
    pub instance_id: u64,
    /// Cursor after this batch
    pub next_sequence: u64,
}

impl<R> ObservationBatch<R> {
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Update<R>> {
        self.updates.iter()
    }
}

impl<R> IntoIterator for ObservationBatch<R> {
    type Item = Update<R>;
    type IntoIter = std::vec::IntoIter<Update<R>>;

    fn into_iter(self) -> Self::IntoIter {
        self.updates.into_iter()
    }
}
