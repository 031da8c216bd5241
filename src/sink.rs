//! Consumer callback interface.
//!
//! Decoded batches are handed to an [`UpdateSink`] on the same task that reads
//! the next frame, so implementations must return promptly.

use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{ConditionLevel, Observation, ObservationBatch, ObservationValue};

/// The agent restarted between two documents; observations in between are lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discontinuity {
    pub previous: u64,
    pub current: u64,
}

/// Receives decoded observations for watched items.
pub trait UpdateSink<R>: Send {
    /// Apply one observation to the consumer's state for `item`.
    ///
    /// Called for every update of a batch, in document order, before the batch
    /// itself is delivered.
    fn apply(&mut self, _item: &R, _observation: &Observation) {}

    /// Receive one batch per decoded document.
    fn deliver(&mut self, batch: ObservationBatch<R>);

    /// Called when the agent restarted and a fresh snapshot follows.
    fn on_discontinuity(&mut self, _gap: Discontinuity) {}
}

impl<R, F> UpdateSink<R> for F
where
    F: FnMut(ObservationBatch<R>) + Send,
{
    fn deliver(&mut self, batch: ObservationBatch<R>) {
        self(batch)
    }
}

/// Event forwarded by a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent<R> {
    Batch(ObservationBatch<R>),
    Discontinuity(Discontinuity),
}

/// Forwards every batch and gap notice into an unbounded channel.
///
/// Unbounded so the reading task never waits on the consumer.
#[derive(Debug)]
pub struct ChannelSink<R> {
    tx: mpsc::UnboundedSender<SinkEvent<R>>,
}

impl<R: Send> ChannelSink<R> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent<R>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: SinkEvent<R>) {
        if self.tx.send(event).is_err() {
            debug!("Update receiver dropped");
        }
    }
}

impl<R: Send> UpdateSink<R> for ChannelSink<R> {
    fn deliver(&mut self, batch: ObservationBatch<R>) {
        self.send(SinkEvent::Batch(batch));
    }

    fn on_discontinuity(&mut self, gap: Discontinuity) {
        self.send(SinkEvent::Discontinuity(gap));
    }
}

/// Consumer-side state of one data item.
#[derive(Debug, Clone, PartialEq)]
pub enum DataItemValue {
    /// Latest value of a sample or event
    Value(ObservationValue),
    /// Active condition entries; `None` while the condition is unavailable
    Conditions(Option<Vec<Observation>>),
}

impl Default for DataItemValue {
    fn default() -> Self {
        DataItemValue::Value(ObservationValue::Unavailable)
    }
}

impl DataItemValue {
    /// Fold one observation into the current state.
    ///
    /// Condition rules:
    /// - `Unavailable` makes the whole condition unavailable
    /// - `Normal` without a native code clears every active entry
    /// - an entry replaces any active entry with the same native code
    /// - anything but `Normal` is then kept as active
    pub fn apply(&mut self, observation: &Observation) {
        let Some(level) = observation.condition_level() else {
            *self = DataItemValue::Value(observation.value.clone());
            return;
        };

        if level == ConditionLevel::Unavailable {
            *self = DataItemValue::Conditions(None);
            return;
        }

        let mut active = match std::mem::take(self) {
            DataItemValue::Conditions(Some(active)) => active,
            _ => Vec::new(),
        };

        match observation.native_code.as_deref() {
            None if level == ConditionLevel::Normal => active.clear(),
            None => {}
            Some(code) => active.retain(|entry| entry.native_code.as_deref() != Some(code)),
        }
        if level != ConditionLevel::Normal {
            active.push(observation.clone());
        }
        *self = DataItemValue::Conditions(Some(active));
    }

    pub fn value(&self) -> Option<&ObservationValue> {
        match self {
            DataItemValue::Value(value) => Some(value),
            DataItemValue::Conditions(_) => None,
        }
    }

    /// Active condition entries, `None` when unavailable or not a condition.
    pub fn active_conditions(&self) -> Option<&[Observation]> {
        match self {
            DataItemValue::Conditions(Some(active)) => Some(active),
            _ => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            DataItemValue::Value(ObservationValue::Unavailable) | DataItemValue::Conditions(None)
        )
    }
}

/// Tracks [`DataItemValue`]s keyed by the consumer's item reference and
/// forwards batches to an inner sink.
#[derive(Debug)]
pub struct DataItemStates<R, S> {
    values: std::collections::HashMap<R, DataItemValue>,
    inner: S,
}

impl<R, S> DataItemStates<R, S>
where
    R: std::hash::Hash + Eq + Clone + Send,
    S: UpdateSink<R>,
{
    pub fn new(inner: S) -> Self {
        Self { values: Default::default(), inner }
    }

    pub fn get(&self, item: &R) -> Option<&DataItemValue> {
        self.values.get(item)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<R, S> UpdateSink<R> for DataItemStates<R, S>
where
    R: std::hash::Hash + Eq + Clone + Send,
    S: UpdateSink<R>,
{
    fn apply(&mut self, item: &R, observation: &Observation) {
        self.values.entry(item.clone()).or_default().apply(observation);
        self.inner.apply(item, observation);
    }

    fn deliver(&mut self, batch: ObservationBatch<R>) {
        self.inner.deliver(batch);
    }

    fn on_discontinuity(&mut self, gap: Discontinuity) {
        self.inner.on_discontinuity(gap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;

    fn condition(level: &str, code: Option<&str>, text: &str) -> Observation {
        Observation {
            category: Category::Condition,
            element: level.to_string(),
            data_item_id: "system".into(),
            sequence: None,
            timestamp: None,
            name: None,
            sub_type: None,
            native_code: code.map(String::from),
            value: ObservationValue::Text(text.into()),
        }
    }

    fn event(value: ObservationValue) -> Observation {
        Observation {
            category: Category::Event,
            element: "Execution".into(),
            data_item_id: "exec".into(),
            sequence: Some(4),
            timestamp: None,
            name: None,
            sub_type: None,
            native_code: None,
            value,
        }
    }

    fn codes(state: &DataItemValue) -> Vec<&str> {
        state
            .active_conditions()
            .unwrap_or_default()
            .iter()
            .filter_map(|c| c.native_code.as_deref())
            .collect()
    }

    #[test]
    fn alarms_accumulate_by_native_code() {
        let mut state = DataItemValue::default();
        state.apply(&condition("Fault", Some("E1"), "spindle"));
        state.apply(&condition("Warning", Some("W7"), "coolant"));
        assert_eq!(codes(&state), vec!["E1", "W7"]);
    }

    #[test]
    fn same_native_code_is_last_write_wins() {
        let mut state = DataItemValue::default();
        state.apply(&condition("Warning", Some("E1"), "first"));
        state.apply(&condition("Fault", Some("E1"), "second"));

        let active = state.active_conditions().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].element, "Fault");
        assert_eq!(active[0].value.as_str(), Some("second"));
    }

    #[test]
    fn normal_clears_by_code_or_entirely() {
        let mut state = DataItemValue::default();
        state.apply(&condition("Fault", Some("E1"), ""));
        state.apply(&condition("Fault", Some("E2"), ""));

        state.apply(&condition("Normal", Some("E1"), ""));
        assert_eq!(codes(&state), vec!["E2"]);

        state.apply(&condition("Normal", None, ""));
        assert_eq!(state.active_conditions(), Some(&[][..]));
        assert!(!state.is_unavailable());
    }

    #[test]
    fn unavailable_condition_drops_active_entries() {
        let mut state = DataItemValue::default();
        state.apply(&condition("Fault", Some("E1"), ""));
        state.apply(&condition("Unavailable", None, ""));
        assert!(state.is_unavailable());
        assert_eq!(state.active_conditions(), None);
    }

    #[test]
    fn events_keep_latest_value() {
        let mut state = DataItemValue::default();
        assert!(state.is_unavailable());
        state.apply(&event(ObservationValue::Text("ACTIVE".into())));
        assert_eq!(state.value().and_then(|v| v.as_str()), Some("ACTIVE"));
        state.apply(&event(ObservationValue::Unavailable));
        assert!(state.is_unavailable());
    }

    #[test]
    fn states_track_items_and_forward_batches() {
        let mut delivered = 0usize;
        {
            let mut states = DataItemStates::new(|batch: ObservationBatch<&str>| {
                delivered += batch.len();
            });
            let obs = event(ObservationValue::Text("READY".into()));
            states.apply(&"exec", &obs);
            states.deliver(ObservationBatch {
                updates: vec![crate::types::Update { item: "exec", observation: obs }],
                instance_id: 1,
                next_sequence: 2,
            });
            assert_eq!(
                states.get(&"exec").and_then(|v| v.value()).and_then(|v| v.as_str()),
                Some("READY")
            );
        }
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn channel_sink_forwards_in_order() {
        let (mut sink, mut rx) = ChannelSink::<u8>::new();
        sink.on_discontinuity(Discontinuity { previous: 1, current: 2 });
        sink.deliver(ObservationBatch { updates: Vec::new(), instance_id: 2, next_sequence: 9 });

        assert!(matches!(rx.recv().await, Some(SinkEvent::Discontinuity(_))));
        match rx.recv().await {
            Some(SinkEvent::Batch(batch)) => assert_eq!(batch.next_sequence, 9),
            other => panic!("unexpected {other:?}"),
        }
    }
}
