//! Cursor and session state for one monitored agent endpoint.
//!
//! A [`Session`] tracks which agent incarnation (`instanceId`) the cursor
//! (`nextSequence`) belongs to. The cursor is only meaningful together with
//! the incarnation it was observed under: when a response arrives from a
//! different incarnation the session drops both and reports
//! [`AgentError::StreamRestart`], and the caller re-baselines with a fresh
//! snapshot.

use std::collections::HashMap;
use tracing::{debug, info, trace};

use crate::document::{Header, StreamsDocument};
use crate::sink::{Discontinuity, UpdateSink};
use crate::types::{Mode, ObservationBatch, Update};
use crate::{AgentError, Result};

/// Data items to monitor, mapping data item id to a consumer reference.
///
/// The id order is kept and used to build the request path selector.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchList<R> {
    ids: Vec<String>,
    items: HashMap<String, R>,
}

impl<R> Default for WatchList<R> {
    fn default() -> Self {
        Self { ids: Vec::new(), items: HashMap::new() }
    }
}

impl<R> WatchList<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the reference for a data item id.
    pub fn insert(&mut self, id: impl Into<String>, item: R) {
        let id = id.into();
        if self.items.insert(id.clone(), item).is_none() {
            self.ids.push(id);
        }
    }

    pub fn get(&self, id: &str) -> Option<&R> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    /// Watched ids in insertion order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// XPath selector restricting responses to the watched items, e.g.
    /// `//DataItem[@id='a' or @id='b']`. `None` when nothing is watched.
    pub fn path(&self) -> Option<String> {
        if self.ids.is_empty() {
            return None;
        }
        let predicate =
            self.ids.iter().map(|id| format!("@id='{id}'")).collect::<Vec<_>>().join(" or ");
        Some(format!("//DataItem[{predicate}]"))
    }
}

impl<R, S: Into<String>> FromIterator<(S, R)> for WatchList<R> {
    fn from_iter<I: IntoIterator<Item = (S, R)>>(iter: I) -> Self {
        let mut list = WatchList::new();
        for (id, item) in iter {
            list.insert(id, item);
        }
        list
    }
}

/// State of one monitored endpoint.
#[derive(Debug, Clone)]
pub struct Session<R> {
    base_url: String,
    mode: Mode,
    instance_id: Option<u64>,
    next_sequence: Option<u64>,
    watched: WatchList<R>,
}

impl<R: Clone> Session<R> {
    pub fn new(base_url: impl Into<String>, mode: Mode, watched: WatchList<R>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mode,
            instance_id: None,
            next_sequence: None,
            watched,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn instance_id(&self) -> Option<u64> {
        self.instance_id
    }

    pub fn next_sequence(&self) -> Option<u64> {
        self.next_sequence
    }

    pub fn watched(&self) -> &WatchList<R> {
        &self.watched
    }

    /// Switch to polling for the rest of the session. There is no way back.
    pub fn downgrade_to_polling(&mut self) {
        if self.mode != Mode::Polling {
            info!(url = %self.base_url, "Streaming disabled, polling from now on");
            self.mode = Mode::Polling;
        }
    }

    /// Forget the cursor and the incarnation it belongs to.
    pub fn reset_cursor(&mut self) {
        debug!(
            instance_id = ?self.instance_id,
            next_sequence = ?self.next_sequence,
            "Discarding cursor"
        );
        self.instance_id = None;
        self.next_sequence = None;
    }

    /// Take over `instanceId` and `nextSequence` from a current or sample header.
    ///
    /// A changed `instanceId` means the agent restarted: the cursor is dropped,
    /// nothing is adopted, and [`AgentError::StreamRestart`] is returned.
    pub fn apply_header(&mut self, header: &Header) -> Result<()> {
        let next_sequence = header.next_sequence.ok_or_else(|| {
            AgentError::schema_error("streams header has no nextSequence")
        })?;

        match self.instance_id {
            Some(previous) if previous != header.instance_id => {
                self.reset_cursor();
                return Err(AgentError::StreamRestart { previous, current: header.instance_id });
            }
            Some(_) => {}
            None => {
                info!(instance_id = header.instance_id, "Tracking agent instance");
                self.instance_id = Some(header.instance_id);
            }
        }

        trace!(next_sequence, "Cursor advanced");
        self.next_sequence = Some(next_sequence);
        Ok(())
    }

    /// Resolve observations against the watch list, dropping unwatched ids.
    pub fn transform(&self, doc: &StreamsDocument) -> ObservationBatch<R> {
        let updates = doc
            .observations
            .iter()
            .filter_map(|observation| {
                let item = self.watched.get(&observation.data_item_id)?;
                Some(Update { item: item.clone(), observation: observation.clone() })
            })
            .collect();

        ObservationBatch {
            updates,
            instance_id: doc.header.instance_id,
            next_sequence: doc.header.next_sequence.unwrap_or_default(),
        }
    }

    /// Apply a decoded current/sample document and deliver its batch.
    ///
    /// Each observation is applied to its item through the sink before the
    /// whole batch is delivered. On restart the sink is told about the gap and
    /// nothing is delivered.
    pub fn handle_document<S>(&mut self, doc: &StreamsDocument, sink: &mut S) -> Result<usize>
    where
        S: UpdateSink<R> + ?Sized,
    {
        if let Err(err) = self.apply_header(&doc.header) {
            if let AgentError::StreamRestart { previous, current } = err {
                sink.on_discontinuity(Discontinuity { previous, current });
            }
            return Err(err);
        }

        let batch = self.transform(doc);
        for update in &batch.updates {
            sink.apply(&update.item, &update.observation);
        }
        let delivered = batch.len();
        sink.deliver(batch);
        Ok(delivered)
    }
}
