//! Ordered, deduplicated message log with optimistic-send reconciliation.
//!
//! Every entry has an id unique within the log. Messages typed locally enter
//! as optimistic [`DeliveryStatus::Sending`] entries and are replaced in
//! place when the server echoes them back, matched by `(sender, text)`.

use std::collections::HashSet;

use unichat_proto::message::{MessageCandidate, MessageDto, Timestamp};

/// Text shown in place of a message that could not be sent.
pub const DEFAULT_FAILED_MARKER: &str = "message not delivered";

/// Delivery status of a message in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    /// Sent locally, not yet confirmed by the server.
    Sending,
    /// Confirmed by the server.
    Delivered,
    /// Could not be sent. Terminal.
    Failed,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sending => write!(f, "sending"),
            Self::Delivered => write!(f, "delivered"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One entry of the [`MessageLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server id, or a client-generated id for optimistic and id-less entries.
    pub id: String,
    /// Sender's user id.
    pub sender_id: String,
    /// Name shown for the sender.
    pub author_name: String,
    /// Message text (or the failure marker once failed).
    pub text: String,
    /// Server or local timestamp.
    pub timestamp: Option<Timestamp>,
    /// Delivery status.
    pub status: DeliveryStatus,
    /// Whether the entry was created locally and never confirmed.
    pub is_optimistic: bool,
}

impl Message {
    fn confirmed(id: String, candidate: MessageCandidate) -> Self {
        Self {
            id,
            sender_id: candidate.sender_id,
            author_name: candidate.author_name,
            text: candidate.text,
            timestamp: candidate.timestamp,
            status: DeliveryStatus::Delivered,
            is_optimistic: false,
        }
    }

    /// Whether this entry is waiting for the server's echo.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.is_optimistic && self.status == DeliveryStatus::Sending
    }
}

/// What [`MessageLog::reconcile_or_append`] did with an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// An entry with the same id already exists; nothing changed.
    Duplicate,
    /// A pending optimistic entry was confirmed in place.
    Reconciled {
        /// Id of the confirmed entry.
        id: String,
    },
    /// No pending entry matched; appended at the tail.
    Appended {
        /// Id of the new entry.
        id: String,
    },
}

/// The ordered message log.
#[derive(Debug, Clone)]
pub struct MessageLog {
    entries: Vec<Message>,
    ids: HashSet<String>,
    failed_marker: String,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    /// Creates an empty log using [`DEFAULT_FAILED_MARKER`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_failed_marker(DEFAULT_FAILED_MARKER)
    }

    /// Creates an empty log whose failed entries read `marker`.
    #[must_use]
    pub fn with_failed_marker(marker: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            ids: HashSet::new(),
            failed_marker: marker.into(),
        }
    }

    /// Replaces the whole log with a fetched history.
    ///
    /// Records without sender or content are skipped, records without an id
    /// get a generated one, and records repeating an earlier id are dropped.
    pub fn replace_all(&mut self, records: Vec<MessageDto>) {
        self.clear();
        for record in records {
            let candidate = match MessageCandidate::try_from(record) {
                Ok(candidate) => candidate,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping invalid history record");
                    continue;
                }
            };
            let id = candidate.id.clone().unwrap_or_else(placeholder_id);
            if !self.ids.insert(id.clone()) {
                tracing::debug!(id = %id, "dropping duplicate history record");
                continue;
            }
            self.entries.push(Message::confirmed(id, candidate));
        }
    }

    /// Replaces the log with a fetched history while keeping live entries.
    ///
    /// History becomes the prefix. A pending optimistic entry whose
    /// `(sender, text)` matches a history record not already held by another
    /// live entry is dropped, since history carries its confirmed copy; each
    /// record confirms at most one entry, newest first. Remaining entries
    /// whose ids do not appear in the history follow it in their original
    /// order. Returns how many live entries were kept.
    pub fn merge_history(&mut self, records: Vec<MessageDto>) -> usize {
        let live = std::mem::take(&mut self.entries);
        let live_ids: HashSet<&str> = live.iter().map(|m| m.id.as_str()).collect();
        self.replace_all(records);

        let mut claimed: Vec<bool> = self
            .entries
            .iter()
            .map(|m| live_ids.contains(m.id.as_str()))
            .collect();
        let mut confirmed = vec![false; live.len()];
        for (index, entry) in live.iter().enumerate().rev() {
            if !entry.is_pending() {
                continue;
            }
            let matched = self.entries.iter().enumerate().rposition(|(h, m)| {
                !claimed[h] && m.sender_id == entry.sender_id && m.text == entry.text
            });
            if let Some(h) = matched {
                claimed[h] = true;
                confirmed[index] = true;
                tracing::debug!(
                    local_id = %entry.id,
                    id = %self.entries[h].id,
                    "pending message confirmed by history"
                );
            }
        }

        let mut kept = 0;
        for (entry, confirmed) in live.into_iter().zip(confirmed) {
            if !confirmed && self.ids.insert(entry.id.clone()) {
                self.entries.push(entry);
                kept += 1;
            }
        }
        kept
    }

    /// Appends a locally-sent message as a pending optimistic entry.
    ///
    /// Returns the generated id.
    pub fn append_optimistic(
        &mut self,
        sender_id: impl Into<String>,
        author_name: impl Into<String>,
        text: impl Into<String>,
    ) -> String {
        let id = format!("local-{}", uuid::Uuid::now_v7());
        self.ids.insert(id.clone());
        self.entries.push(Message {
            id: id.clone(),
            sender_id: sender_id.into(),
            author_name: author_name.into(),
            text: text.into(),
            timestamp: Some(Timestamp::now()),
            status: DeliveryStatus::Sending,
            is_optimistic: true,
        });
        id
    }

    /// Marks a [`DeliveryStatus::Sending`] entry as failed, replacing its
    /// text with the failure marker.
    ///
    /// Returns `false` if there is no such entry or it is not sending.
    pub fn mark_failed(&mut self, id: &str) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|m| m.id == id && m.status == DeliveryStatus::Sending)
        else {
            return false;
        };
        entry.status = DeliveryStatus::Failed;
        entry.text.clone_from(&self.failed_marker);
        true
    }

    /// Applies a message confirmed by the server.
    ///
    /// A known id is a duplicate and is discarded. Otherwise the oldest
    /// pending entry with the same sender and text is confirmed in place,
    /// keeping its id when the server sent none. Anything else is appended.
    pub fn reconcile_or_append(&mut self, incoming: MessageCandidate) -> ReconcileOutcome {
        if let Some(id) = &incoming.id
            && self.ids.contains(id)
        {
            return ReconcileOutcome::Duplicate;
        }

        let pending = self.entries.iter().position(|m| {
            m.is_pending() && m.sender_id == incoming.sender_id && m.text == incoming.text
        });
        if let Some(index) = pending {
            let previous = &self.entries[index];
            let local_id = previous.id.clone();
            let local_timestamp = previous.timestamp;
            let id = incoming.id.clone().unwrap_or_else(|| local_id.clone());
            if id != local_id {
                self.ids.remove(&local_id);
                self.ids.insert(id.clone());
            }
            let mut confirmed = Message::confirmed(id.clone(), incoming);
            confirmed.timestamp = confirmed.timestamp.or(local_timestamp);
            self.entries[index] = confirmed;
            return ReconcileOutcome::Reconciled { id };
        }

        let id = incoming.id.clone().unwrap_or_else(placeholder_id);
        self.ids.insert(id.clone());
        self.entries.push(Message::confirmed(id.clone(), incoming));
        ReconcileOutcome::Appended { id }
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }

    /// The entries in display order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    /// Looks up an entry by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Message> {
        if !self.ids.contains(id) {
            return None;
        }
        self.entries.iter().find(|m| m.id == id)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Text that replaces the body of failed entries.
    #[must_use]
    pub fn failed_marker(&self) -> &str {
        &self.failed_marker
    }
}

fn placeholder_id() -> String {
    format!("msg-{}", uuid::Uuid::now_v7())
}
