use std::collections::HashSet;

use tracing::{debug, trace};

use parley_types::events::LiveEvent;
use parley_types::models::{ConversationTarget, Message, MessageId, TargetKey};

use crate::timeline::Timeline;

/// Identifies the history request issued for one selection. A response is
/// applied only while its ticket is still current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub target: TargetKey,
    pub epoch: u64,
}

/// State of the chat pane: the selected conversation and its merged
/// message list.
#[derive(Debug, Clone, Default)]
pub struct ConversationView {
    target: Option<ConversationTarget>,
    epoch: u64,
    timeline: Timeline,
    /// Ids deleted during this selection; late history or live copies
    /// must not bring them back.
    deleted: HashSet<MessageId>,
    loading: bool,
    connected: bool,
    error: Option<String>,
}

impl ConversationView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to `target`, discarding everything shown for the previous one.
    pub fn select(&mut self, target: ConversationTarget) -> FetchTicket {
        self.epoch += 1;
        let key = target.key();
        debug!("Selected {} (epoch {})", key, self.epoch);

        self.target = Some(target);
        self.timeline.clear();
        self.deleted.clear();
        self.loading = true;
        self.connected = false;
        self.error = None;

        FetchTicket {
            target: key,
            epoch: self.epoch,
        }
    }

    pub fn deselect(&mut self) {
        self.epoch += 1;
        self.target = None;
        self.timeline.clear();
        self.deleted.clear();
        self.loading = false;
        self.connected = false;
        self.error = None;
    }

    pub fn is_current(&self, ticket: FetchTicket) -> bool {
        ticket.epoch == self.epoch && self.key() == Some(ticket.target)
    }

    /// Merge a history response. Returns `false` if the response belongs to
    /// a selection that has since been replaced.
    pub fn apply_history(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<Message>, String>,
    ) -> bool {
        if !self.is_current(ticket) {
            debug!("Ignoring stale history for {} (epoch {})", ticket.target, ticket.epoch);
            return false;
        }
        self.loading = false;
        match result {
            Ok(messages) => {
                let deleted = &self.deleted;
                let added = self
                    .timeline
                    .extend(messages.into_iter().filter(|m| !deleted.contains(&m.id)));
                trace!("Merged {} history messages into {}", added, ticket.target);
            }
            Err(e) => self.error = Some(e),
        }
        true
    }

    /// Apply a live event. Returns `true` if the view changed.
    pub fn on_live(&mut self, event: LiveEvent) -> bool {
        let Some(key) = self.key() else {
            return false;
        };
        match event {
            LiveEvent::Connected { target } if target == key => {
                self.connected = true;
                true
            }
            LiveEvent::Disconnected { target } if target == key => {
                self.connected = false;
                true
            }
            LiveEvent::MessageCreate(message) => self.merge(key, message),
            _ => false,
        }
    }

    /// Merge the message the server returned for a send.
    pub fn on_sent(&mut self, message: Message) -> bool {
        match self.key() {
            Some(key) => self.merge(key, message),
            None => false,
        }
    }

    /// Remove a message locally. The list is not restored if the server
    /// side deletion later fails.
    pub fn remove(&mut self, id: MessageId) -> Option<Message> {
        self.deleted.insert(id);
        self.timeline.remove(id)
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    fn merge(&mut self, key: TargetKey, message: Message) -> bool {
        if !message.addresses(key) {
            trace!("Dropping message {} not addressed to {}", message.id, key);
            return false;
        }
        if self.deleted.contains(&message.id) {
            trace!("Dropping deleted message {}", message.id);
            return false;
        }
        self.timeline.insert(message)
    }

    pub fn target(&self) -> Option<&ConversationTarget> {
        self.target.as_ref()
    }

    pub fn key(&self) -> Option<TargetKey> {
        self.target.as_ref().map(ConversationTarget::key)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn messages(&self) -> &[Message] {
        self.timeline.messages()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;

    fn direct(id: MessageId, from: i64, to: i64, ts: &str) -> Message {
        Message {
            id,
            sender_id: from,
            sender_username: None,
            receiver_id: Some(to),
            group_id: None,
            content: Some("hi".into()),
            file_url: None,
            timestamp: ts.parse::<DateTime<Utc>>().unwrap(),
        }
    }

    fn in_group(id: MessageId, group: i64, ts: &str) -> Message {
        Message {
            group_id: Some(group),
            receiver_id: None,
            ..direct(id, 2, 0, ts)
        }
    }

    #[test]
    fn stale_history_is_ignored() {
        let mut view = ConversationView::new();
        let first = view.select(ConversationTarget::user(2, "bob"));
        let second = view.select(ConversationTarget::group(5, "crew"));
        assert_ne!(first, second);

        assert!(!view.apply_history(first, Ok(vec![direct(1, 1, 2, "2025-03-01T10:00:00Z")])));
        assert!(view.messages().is_empty());
        assert!(view.is_loading());

        assert!(view.apply_history(second, Ok(vec![in_group(2, 5, "2025-03-01T10:00:00Z")])));
        assert_eq!(view.messages().len(), 1);
        assert!(!view.is_loading());
    }

    #[test]
    fn reselecting_the_same_target_invalidates_older_fetches() {
        let mut view = ConversationView::new();
        let first = view.select(ConversationTarget::group(5, "crew"));
        let again = view.select(ConversationTarget::group(5, "crew"));
        assert!(!view.is_current(first));
        assert!(view.is_current(again));
    }

    #[test]
    fn live_messages_for_other_conversations_are_dropped() {
        let mut view = ConversationView::new();
        view.select(ConversationTarget::user(2, "bob"));

        let to_carol = direct(1, 1, 3, "2025-03-01T10:00:00Z");
        let group = in_group(2, 5, "2025-03-01T10:00:00Z");
        let from_bob = direct(3, 2, 1, "2025-03-01T10:00:00Z");

        assert!(!view.on_live(LiveEvent::MessageCreate(to_carol)));
        assert!(!view.on_live(LiveEvent::MessageCreate(group)));
        assert!(view.on_live(LiveEvent::MessageCreate(from_bob)));
        assert_eq!(view.messages().len(), 1);
    }

    #[test]
    fn live_before_history_merges_without_duplicates() {
        let mut view = ConversationView::new();
        let ticket = view.select(ConversationTarget::group(5, "crew"));

        view.on_live(LiveEvent::MessageCreate(in_group(3, 5, "2025-03-01T10:03:00Z")));
        view.apply_history(
            ticket,
            Ok(vec![
                in_group(1, 5, "2025-03-01T10:01:00Z"),
                in_group(3, 5, "2025-03-01T10:03:00Z"),
            ]),
        );
        let ids: Vec<_> = view.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn sent_echo_is_not_duplicated() {
        let mut view = ConversationView::new();
        view.select(ConversationTarget::user(2, "bob"));
        let sent = direct(8, 1, 2, "2025-03-01T10:00:00Z");
        assert!(view.on_sent(sent.clone()));
        assert!(!view.on_live(LiveEvent::MessageCreate(sent)));
        assert_eq!(view.messages().len(), 1);
    }

    #[test]
    fn connection_state_tracks_only_the_selected_target() {
        let mut view = ConversationView::new();
        view.select(ConversationTarget::group(5, "crew"));
        assert!(!view.on_live(LiveEvent::Connected { target: TargetKey::Group(4) }));
        assert!(!view.is_connected());
        assert!(view.on_live(LiveEvent::Connected { target: TargetKey::Group(5) }));
        assert!(view.is_connected());
    }

    #[test]
    fn deleted_messages_stay_deleted_when_history_lands_late() {
        let mut view = ConversationView::new();
        let ticket = view.select(ConversationTarget::group(5, "crew"));

        view.on_live(LiveEvent::MessageCreate(in_group(1, 5, "2025-03-01T10:01:00Z")));
        assert_eq!(view.remove(1).map(|m| m.id), Some(1));

        view.apply_history(
            ticket,
            Ok(vec![
                in_group(1, 5, "2025-03-01T10:01:00Z"),
                in_group(2, 5, "2025-03-01T10:02:00Z"),
            ]),
        );
        let ids: Vec<_> = view.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2]);

        // a live echo of the deleted message is ignored too
        assert!(!view.on_live(LiveEvent::MessageCreate(in_group(1, 5, "2025-03-01T10:01:00Z"))));
    }

    #[test]
    fn deletions_are_forgotten_on_switch() {
        let mut view = ConversationView::new();
        view.select(ConversationTarget::group(5, "crew"));
        view.remove(1);

        let ticket = view.select(ConversationTarget::group(5, "crew"));
        view.apply_history(ticket, Ok(vec![in_group(1, 5, "2025-03-01T10:01:00Z")]));
        assert_eq!(view.messages().len(), 1);
    }

    #[test]
    fn history_errors_are_kept_inline() {
        let mut view = ConversationView::new();
        let ticket = view.select(ConversationTarget::group(5, "crew"));
        view.apply_history(ticket, Err("server returned 500".into()));
        assert_eq!(view.error(), Some("server returned 500"));
        assert!(!view.is_loading());

        view.select(ConversationTarget::group(6, "other"));
        assert_eq!(view.error(), None);
    }
}
