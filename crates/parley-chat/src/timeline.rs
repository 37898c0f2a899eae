use chrono::{Days, NaiveDate, TimeZone};

use parley_types::models::{Message, MessageId};

/// Messages of one conversation, ascending by timestamp, unique by id.
///
/// Equal timestamps keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    messages: Vec<Message>,
}

/// Consecutive messages sent on the same calendar day.
#[derive(Debug, Clone, PartialEq)]
pub struct DaySection<'a> {
    pub date: NaiveDate,
    pub label: String,
    pub messages: &'a [Message],
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message at its chronological position. Returns `false` if a
    /// message with the same id is already present.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.contains(message.id) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(at, message);
        true
    }

    /// Insert every message, returning how many were new.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        let mut added = 0;
        for message in messages {
            if self.insert(message) {
                added += 1;
            }
        }
        added
    }

    pub fn remove(&mut self, id: MessageId) -> Option<Message> {
        let pos = self.messages.iter().position(|m| m.id == id)?;
        Some(self.messages.remove(pos))
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Group messages into day sections, with days taken in `tz`.
    pub fn sections<Tz: TimeZone>(&self, tz: &Tz, today: NaiveDate) -> Vec<DaySection<'_>> {
        let mut sections = Vec::new();
        let mut start = 0;

        while start < self.messages.len() {
            let date = self.messages[start].timestamp.with_timezone(tz).date_naive();
            let len = self.messages[start..]
                .iter()
                .take_while(|m| m.timestamp.with_timezone(tz).date_naive() == date)
                .count();
            sections.push(DaySection {
                date,
                label: day_label(date, today),
                messages: &self.messages[start..start + len],
            });
            start += len;
        }
        sections
    }
}

/// "Today", "Yesterday", or e.g. "03 Mar 2025".
pub fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if today.checked_sub_days(Days::new(1)) == Some(date) {
        "Yesterday".to_string()
    } else {
        date.format("%d %b %Y").to_string()
    }
}
