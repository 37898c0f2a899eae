use chrono::{Local, TimeZone};

use parley_chat::{Listing, Timeline};
use parley_types::models::{Contact, Group, Message, UserId};

/// One chat line: `[10:03] bob: hello  #41`.
pub fn message_line<Tz: TimeZone>(message: &Message, me: Option<UserId>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let time = message.timestamp.with_timezone(tz).format("%H:%M");
    let sender = match (me, message.sender_username.as_deref()) {
        (Some(me), _) if message.is_from(me) => "you".to_string(),
        (_, Some(name)) => name.to_string(),
        (_, None) => format!("user {}", message.sender_id),
    };

    let mut body = message.content.clone().unwrap_or_default();
    if let Some(url) = &message.file_url {
        let kind = if message.has_image() { "image" } else { "file" };
        if !body.is_empty() {
            body.push(' ');
        }
        body.push_str(&format!("[{}: {}]", kind, url));
    }

    format!("[{}] {}: {}  #{}", time, sender, body, message.id)
}

/// The whole timeline with a header line per day.
pub fn timeline_lines(timeline: &Timeline, me: Option<UserId>) -> Vec<String> {
    let today = Local::now().date_naive();
    let mut lines = Vec::new();
    for section in timeline.sections(&Local, today) {
        lines.push(format!("── {} ──", section.label));
        lines.extend(section.messages.iter().map(|m| message_line(m, me, &Local)));
    }
    lines
}

pub fn contact_line(contact: &Contact) -> String {
    let last = contact
        .last_message
        .as_ref()
        .and_then(|m| m.text.as_deref())
        .unwrap_or("");
    if last.is_empty() {
        format!("{:>5}  {}", contact.id, contact.username)
    } else {
        format!("{:>5}  {:<20} {}", contact.id, contact.username, last)
    }
}

pub fn group_line(group: &Group) -> String {
    format!("{:>5}  {} ({} members)", group.id, group.name, group.members.len())
}

/// Sidebar search results: contacts, then groups.
pub fn listing_lines(listing: &Listing<'_>) -> Vec<String> {
    let mut lines = Vec::new();
    if listing.contacts.is_empty() {
        lines.push("No contacts found.".to_string());
    }
    lines.extend(listing.contacts.iter().map(|c| contact_line(c)));
    if !listing.groups.is_empty() {
        lines.push("Groups:".to_string());
        lines.extend(listing.groups.iter().map(|g| group_line(g)));
    }
    lines
}
