use reqwest::multipart::Form;
use tracing::{debug, info};

use parley_types::models::{Message, MessageId, TargetKey};

use crate::attachment::Attachment;
use crate::client::ApiClient;
use crate::error::{ApiError, Result};

/// Outgoing message: text, a file, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub text: Option<String>,
    pub file: Option<Attachment>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            file: None,
        }
    }

    /// Text with surrounding whitespace removed, if any remains.
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.trimmed_text().is_none() && self.file.is_none()
    }

    /// Text as typed, or `None` if it is blank.
    pub fn content(&self) -> Option<&str> {
        self.trimmed_text().and(self.text.as_deref())
    }

    fn form(&self, recipient: Option<i64>) -> Form {
        let mut form = Form::new();
        if let Some(id) = recipient {
            form = form.text("recipient_id", id.to_string());
        }
        if let Some(text) = self.content() {
            form = form.text("content", text.to_string());
        }
        if let Some(file) = &self.file {
            form = form.part("file", file.part());
        }
        form
    }
}

fn history_path(key: TargetKey) -> String {
    match key {
        TargetKey::User(id) => format!("messages/{}/", id),
        TargetKey::Group(id) => format!("groups/{}/messages/", id),
    }
}

impl ApiClient {
    /// Full history of one conversation, as ordered by the server.
    pub async fn history(&self, key: TargetKey) -> Result<Vec<Message>> {
        let messages: Vec<Message> = self.get_json(&history_path(key)).await?;
        debug!("Fetched {} messages for {}", messages.len(), key);
        Ok(messages)
    }

    /// Send to a user or group. Returns the message as the server stored it.
    pub async fn send_message(&self, key: TargetKey, draft: &Draft) -> Result<Message> {
        if draft.is_empty() {
            return Err(ApiError::Invalid(
                "a message needs text or a file".into(),
            ));
        }

        let (url, recipient) = match key {
            TargetKey::User(id) => (self.url("send_message/")?, Some(id)),
            TargetKey::Group(id) => (self.url(&format!("groups/{}/send_message/", id))?, None),
        };

        let resp = self
            .execute(|http| http.post(url.clone()).multipart(draft.form(recipient)))
            .await?;
        let message = resp.json::<Message>().await?;

        info!("Sent message {} to {}", message.id, key);
        Ok(message)
    }

    pub async fn delete_message(&self, id: MessageId) -> Result<()> {
        let url = self.url(&format!("delete_message/{}/", id))?;
        self.execute(|http| http.delete(url.clone())).await?;
        info!("Deleted message {}", id);
        Ok(())
    }
}
