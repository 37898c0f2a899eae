use parley_api::{ApiClient, ApiError};
use parley_types::models::{Contact, Group};

/// Sidebar listing of direct-message contacts and groups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directory {
    contacts: Vec<Contact>,
    groups: Vec<Group>,
}

/// Entries matching a search, borrowed from the directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing<'a> {
    pub contacts: Vec<&'a Contact>,
    pub groups: Vec<&'a Group>,
}

impl Directory {
    /// Build a directory, leaving out the signed-in user.
    pub fn new(contacts: Vec<Contact>, groups: Vec<Group>, current_username: Option<&str>) -> Self {
        let contacts = contacts
            .into_iter()
            .filter(|c| Some(c.username.as_str()) != current_username)
            .collect();
        Self { contacts, groups }
    }

    pub async fn load(api: &ApiClient) -> Result<Self, ApiError> {
        let contacts = api.users().await?;
        let groups = api.groups(None).await?;
        let me = api.session().username();
        Ok(Self::new(contacts, groups, me.as_deref()))
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn search(&self, query: &str) -> Listing<'_> {
        Listing {
            contacts: self
                .contacts
                .iter()
                .filter(|c| matches(&c.username, query))
                .collect(),
            groups: self
                .groups
                .iter()
                .filter(|g| matches(&g.name, query))
                .collect(),
        }
    }

    pub fn find_contact(&self, username: &str) -> Option<&Contact> {
        self.contacts
            .iter()
            .find(|c| c.username.eq_ignore_ascii_case(username.trim()))
    }

    pub fn find_group(&self, name: &str) -> Option<&Group> {
        self.groups
            .iter()
            .find(|g| g.name.eq_ignore_ascii_case(name.trim()))
    }
}

/// Case-insensitive substring match; an empty query matches everything.
pub fn matches(haystack: &str, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    query.is_empty() || haystack.to_lowercase().contains(&query)
}
