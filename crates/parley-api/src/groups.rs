use reqwest::multipart::Form;
use tracing::info;

use parley_types::api::{AddMemberRequest, CreateGroupRequest, DeleteGroupRequest, RemoveMemberRequest};
use parley_types::models::{Group, GroupId, UserId};

use crate::attachment::Attachment;
use crate::client::ApiClient;
use crate::error::{ApiError, Result};

fn require_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::Invalid("group name cannot be empty".into()));
    }
    Ok(name)
}

impl ApiClient {
    /// All groups visible to the user, optionally narrowed by exact name.
    pub async fn groups(&self, name: Option<&str>) -> Result<Vec<Group>> {
        let mut url = self.url("groups/")?;
        if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
            url.query_pairs_mut().append_pair("name", name);
        }
        let resp = self.execute(|http| http.get(url.clone())).await?;
        Ok(resp.json::<Vec<Group>>().await?)
    }

    /// Resolve a group by name, as the admin forms do before acting on it.
    pub async fn find_group(&self, name: &str) -> Result<Option<Group>> {
        let name = require_name(name)?;
        let groups = self.groups(Some(name)).await?;
        Ok(groups.into_iter().find(|g| g.name == name))
    }

    pub async fn create_group(&self, name: &str, members: &[UserId]) -> Result<Group> {
        let name = require_name(name)?;
        if members.is_empty() {
            return Err(ApiError::Invalid("select at least one member".into()));
        }

        let url = self.url("groups/create/")?;
        let body = CreateGroupRequest {
            name: name.to_string(),
            members: members.to_vec(),
        };
        let resp = self.execute(|http| http.post(url.clone()).json(&body)).await?;
        let group = resp.json::<Group>().await?;

        info!("Created group {} ({}) with {} members", group.name, group.id, members.len());
        Ok(group)
    }

    pub async fn add_member(&self, group_name: &str, username: &str) -> Result<()> {
        let group_name = require_name(group_name)?;
        let username = username.trim();
        if username.is_empty() {
            return Err(ApiError::Invalid("select a user to add".into()));
        }

        let url = self.url("groups/add_user/")?;
        let body = AddMemberRequest {
            group_name: group_name.to_string(),
            username: username.to_string(),
        };
        self.execute(|http| http.post(url.clone()).json(&body)).await?;

        info!("Added {} to group {}", username, group_name);
        Ok(())
    }

    pub async fn remove_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        let url = self.url(&format!("groups/{}/remove_user/", group_id))?;
        let body = RemoveMemberRequest { user_id };
        self.execute(|http| http.delete(url.clone()).json(&body)).await?;

        info!("Removed user {} from group {}", user_id, group_id);
        Ok(())
    }

    pub async fn delete_group(&self, name: &str) -> Result<()> {
        let name = require_name(name)?;
        let url = self.url("groups/delete/")?;
        let body = DeleteGroupRequest {
            name: name.to_string(),
        };
        self.execute(|http| http.delete(url.clone()).json(&body)).await?;

        info!("Deleted group {}", name);
        Ok(())
    }

    pub async fn update_group_icon(&self, group_id: GroupId, icon: &Attachment) -> Result<()> {
        let url = self.url(&format!("groups/{}/update_icon/", group_id))?;
        self.execute(|http| {
            http.post(url.clone())
                .multipart(Form::new().part("icon", icon.part()))
        })
        .await?;

        info!("Updated icon of group {}", group_id);
        Ok(())
    }
}
