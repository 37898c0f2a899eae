use reqwest::multipart::Form;
use tracing::info;

use parley_types::api::ProfilePictureResponse;
use parley_types::models::Contact;

use crate::attachment::Attachment;
use crate::client::ApiClient;
use crate::error::Result;

impl ApiClient {
    /// Every other registered user, with their last-message summary.
    pub async fn users(&self) -> Result<Vec<Contact>> {
        self.get_json("users/").await
    }

    /// Upload a new avatar. Returns its URL when the server reports one.
    pub async fn update_profile_picture(&self, picture: &Attachment) -> Result<Option<String>> {
        let url = self.url("update_profile_picture/")?;
        let resp = self
            .execute(|http| {
                http.post(url.clone())
                    .multipart(Form::new().part("profile_picture", picture.part()))
            })
            .await?;
        let body = resp.json::<ProfilePictureResponse>().await?;

        info!("Updated profile picture");
        Ok(body.profile_picture)
    }
}
