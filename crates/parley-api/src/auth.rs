use tracing::info;

use parley_session::token;
use parley_types::api::{LoginRequest, LoginResponse, RegisterRequest};
use parley_types::models::{Contact, CurrentUser};

use crate::client::ApiClient;
use crate::error::{ApiError, Result};

impl ApiClient {
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<Contact> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() || email.is_empty() || password.is_empty() {
            return Err(ApiError::Invalid(
                "username, email and password are required".into(),
            ));
        }

        let req = self.http().post(self.url("create_user/")?).json(&RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        });
        let resp = self.execute_public(req).await?;
        let user = resp.json::<Contact>().await?;

        info!("Registered {} ({})", user.username, user.id);
        Ok(user)
    }

    /// Exchange credentials for a token pair and persist the session.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || password.is_empty() {
            return Err(ApiError::Invalid("email and password are required".into()));
        }

        let req = self
            .http()
            .post(self.url("login/")?)
            .json(&LoginRequest {
                email,
                password: password.to_string(),
            });
        let resp = self.execute_public(req).await?;
        let login = resp.json::<LoginResponse>().await?;

        let session = self.session();
        session
            .store_login(
                login.access.clone(),
                login.refresh.clone(),
                login.username.clone(),
            )
            .map_err(|e| ApiError::Invalid(format!("cannot persist session: {}", e)))?;
        if let Some(user_id) = token::decode_claims(&login.access).ok().and_then(|c| c.user_id) {
            session.set_identity(login.username.clone(), Some(user_id));
        }

        info!("Logged in as {}", login.username);
        Ok(login)
    }

    /// Look up the authenticated user and record the identity in the session.
    pub async fn current_user(&self) -> Result<CurrentUser> {
        let mut user: CurrentUser = self.get_json("current_user/").await?;
        if user.id.is_none() {
            user.id = self.session().user_id();
        }
        self.session().set_identity(user.username.clone(), user.id);
        Ok(user)
    }

    pub fn logout(&self) {
        self.session().logout();
    }
}
