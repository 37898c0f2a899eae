use serde::{Deserialize, Serialize};

use crate::models::UserId;

// -- JWT Claims --

/// Access-token claims the client reads. Only `exp` is required; the
/// signature is never verified client-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub exp: i64,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub token_type: Option<String>,
}

// -- Auth --

#[derive(Debug, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

/// The server may rotate refresh tokens, in which case `refresh` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Response of the profile picture upload.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfilePictureResponse {
    #[serde(default)]
    pub profile_picture: Option<String>,
}

// -- Groups --

#[derive(Debug, Serialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub members: Vec<UserId>,
}

#[derive(Debug, Serialize)]
pub struct AddMemberRequest {
    pub group_name: String,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct RemoveMemberRequest {
    pub user_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct DeleteGroupRequest {
    pub name: String,
}

// -- Errors --

/// Error bodies come in two shapes: `{"error": ...}` from the chat views and
/// `{"detail": "..."}` from the auth layer. `error` may be a string or a map
/// of field errors.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ErrorBody {
    pub fn message(&self) -> Option<String> {
        if let Some(detail) = &self.detail {
            return Some(detail.clone());
        }
        match &self.error {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        }
    }
}
