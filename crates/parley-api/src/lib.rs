pub mod attachment;
pub mod auth;
pub mod client;
pub mod error;
pub mod groups;
pub mod messages;
pub mod refresh;
pub mod users;

pub use attachment::Attachment;
pub use client::{ApiClient, parse_base_url};
pub use error::{ApiError, Result};
pub use messages::Draft;
pub use refresh::{RefreshCoordinator, RefreshError, TokenRefresher};
