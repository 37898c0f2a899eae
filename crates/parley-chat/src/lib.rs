pub mod directory;
pub mod driver;
pub mod timeline;
pub mod view;

pub use directory::{Directory, Listing};
pub use driver::{ChatBackend, ChatDriver, ChatError, ChatHandle, ViewSnapshot};
pub use timeline::{DaySection, Timeline, day_label};
pub use view::{ConversationView, FetchTicket};
