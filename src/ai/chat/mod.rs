mod core;
pub mod models;

pub use self::core::{CHAT_TIPS, ChatRole, RoleChat};
pub use models::Transcript;
