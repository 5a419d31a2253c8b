pub mod admin; // 管理者側チャットウィンドウ
pub mod roster; // 管理者側セッション一覧
pub mod widget; // 顧客側チャットウィジェット

pub use admin::AdminChatWindow;
pub use roster::{AdminChatList, ChatSessionEntry};
pub use widget::{ChatWidget, WidgetState};

/// キー入力が止まってから「タイピング停止」を送るまでの猶予
pub const TYPING_STOP_DELAY: std::time::Duration = std::time::Duration::from_secs(2);
