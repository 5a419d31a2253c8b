pub mod alert;
pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod utils;

// Re-export the main error types for convenience
pub use error::{ShopdeskError, ShopdeskResult};

// Re-export the transport layer
pub use api::{ChannelClient, ChannelOutbound, ConnectionState, RestClient, ServerEvent, StoreApi};

// Re-export the notification core
pub use notify::{FilePersistence, NotificationStore, StockPoller};

// Re-export the chat components
pub use chat::{AdminChatList, AdminChatWindow, ChatWidget, WidgetState};

// Re-export the alert abstraction
pub use alert::{Alert, AlertKind, AlertSink, TracingAlertSink};
