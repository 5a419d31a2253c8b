pub mod channel; // イベントチャネル（WebSocket）クライアント
pub mod rest; // REST APIクライアント

pub use channel::{
    ChannelClient, ChannelOutbound, ClientEvent, ConnectionState, ServerEvent, StockEvent,
    TypingState,
};
pub use rest::{RestClient, StoreApi};
