pub mod persistence; // 通知状態の永続化ミラー
pub mod stock; // 在庫アラートの突合とポーリング
pub mod store; // 通知ストア本体

pub use persistence::{FilePersistence, MemoryPersistence, NotificationPersistence};
pub use stock::{reconcile, ReconcileOutcome, StockPoller};
pub use store::NotificationStore;
