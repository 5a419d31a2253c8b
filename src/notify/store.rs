//! 通知ストア
//!
//! チャット通知と在庫通知の2ストリームを保持し、未読数を導出する。
//! すべての変更操作は、リターン前に永続化ミラーをメモリ状態と一致させる
//! （ライトスルー）。タイマー由来とチャネル由来の変更が同じストアに
//! 交差するため、各操作はロック下の read-modify-write で完結させる。

use std::sync::Arc;

use chrono::Utc;

use crate::alert::{Alert, AlertKind, AlertSink};
use crate::api::channel::StockEvent;
use crate::models::{
    ChatMessage, Direction, MessageNotification, StockNotification, StockSnapshot,
};
use crate::notify::persistence::NotificationPersistence;
use crate::notify::stock::{reconcile, ReconcileOutcome};
use crate::ShopdeskResult;

/// チャット通知の保持上限（古いものから追い出す）
pub const MESSAGE_NOTIFICATION_CAP: usize = 50;
/// 在庫通知の保持上限
pub const STOCK_NOTIFICATION_CAP: usize = 100;

#[derive(Debug, Default)]
struct StoreState {
    messages: Vec<MessageNotification>,
    stock: Vec<StockNotification>,
    /// 閲覧者が管理者かどうか。falseに遷移した時点で全状態を破棄する。
    is_admin_viewer: bool,
}

impl StoreState {
    fn message_unread(&self) -> usize {
        self.messages.iter().filter(|n| !n.read).count()
    }

    fn stock_unread(&self) -> usize {
        self.stock.iter().filter(|n| !n.read).count()
    }
}

/// 通知ストア
///
/// グローバルな共有状態ではなく、明示的に所有されるハンドルとして生成し、
/// 利用側へ注入する。
pub struct NotificationStore {
    state: parking_lot::Mutex<StoreState>,
    persistence: Arc<dyn NotificationPersistence>,
    alerts: Arc<dyn AlertSink>,
}

impl NotificationStore {
    /// 永続化ミラーから状態を復元してストアを作成する
    pub fn load(
        persistence: Arc<dyn NotificationPersistence>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let messages = persistence.load_messages();
        let stock = persistence.load_stock();
        tracing::info!(
            "🔔 Notification store loaded: {} chat / {} stock entries",
            messages.len(),
            stock.len()
        );

        Self {
            state: parking_lot::Mutex::new(StoreState {
                messages,
                stock,
                is_admin_viewer: true,
            }),
            persistence,
            alerts,
        }
    }

    /// 閲覧者の管理者フラグを更新する。
    /// 管理者でなくなった場合は両配列と永続化ミラーを無条件に破棄する。
    pub fn set_admin_viewer(&self, is_admin: bool) -> ShopdeskResult<()> {
        let mut state = self.state.lock();
        let was_admin = state.is_admin_viewer;
        state.is_admin_viewer = is_admin;

        if was_admin && !is_admin {
            state.messages.clear();
            state.stock.clear();
            self.persistence.clear_messages()?;
            self.persistence.clear_stock()?;
            tracing::info!("🧹 Viewer is no longer admin, notification state cleared");
        }
        Ok(())
    }

    // --- チャット通知 ---

    /// 受信メッセージを通知として記録する。
    /// 顧客発（direction == user）のメッセージのみが対象。
    pub fn record_message(&self, msg: &ChatMessage) -> ShopdeskResult<()> {
        if msg.direction != Direction::User {
            return Ok(());
        }

        let alert = {
            let mut state = self.state.lock();
            if !state.is_admin_viewer {
                return Ok(());
            }

            let notification = MessageNotification::from_message(msg, Utc::now());
            let alert = Alert::chat(
                format!("New message from {}: {}", notification.sender, msg.text),
                msg.identity(),
            );

            state.messages.push(notification);
            // 上限超過分は最古から追い出す
            while state.messages.len() > MESSAGE_NOTIFICATION_CAP {
                state.messages.remove(0);
            }

            self.persistence.save_messages(&state.messages)?;
            alert
        };

        self.alerts.raise(alert);
        Ok(())
    }

    /// 1件を既読にする
    pub fn mark_read(&self, id: &str) -> ShopdeskResult<()> {
        let mut state = self.state.lock();
        if let Some(n) = state.messages.iter_mut().find(|n| n.id == id) {
            n.read = true;
        }
        self.persistence.save_messages(&state.messages)
    }

    /// すべてのチャット通知を既読にする
    pub fn mark_all_read(&self) -> ShopdeskResult<()> {
        let mut state = self.state.lock();
        for n in state.messages.iter_mut() {
            n.read = true;
        }
        self.persistence.save_messages(&state.messages)
    }

    /// チャット通知をすべて破棄し、永続化コピーも削除する
    pub fn clear_messages(&self) -> ShopdeskResult<()> {
        let mut state = self.state.lock();
        state.messages.clear();
        self.persistence.clear_messages()
    }

    /// チャット通知のスナップショットを取得
    pub fn messages(&self) -> Vec<MessageNotification> {
        self.state.lock().messages.clone()
    }

    /// チャット通知の未読数（0未満にならない）
    pub fn message_unread(&self) -> usize {
        self.state.lock().message_unread()
    }

    // --- 在庫通知 ---

    /// チャネル経由の在庫アラートプッシュを反映する。
    /// 同一商品の既存エントリが同じ種別なら数量とメッセージを更新し、
    /// 種別が異なるならそのまま保持する（突合と同じ規則）。
    pub fn record_stock_event(&self, evt: &StockEvent) -> ShopdeskResult<()> {
        let alert = {
            let mut state = self.state.lock();
            if !state.is_admin_viewer {
                return Ok(());
            }

            let mut alert = None;
            match state
                .stock
                .iter_mut()
                .find(|n| n.product_id == evt.product_id)
            {
                Some(existing) => {
                    if existing.kind == evt.kind {
                        existing.quantity = evt.quantity;
                        existing.message = evt.message.clone();
                    }
                }
                None => {
                    let notification = StockNotification {
                        id: format!("{}-{}", evt.product_id, Utc::now().timestamp_millis()),
                        kind: evt.kind,
                        product_id: evt.product_id.clone(),
                        product_name: evt.product_name.clone(),
                        product_image: evt.product_image.clone(),
                        message: evt.message.clone(),
                        quantity: evt.quantity,
                        time: evt.time,
                        read: false,
                    };
                    alert = Some(Alert::stock(alert_kind_for(&notification), evt.message.clone()));
                    state.stock.push(notification);
                    while state.stock.len() > STOCK_NOTIFICATION_CAP {
                        state.stock.remove(0);
                    }
                }
            }

            self.persistence.save_stock(&state.stock)?;
            alert
        };

        if let Some(alert) = alert {
            self.alerts.raise(alert);
        }
        Ok(())
    }

    /// 在庫スナップショットとの突合を実行し、正規集合を置き換える。
    /// 新規に生まれた通知それぞれについてアラートを上げる。
    pub fn reconcile_stock(&self, snapshot: &StockSnapshot) -> ShopdeskResult<ReconcileOutcome> {
        let outcome = {
            let mut state = self.state.lock();
            if !state.is_admin_viewer {
                return Ok(ReconcileOutcome::default());
            }

            let existing = std::mem::take(&mut state.stock);
            let outcome = reconcile(existing, snapshot, Utc::now());

            state.stock = outcome.entries.clone();
            while state.stock.len() > STOCK_NOTIFICATION_CAP {
                state.stock.remove(0);
            }

            self.persistence.save_stock(&state.stock)?;
            outcome
        };

        for created in &outcome.created {
            self.alerts
                .raise(Alert::stock(alert_kind_for(created), created.message.clone()));
        }

        if !outcome.created.is_empty() {
            tracing::info!(
                "📦 Stock reconciliation created {} new notification(s)",
                outcome.created.len()
            );
        }
        Ok(outcome)
    }

    /// 在庫通知を1件削除する
    pub fn delete_stock_notification(&self, id: &str) -> ShopdeskResult<()> {
        let mut state = self.state.lock();
        state.stock.retain(|n| n.id != id);
        self.persistence.save_stock(&state.stock)
    }

    /// 在庫通知を1件既読にする
    pub fn mark_stock_read(&self, id: &str) -> ShopdeskResult<()> {
        let mut state = self.state.lock();
        if let Some(n) = state.stock.iter_mut().find(|n| n.id == id) {
            n.read = true;
        }
        self.persistence.save_stock(&state.stock)
    }

    /// 在庫通知をすべて破棄し、永続化コピーも削除する
    pub fn clear_stock(&self) -> ShopdeskResult<()> {
        let mut state = self.state.lock();
        state.stock.clear();
        self.persistence.clear_stock()
    }

    /// 在庫通知のスナップショットを取得
    pub fn stock_notifications(&self) -> Vec<StockNotification> {
        self.state.lock().stock.clone()
    }

    /// 在庫通知の未読数（read == false の件数として再計算される）
    pub fn stock_unread(&self) -> usize {
        self.state.lock().stock_unread()
    }
}

fn alert_kind_for(notification: &StockNotification) -> AlertKind {
    match notification.kind {
        crate::models::StockAlertKind::OutOfStock => AlertKind::OutOfStock,
        crate::models::StockAlertKind::LowStock => AlertKind::LowStock,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{stock_alert_message, StockAlertKind};
    use crate::notify::persistence::MemoryPersistence;

    /// テスト用: 上がったアラートを記録するシンク
    #[derive(Default)]
    pub struct RecordingAlertSink {
        raised: parking_lot::Mutex<Vec<Alert>>,
    }

    impl RecordingAlertSink {
        pub fn raised(&self) -> Vec<Alert> {
            self.raised.lock().clone()
        }
    }

    impl AlertSink for RecordingAlertSink {
        fn raise(&self, alert: Alert) {
            self.raised.lock().push(alert);
        }
    }

    fn user_message(id: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: Some(id.to_string()),
            direction: Direction::User,
            text: text.to_string(),
            time: Utc::now(),
            email: Some("a@x.com".to_string()),
            guest_token: None,
        }
    }

    fn store_with_sink() -> (NotificationStore, Arc<MemoryPersistence>, Arc<RecordingAlertSink>) {
        let persistence = Arc::new(MemoryPersistence::new());
        let sink = Arc::new(RecordingAlertSink::default());
        let store = NotificationStore::load(persistence.clone(), sink.clone());
        (store, persistence, sink)
    }

    #[test]
    fn test_record_message_increments_unread_and_alerts() {
        let (store, persistence, sink) = store_with_sink();

        store.record_message(&user_message("m1", "Hello")).unwrap();

        assert_eq!(store.message_unread(), 1);
        assert_eq!(sink.raised().len(), 1);
        // ライトスルー: メモリとミラーが常に一致する
        assert_eq!(persistence.load_messages().len(), 1);
    }

    #[test]
    fn test_admin_messages_are_not_recorded() {
        let (store, _, sink) = store_with_sink();
        let mut msg = user_message("m1", "reply");
        msg.direction = Direction::Admin;

        store.record_message(&msg).unwrap();

        assert!(store.messages().is_empty());
        assert!(sink.raised().is_empty());
    }

    #[test]
    fn test_eviction_keeps_most_recent_fifty() {
        let (store, persistence, _) = store_with_sink();

        for i in 0..51 {
            store
                .record_message(&user_message(&format!("m{}", i), "hi"))
                .unwrap();
        }

        let messages = store.messages();
        assert_eq!(messages.len(), MESSAGE_NOTIFICATION_CAP);
        // 最古の m0 が追い出され、m1..m50 が残る
        assert_eq!(messages[0].id, "m1");
        assert_eq!(messages.last().unwrap().id, "m50");
        assert_eq!(persistence.load_messages().len(), MESSAGE_NOTIFICATION_CAP);
    }

    #[test]
    fn test_unread_counter_never_goes_negative() {
        let (store, _, _) = store_with_sink();
        store.record_message(&user_message("m1", "hi")).unwrap();

        store.mark_all_read().unwrap();
        assert_eq!(store.message_unread(), 0);

        // 既読済みをさらにmark_readしても0未満にはならない
        for _ in 0..5 {
            store.mark_read("m1").unwrap();
        }
        assert_eq!(store.message_unread(), 0);
    }

    #[test]
    fn test_clear_removes_persisted_copy() {
        let (store, persistence, _) = store_with_sink();
        store.record_message(&user_message("m1", "hi")).unwrap();

        store.clear_messages().unwrap();

        assert!(store.messages().is_empty());
        assert_eq!(store.message_unread(), 0);
        assert!(persistence.load_messages().is_empty());
    }

    #[test]
    fn test_admin_gate_clears_everything() {
        let (store, persistence, _) = store_with_sink();
        store.record_message(&user_message("m1", "hi")).unwrap();
        store
            .record_stock_event(&stock_event(StockAlertKind::OutOfStock, "p1", 0))
            .unwrap();

        store.set_admin_viewer(false).unwrap();

        assert!(store.messages().is_empty());
        assert!(store.stock_notifications().is_empty());
        assert!(persistence.load_messages().is_empty());
        assert!(persistence.load_stock().is_empty());

        // 非管理者の間は記録されない
        store.record_message(&user_message("m2", "hi")).unwrap();
        assert!(store.messages().is_empty());
    }

    fn stock_event(kind: StockAlertKind, product_id: &str, quantity: u32) -> StockEvent {
        StockEvent {
            kind,
            product_id: product_id.to_string(),
            product_name: "Shoe".to_string(),
            product_image: None,
            message: stock_alert_message(kind, "Shoe", quantity),
            quantity,
            time: Utc::now(),
        }
    }

    #[test]
    fn test_stock_event_insert_then_refresh() {
        let (store, _, sink) = store_with_sink();

        store
            .record_stock_event(&stock_event(StockAlertKind::LowStock, "p1", 5))
            .unwrap();
        assert_eq!(store.stock_unread(), 1);
        assert_eq!(sink.raised().len(), 1);

        // 同種別の再送は数量の更新のみ。新規アラートは上がらない。
        store
            .record_stock_event(&stock_event(StockAlertKind::LowStock, "p1", 2))
            .unwrap();
        let stock = store.stock_notifications();
        assert_eq!(stock.len(), 1);
        assert_eq!(stock[0].quantity, 2);
        assert_eq!(sink.raised().len(), 1);
    }

    #[test]
    fn test_stock_event_with_different_kind_leaves_entry_untouched() {
        let (store, _, _) = store_with_sink();
        store
            .record_stock_event(&stock_event(StockAlertKind::OutOfStock, "p1", 0))
            .unwrap();

        store
            .record_stock_event(&stock_event(StockAlertKind::LowStock, "p1", 3))
            .unwrap();

        let stock = store.stock_notifications();
        assert_eq!(stock.len(), 1);
        assert_eq!(stock[0].kind, StockAlertKind::OutOfStock);
        assert_eq!(stock[0].quantity, 0);
    }

    #[test]
    fn test_delete_stock_notification() {
        let (store, persistence, _) = store_with_sink();
        store
            .record_stock_event(&stock_event(StockAlertKind::OutOfStock, "p1", 0))
            .unwrap();
        let id = store.stock_notifications()[0].id.clone();

        store.delete_stock_notification(&id).unwrap();

        assert!(store.stock_notifications().is_empty());
        assert_eq!(store.stock_unread(), 0);
        assert!(persistence.load_stock().is_empty());
    }

    #[test]
    fn test_store_reloads_from_persistence() {
        let persistence = Arc::new(MemoryPersistence::new());
        let sink = Arc::new(RecordingAlertSink::default());
        {
            let store = NotificationStore::load(persistence.clone(), sink.clone());
            store.record_message(&user_message("m1", "hi")).unwrap();
        }

        // 再起動相当: 同じミラーから復元
        let store = NotificationStore::load(persistence, sink);
        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.message_unread(), 1);
    }
}
