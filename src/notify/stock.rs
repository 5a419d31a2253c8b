//! 在庫アラートの突合とポーリング
//!
//! サーバーが返す在庫切れ/在庫僅少スナップショットを既存の在庫通知集合と
//! 突き合わせ、純増分だけを新規通知として生み出す。ポーリングは起動時に
//! 1回即時実行され、以後は固定間隔で繰り返される。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::api::rest::StoreApi;
use crate::models::{stock_alert_message, StockAlertKind, StockNotification, StockSnapshot};
use crate::notify::store::NotificationStore;

/// 突合1回分の結果
#[derive(Debug, Default, Clone)]
pub struct ReconcileOutcome {
    /// 置き換え後の正規集合
    pub entries: Vec<StockNotification>,
    /// このパスで新規に生まれた通知（アラート対象）
    pub created: Vec<StockNotification>,
}

/// 既存の在庫通知集合をスナップショットと突合する。
///
/// 規則:
/// - 在庫切れリストの商品: 既存エントリがあればそのまま引き継ぎ、
///   無ければ数量0の `out_of_stock` 通知を合成する。
/// - 在庫僅少リストの商品: 既存エントリが `low_stock` なら数量と
///   メッセージをその場で更新し、種別が異なるならそのまま引き継ぐ。
///   無ければ `low_stock` 通知を合成する。
/// - どちらのリストにも現れなかった既存エントリは手を付けずに残す。
///   在庫が回復した商品の通知も管理者が明示削除するまで残り続ける
///   （ストアフロントの現行挙動をそのまま維持している）。
/// - 商品1件につき高々1エントリ。既存マップは両ループで共有される。
pub fn reconcile(
    existing: Vec<StockNotification>,
    snapshot: &StockSnapshot,
    now: DateTime<Utc>,
) -> ReconcileOutcome {
    // 既存エントリを productId で引けるようにする。取り出した枠はNoneになり、
    // 未処理のまま残った枠が最後にそのまま引き継がれる。
    let mut slots: Vec<Option<StockNotification>> = existing.into_iter().map(Some).collect();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, slot) in slots.iter().enumerate() {
        if let Some(n) = slot.as_ref() {
            // 万一重複があった場合は先勝ち
            index.entry(n.product_id.clone()).or_insert(i);
        }
    }

    let mut next = Vec::new();
    let mut created = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for product in &snapshot.out_of_stock {
        if !seen.insert(product.id.as_str()) {
            continue;
        }
        match index.get(&product.id).and_then(|&i| slots[i].take()) {
            // 既存エントリはそのまま引き継ぐ
            Some(entry) => next.push(entry),
            None => {
                let n = StockNotification::synthesize(StockAlertKind::OutOfStock, product, now);
                created.push(n.clone());
                next.push(n);
            }
        }
    }

    for product in &snapshot.low_stock {
        if !seen.insert(product.id.as_str()) {
            // 同一パス内で既に処理済みの商品は二重登録しない
            continue;
        }
        match index.get(&product.id).and_then(|&i| slots[i].take()) {
            Some(mut entry) => {
                if entry.kind == StockAlertKind::LowStock {
                    entry.quantity = product.quantity;
                    entry.message =
                        stock_alert_message(StockAlertKind::LowStock, &product.name, product.quantity);
                }
                next.push(entry);
            }
            None => {
                let n = StockNotification::synthesize(StockAlertKind::LowStock, product, now);
                created.push(n.clone());
                next.push(n);
            }
        }
    }

    // 今回のスナップショットに現れなかった既存エントリを最後に引き継ぐ
    for slot in slots {
        if let Some(entry) = slot {
            next.push(entry);
        }
    }

    ReconcileOutcome { entries: next, created }
}

/// 在庫アラートポーラー
///
/// 開始時に1回即時に突合し、以後は設定間隔で繰り返す。
/// 取得失敗時はそのパス全体を中止して既存状態を保ち、次回に再開する。
pub struct StockPoller {
    store: Arc<NotificationStore>,
    api: Arc<dyn StoreApi>,
    interval: Duration,
    cancel: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
}

impl StockPoller {
    /// 新しいポーラーを作成
    pub fn new(store: Arc<NotificationStore>, api: Arc<dyn StoreApi>, interval: Duration) -> Self {
        Self {
            store,
            api,
            interval,
            cancel: parking_lot::Mutex::new(None),
        }
    }

    /// ポーリングを開始する。既に動いている場合は前のタスクをキャンセルする。
    pub fn start(&self) {
        self.stop();

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        *self.cancel.lock() = Some(cancel_tx);

        let store = Arc::clone(&self.store);
        let api = Arc::clone(&self.api);
        let interval = self.interval;

        tokio::spawn(async move {
            tracing::info!(
                "⏱️ Stock poller started (interval: {}s)",
                interval.as_secs()
            );

            // 起動直後に1回即時実行
            Self::run_pass(&store, api.as_ref()).await;

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        Self::run_pass(&store, api.as_ref()).await;
                    }
                    _ = &mut cancel_rx => {
                        tracing::info!("⏱️ Stock poller cancelled");
                        return;
                    }
                }
            }
        });
    }

    /// ポーリングを停止する
    pub fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            let _ = cancel.send(());
        }
    }

    /// 突合1パスを実行する。あらゆる失敗はログに留め、ホストを落とさない。
    async fn run_pass(store: &NotificationStore, api: &dyn StoreApi) {
        let snapshot = match api.fetch_stock_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // 部分適用はしない。前回の正規集合を保ったまま次回へ。
                tracing::warn!("Stock snapshot fetch failed, skipping pass: {}", e);
                return;
            }
        };

        if let Err(e) = store.reconcile_stock(&snapshot) {
            tracing::warn!("Stock reconciliation failed to persist: {}", e);
        }
    }
}

impl Drop for StockPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
