//! 通知状態の永続化ミラー
//!
//! 通知ストアの2配列をJSONファイルとしてミラーする。再起動時は
//! サーバーへの問い合わせなしにここから状態を復元する。
//! 壊れたJSONは警告を出して空として扱う（起動を止めない）。

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::models::{MessageNotification, StockNotification};
use crate::{ShopdeskError, ShopdeskResult};

/// チャット通知の永続化キー
pub const MESSAGES_KEY: &str = "adminNotifications";
/// 在庫通知の永続化キー
pub const STOCK_KEY: &str = "stockNotifications";

/// 通知状態の永続化面
pub trait NotificationPersistence: Send + Sync {
    fn load_messages(&self) -> Vec<MessageNotification>;
    fn load_stock(&self) -> Vec<StockNotification>;
    fn save_messages(&self, items: &[MessageNotification]) -> ShopdeskResult<()>;
    fn save_stock(&self, items: &[StockNotification]) -> ShopdeskResult<()>;
    fn clear_messages(&self) -> ShopdeskResult<()>;
    fn clear_stock(&self) -> ShopdeskResult<()>;
}

/// JSONファイルベースの実装
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    /// 指定ディレクトリ配下にミラーを置く
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// JSON配列を読み込む。ファイル欠如・破損は空扱い。
    fn load_array<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let path = self.path_for(key);
        if !path.exists() {
            return Vec::new();
        }

        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to read '{}', treating as empty: {}", key, e);
                return Vec::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("Corrupt persisted state for '{}', treating as empty: {}", key, e);
                Vec::new()
            }
        }
    }

    /// JSON配列を書き出す（ライトスルー）
    fn save_array<T: Serialize>(&self, key: &str, items: &[T]) -> ShopdeskResult<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| ShopdeskError::persistence(key, e.to_string()))?;

        let json = serde_json::to_string(items)?;
        fs::write(self.path_for(key), json)
            .map_err(|e| ShopdeskError::persistence(key, e.to_string()))
    }

    fn remove(&self, key: &str) -> ShopdeskResult<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| ShopdeskError::persistence(key, e.to_string()))?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl NotificationPersistence for FilePersistence {
    fn load_messages(&self) -> Vec<MessageNotification> {
        self.load_array(MESSAGES_KEY)
    }

    fn load_stock(&self) -> Vec<StockNotification> {
        self.load_array(STOCK_KEY)
    }

    fn save_messages(&self, items: &[MessageNotification]) -> ShopdeskResult<()> {
        self.save_array(MESSAGES_KEY, items)
    }

    fn save_stock(&self, items: &[StockNotification]) -> ShopdeskResult<()> {
        self.save_array(STOCK_KEY, items)
    }

    fn clear_messages(&self) -> ShopdeskResult<()> {
        self.remove(MESSAGES_KEY)
    }

    fn clear_stock(&self) -> ShopdeskResult<()> {
        self.remove(STOCK_KEY)
    }
}

/// インメモリ実装（テストおよび永続化不要なホスト向け）
#[derive(Default)]
pub struct MemoryPersistence {
    messages: parking_lot::Mutex<Vec<MessageNotification>>,
    stock: parking_lot::Mutex<Vec<StockNotification>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationPersistence for MemoryPersistence {
    fn load_messages(&self) -> Vec<MessageNotification> {
        self.messages.lock().clone()
    }

    fn load_stock(&self) -> Vec<StockNotification> {
        self.stock.lock().clone()
    }

    fn save_messages(&self, items: &[MessageNotification]) -> ShopdeskResult<()> {
        *self.messages.lock() = items.to_vec();
        Ok(())
    }

    fn save_stock(&self, items: &[StockNotification]) -> ShopdeskResult<()> {
        *self.stock.lock() = items.to_vec();
        Ok(())
    }

    fn clear_messages(&self) -> ShopdeskResult<()> {
        self.messages.lock().clear();
        Ok(())
    }

    fn clear_stock(&self) -> ShopdeskResult<()> {
        self.stock.lock().clear();
        Ok(())
    }
}
