//! アプリケーション設定管理モジュール
//!
//! XDGディレクトリを使用した設定ファイルの永続化と管理を提供します。

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// サーバー接続設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// REST APIのベースURL
    pub base_url: String,
    /// イベントチャネル（WebSocket）のURL。未設定ならbase_urlから導出。
    #[serde(default)]
    pub channel_url: Option<String>,
    /// HTTPリクエストのタイムアウト（秒）
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            channel_url: None,
            request_timeout_secs: 15,
        }
    }
}

impl ServerConfig {
    /// チャネルURLを解決する（未設定ならbase_urlのスキームを差し替え）
    pub fn resolved_channel_url(&self) -> String {
        if let Some(url) = &self.channel_url {
            return url.clone();
        }
        let ws = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/socket", ws.trim_end_matches('/'))
    }
}

/// 在庫アラート設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockConfig {
    /// 在庫突合の実行間隔（秒）
    pub poll_interval_secs: u64,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            // 5分間隔。起動直後にも1回即時実行される。
            poll_interval_secs: 300,
        }
    }
}

/// ログ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// カスタムログディレクトリ（Noneの場合はXDGデフォルト使用）
    pub log_dir: Option<PathBuf>,
    /// ログレベル (trace/debug/info/warn/error)
    pub log_level: String,
    /// ファイル出力有効化
    pub enable_file_logging: bool,
    /// 保存するログファイル数上限
    pub max_log_files: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_level: "info".to_string(),
            enable_file_logging: false,
            max_log_files: 30,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// サーバー接続設定
    #[serde(default)]
    pub server: ServerConfig,

    /// 在庫アラート設定
    #[serde(default)]
    pub stock: StockConfig,

    /// 通知状態の保存先（Noneの場合はXDGデータディレクトリ）
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// ログ設定
    #[serde(default)]
    pub log: LogConfig,
}

/// 設定管理マネージャー
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// 新しい設定マネージャーを作成
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        // 設定ディレクトリを作成（存在しない場合）
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        Ok(Self { config_path })
    }

    /// XDGディレクトリに基づく設定ファイルパスを取得
    fn get_config_path() -> Result<PathBuf> {
        let project_dirs = Self::project_dirs()?;
        let config_file = project_dirs.config_dir().join("config.toml");

        debug!("Config file path: {}", config_file.display());

        Ok(config_file)
    }

    /// プロジェクトディレクトリを取得
    pub fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("dev", "sifyfy", "shopdesk")
            .context("Failed to get project directories")
    }

    /// 通知状態のデフォルト保存先（XDGデータディレクトリ）
    pub fn default_data_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// 設定を読み込み
    pub fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!(
                "Config file not found, using default settings: {}",
                self.config_path.display()
            );
            return Ok(AppConfig::default());
        }

        let config_content = fs::read_to_string(&self.config_path).with_context(|| {
            format!("Failed to read config file: {}", self.config_path.display())
        })?;

        let config: AppConfig = toml::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse config file: {}",
                self.config_path.display()
            )
        })?;

        info!(
            "✅ Configuration loaded from: {}",
            self.config_path.display()
        );

        Ok(config)
    }

    /// 設定を保存
    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        let config_content =
            toml::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(&self.config_path, config_content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;

        info!("💾 Configuration saved to: {}", self.config_path.display());

        Ok(())
    }
}
