//! ユーティリティ関数
//!
//! ログ初期化などアプリケーション横断の補助機能。

use std::path::Path;

use crate::config::{ConfigManager, LogConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// ローテーション済みログファイルの接頭辞
const LOG_FILE_PREFIX: &str = "shopdesk.log";

/// ログを初期化する
///
/// `RUST_LOG` が設定されていればそちらを優先し、無ければ設定ファイルの
/// ログレベルを使用する。ファイル出力が有効な場合は日次ローテーションで
/// 書き出し、返されたguardが破棄されるまでバックグラウンド書き込みが続く。
pub fn init_logging(config: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    if config.enable_file_logging {
        let log_dir = match &config.log_dir {
            Some(dir) => dir.clone(),
            None => ConfigManager::default_data_dir()?.join("logs"),
        };
        std::fs::create_dir_all(&log_dir)?;
        cleanup_old_logs(&log_dir, config.max_log_files as usize)?;

        let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false),
            )
            .try_init()?;

        tracing::info!("📝 File logging enabled: {}", log_dir.display());
        return Ok(Some(guard));
    }

    registry.try_init()?;
    Ok(None)
}

/// 保存上限を超えた古いログファイルを削除する。
/// 日次ローテーションの日付サフィックスは辞書順で時系列に並ぶ。
fn cleanup_old_logs(log_dir: &Path, max_files: usize) -> anyhow::Result<()> {
    let mut logs: Vec<_> = std::fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
        })
        .collect();

    if logs.len() <= max_files {
        return Ok(());
    }

    logs.sort();
    let excess = logs.len() - max_files;
    for path in logs.into_iter().take(excess) {
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!("Failed to remove old log '{}': {}", path.display(), e);
        } else {
            tracing::debug!("🧹 Removed old log file: {}", path.display());
        }
    }
    Ok(())
}
