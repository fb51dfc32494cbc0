use anyhow::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// ログ設定
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// ログレベル (trace, debug, info, warn, error)
    pub level: String,
    /// ログディレクトリ
    pub log_dir: PathBuf,
    /// コンソール出力有効
    pub console_enabled: bool,
    /// ファイル出力有効
    pub file_enabled: bool,
    /// ファイル出力をJSON形式にするか
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            console_enabled: true,
            file_enabled: false,
            json_format: true,
        }
    }
}

impl LogConfig {
    /// カスタムログディレクトリを設定
    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// コンソール出力制御
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console_enabled = enabled;
        self
    }

    /// ファイル出力制御
    pub fn with_file(mut self, enabled: bool) -> Self {
        self.file_enabled = enabled;
        self
    }
}

/// トレーシングを初期化
///
/// 返された `WorkerGuard` はプロセス終了までドロップしないこと。
/// ドロップするとバッファ済みログが失われる。
pub fn init_logging(config: &LogConfig) -> Result<Vec<WorkerGuard>> {
    let mut guards = Vec::new();
    let mut layers = Vec::new();

    if config.console_enabled {
        layers.push(fmt::layer().with_target(true).boxed());
    }

    if config.file_enabled {
        std::fs::create_dir_all(&config.log_dir)?;
        let appender = rolling::daily(&config.log_dir, "trustgate.log");
        let (writer, guard) = non_blocking(appender);
        guards.push(guard);

        let file_layer = if config.json_format {
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::layer().with_writer(writer).with_ansi(false).boxed()
        };
        layers.push(file_layer);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;

    Ok(guards)
}
