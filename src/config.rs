//! エンジン設定
//!
//! 各コンポーネントの閾値・ウィンドウ設定を一元管理します。
//! デフォルト値 → 設定ファイル → 環境変数（TRUSTGATE_ プレフィックス）の
//! 順で上書きされます。

use serde::{Deserialize, Serialize};

/// トラストエンジン全体の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// セッショントラスト監視の設定
    pub session: SessionConfig,
    /// 行動プロファイル照合の設定
    pub behavior: BehaviorConfig,
    /// ポリシー決定ポイントの設定
    pub policy: PolicyConfig,
}

/// セッショントラスト監視の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// セッション有効とみなす最小トラストスコア
    pub min_valid_score: u8,
    /// 追加検証を要求するスコア閾値
    pub step_up_threshold: u8,
    /// 追加検証を要求するリスク要因数
    pub max_risk_factors: usize,
    /// 長期セッションとみなす日数
    pub max_session_age_days: i64,
}

/// 行動プロファイル照合の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    /// 一致と判定する総合スコア閾値
    pub match_threshold: f64,
    /// 異常として記録するスコア閾値
    pub anomaly_threshold: f64,
    /// 検証に必要な完了済み登録セッション数
    pub min_enrollment_sessions: u32,
    /// 検証に必要なキーストロークパターン数
    pub min_keystroke_patterns: usize,
    /// 検証に必要なモーションパターン数
    pub min_motion_patterns: usize,
}

/// ポリシー決定ポイントの設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// 拒否フィードバックの監視ウィンドウ（分）
    pub denial_window_minutes: i64,
    /// トラストレベル強制降格までの拒否回数
    pub denial_threshold: usize,
    /// トラスト信号の評価ウィンドウ（日）
    pub signal_window_days: i64,
    /// ホット集約が保持する信号・イベント・リクエストの上限
    pub max_hot_entries: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_valid_score: 20,
            step_up_threshold: 50,
            max_risk_factors: 3,
            max_session_age_days: 7,
        }
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            match_threshold: 70.0,
            anomaly_threshold: 50.0,
            min_enrollment_sessions: 3,
            min_keystroke_patterns: 10,
            min_motion_patterns: 5,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            denial_window_minutes: 60,
            denial_threshold: 5,
            signal_window_days: 7,
            max_hot_entries: 10000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            behavior: BehaviorConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// 設定ファイルから読み込み、環境変数で上書き
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = config::Config::builder();

        // デフォルト値を設定
        let default_config = EngineConfig::default();
        settings = settings.add_source(config::Config::try_from(&default_config)?);

        // 設定ファイルを読み込み（複数の場所を試行）
        let config_paths = [
            "trustgate.toml",
            "config.toml",
            "config/trustgate.toml",
        ];

        for path in &config_paths {
            if std::path::Path::new(path).exists() {
                settings = settings.add_source(config::File::with_name(path));
                break;
            }
        }

        // 環境変数で上書き (TRUSTGATE_で始まる変数)
        settings = settings.add_source(
            config::Environment::with_prefix("TRUSTGATE")
                .separator("_")
                .try_parsing(true),
        );

        let config: EngineConfig = settings.build()?.try_deserialize()?;
        Ok(config)
    }
}
