//! セッショントラスト監視
//!
//! 認証済みコンテキスト1つごとの実行時トラストスコアを管理します。

pub mod monitor;
pub mod types;

pub use monitor::SessionTrustMonitor;
pub use types::{MonitoredSession, RiskFactor, SessionId, SessionStatus};
