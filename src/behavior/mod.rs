//! 行動プロファイル照合
//!
//! 対象が入力デバイスをどう物理的に操作するかの統計的ベースラインを
//! 維持し、新しいサンプルとの一致度を採点します。結果はトラスト信号
//! としてポリシー決定ポイントへ還流します。

pub mod matcher;
pub mod profile;
pub mod sample;

pub use matcher::BehaviorMatcher;
pub use profile::{
    AnomalyDetection, BehavioralProfile, BehavioralSession, ProfileStatus, VerificationOutcome,
};
pub use sample::{KeystrokeEvent, KeystrokePattern, MotionEvent, MotionPattern, SampleOrigin};
