//! 評価関数の学習モジュール
//!
//! `768 -> hidden... -> 1` の全結合ネットワークを学習する。
//!
//! # 構成
//! - `network`: 学習可能なネットワーク構造（f32重み）
//! - `optimizer`: Adamオプティマイザ
//! - `checkpoint`: モデル状態の保存と復元
//! - `dataset`: ワーカースレッドによるサンプル供給
//! - `trainer`: 学習ループ
//! - `export`: 重みアーティファクトの書き出し
//! - `logging`: 構造化JSONログ

pub mod checkpoint;
pub mod dataset;
pub mod export;
pub mod logging;
pub mod network;
pub mod optimizer;
pub mod trainer;

pub use checkpoint::ModelState;
pub use dataset::SampleLoader;
pub use export::{check_existing_artifact, export_checkpoint, export_network};
pub use logging::StructuredLogger;
pub use network::TrainableNetwork;
pub use optimizer::{Adam, Optimizer};
pub use trainer::{LossType, TrainConfig, TrainSummary, Trainer};
