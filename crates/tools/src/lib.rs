//! sunset 評価関数の学習ツール群
//!
//! - [`config`]: TOML 設定ファイル
//! - [`nnue_trainer`]: モデル・オプティマイザ・ローダ・学習ループ・重み出力

pub mod config;
pub mod nnue_trainer;

pub use config::Config;
