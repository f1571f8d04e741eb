//! sunset 評価関数の学習データ変換と重み出力
//!
//! 棋譜コーパスの1行を局面レコードに分解し、手番側視点の 768 次元特徴量へ
//! 変換する。学習済みパラメータは推論エンジンが読む固定レイアウトの
//! アーティファクトへ書き出す。
//!
//! - [`record`]: コーパス行のパース
//! - [`features`]: 特徴量エンコード
//! - [`sampler`]: ワーカーへのシャード割り当てとサンプル供給
//! - [`export`]: 重みのシリアライズ

pub mod board;
pub mod error;
pub mod export;
pub mod features;
pub mod record;
pub mod sample;
pub mod sampler;
pub mod types;

pub use board::Board;
pub use error::{ExportError, MalformedRecord, PlacementError, SamplerError};
pub use export::{ElementType, ExportFormat, ParameterTensor, WeightArtifact};
pub use features::{FEATURE_DIM, FeatureVector, encode, encode_board};
pub use record::PositionRecord;
pub use sample::{Sample, TARGET_SCALE, target_from_scores};
pub use sampler::{SampleSource, SamplingPolicy, ShardPlan, SourceStats};
pub use types::{Color, Piece, PieceType, Square};
