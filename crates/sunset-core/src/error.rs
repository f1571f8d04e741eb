//! エラー型
//!
//! レコード単位の失敗（[`MalformedRecord`]）は呼び出し側で数えて読み捨てる。
//! I/O と重み形状の失敗（[`SamplerError`], [`ExportError`]）は伝播して実行を止める。

use std::io;
use std::path::PathBuf;

/// 配置文字列（FEN の盤面部分）の解析エラー
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    #[error("placement must have 8 ranks, found {0}")]
    RankCount(usize),

    #[error("rank {rank} spans {files} files, expected 8")]
    RankWidth { rank: usize, files: usize },

    #[error("invalid placement character {0:?}")]
    InvalidChar(char),
}

/// 読み捨てるべきコーパス行
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedRecord {
    #[error("expected at least 3 '|'-separated fields, found {0}")]
    MissingDelimiter(usize),

    #[error("no metadata after the placement")]
    MissingMetadata,

    #[error("empty placement")]
    EmptyPlacement,

    #[error("score field {field} is not an integer: {value:?}")]
    InvalidScore { field: usize, value: String },

    #[error("invalid placement: {0}")]
    Placement(#[from] PlacementError),

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("line exceeds {0} bytes")]
    TooLong(usize),
}

/// コーパスの列挙・読み込みエラー（起動時に致命的）
#[derive(thiserror::Error, Debug)]
pub enum SamplerError {
    #[error("failed to read corpus {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no corpus files match {0:?}")]
    NoCorpus(String),

    #[error("invalid corpus pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },

    #[error("worker count must be at least 1")]
    NoWorkers,
}

impl SamplerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SamplerError::Io {
            path: path.into(),
            source,
        }
    }
}

/// 重み出力エラー
#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    /// 1次元/2次元に分類できない形状
    #[error("tensor {name} has unsupported shape {shape:?} (expected 1-D or 2-D)")]
    Shape { name: String, shape: Vec<usize> },

    #[error("tensor {name}: shape {shape:?} needs {expected} values, got {actual}")]
    LengthMismatch {
        name: String,
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("tensor {name} has a non-finite value at index {index}")]
    NonFinite { name: String, index: usize },

    #[error("tensor name {0:?} does not map to a valid identifier")]
    InvalidName(String),

    #[error("duplicate identifier {0}")]
    DuplicateName(String),

    #[error("layer {layer}: weights {weights:?} and biases {biases:?} do not form a layer")]
    LayerShape {
        layer: usize,
        weights: Vec<usize>,
        biases: Vec<usize>,
    },

    #[error("layer {layer}: value {value} at index {index} collides with a sentinel")]
    SentinelCollision { layer: usize, index: usize, value: f64 },

    /// 書き込み途中で中断されたアーティファクト
    #[error("artifact is truncated or corrupt: {0}")]
    Truncated(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result type for export operations
pub type ExportResult<T> = Result<T, ExportError>;
