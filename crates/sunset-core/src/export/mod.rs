//! 学習済みパラメータの出力
//!
//! - 名前付き定数宣言形式（主形式）: [`declaration`]
//! - センチネル区切りの平坦配列形式（`.npy`）: [`plain`]
//!
//! どちらも全テンソルを検証してから書き込みを始める。形状や値が不正な場合は
//! ファイルに触れずにエラーを返す。

pub mod declaration;
pub mod npy;
pub mod plain;
pub mod tensor;

pub use declaration::{ArtifactStatus, DIRECTIVE, inspect_declarations, render_declarations};
pub use plain::{BIAS_SENTINEL, PlainBlock, PlainLayer, WEIGHT_SENTINEL, parse_plain, render_plain};
pub use tensor::{ParameterTensor, TensorDims};

use crate::error::{ExportError, ExportResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// アーティファクトの形式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    #[default]
    Declarations,
    Plain,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "declarations" => Ok(ExportFormat::Declarations),
            "plain" => Ok(ExportFormat::Plain),
            _ => Err(format!("unknown export format {s:?} (expected declarations or plain)")),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Declarations => "declarations",
            ExportFormat::Plain => "plain",
        })
    }
}

/// 宣言形式の要素型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    #[default]
    F32,
    F64,
}

impl ElementType {
    pub const fn rust_name(self) -> &'static str {
        match self {
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
        }
    }
}

impl FromStr for ElementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "f32" => Ok(ElementType::F32),
            "f64" => Ok(ElementType::F64),
            _ => Err(format!("unknown element type {s:?} (expected f32 or f64)")),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rust_name())
    }
}

/// モデルの宣言順に並んだテンソル列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightArtifact {
    tensors: Vec<ParameterTensor>,
}

impl WeightArtifact {
    pub fn new(tensors: Vec<ParameterTensor>) -> Self {
        Self { tensors }
    }

    pub fn push(&mut self, tensor: ParameterTensor) {
        self.tensors.push(tensor);
    }

    pub fn tensors(&self) -> &[ParameterTensor] {
        &self.tensors
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn render_declarations(&self, element_type: ElementType) -> ExportResult<String> {
        declaration::render_declarations(&self.tensors, element_type)
    }

    /// (重み, バイアス) の順で並んだテンソルを層に組む
    pub fn plain_layers(&self) -> ExportResult<Vec<PlainLayer<'_>>> {
        if self.tensors.len() % 2 != 0 {
            let last = &self.tensors[self.tensors.len() - 1];
            return Err(ExportError::LayerShape {
                layer: self.tensors.len() / 2,
                weights: last.shape.clone(),
                biases: Vec::new(),
            });
        }
        Ok(self
            .tensors
            .chunks_exact(2)
            .map(|pair| PlainLayer {
                weights: &pair[0],
                biases: &pair[1],
            })
            .collect())
    }

    pub fn render_plain(&self) -> ExportResult<Vec<f64>> {
        plain::render_plain(&self.plain_layers()?)
    }

    /// 指定形式で書き出す（既存ファイルは切り詰める）
    pub fn write(
        &self,
        path: &Path,
        format: ExportFormat,
        element_type: ElementType,
    ) -> ExportResult<()> {
        match format {
            ExportFormat::Declarations => {
                declaration::write_declarations(path, &self.tensors, element_type)?
            }
            ExportFormat::Plain => {
                let values = self.render_plain()?;
                npy::write_f64_file(path, &values)?;
            }
        }
        log::debug!(
            "wrote {} tensors to {} ({format}, {element_type})",
            self.tensors.len(),
            path.display()
        );
        Ok(())
    }
}

/// 平坦形式のファイルを読み戻す
pub fn read_plain(path: &Path) -> ExportResult<Vec<PlainBlock>> {
    let values = npy::read_f64_file(path)?;
    parse_plain(&values)
}
