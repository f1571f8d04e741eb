//! 名前付きパラメータテンソル

use crate::error::{ExportError, ExportResult};

/// 1次元（バイアス）または2次元（重み行列）の学習済みパラメータ
///
/// `data` は行優先。形状は明示的に持つので長さ 0 の次元も区別できる。
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// 形状から決まる出力時の次元
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorDims {
    Vector(usize),
    Matrix { rows: usize, cols: usize },
}

impl ParameterTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            data,
        }
    }

    pub fn vector(name: impl Into<String>, data: Vec<f32>) -> Self {
        let len = data.len();
        Self::new(name, vec![len], data)
    }

    pub fn matrix(name: impl Into<String>, rows: usize, cols: usize, data: Vec<f32>) -> Self {
        Self::new(name, vec![rows, cols], data)
    }

    /// 形状を検証して次元を返す
    pub fn dims(&self) -> ExportResult<TensorDims> {
        let dims = match self.shape.as_slice() {
            &[len] => TensorDims::Vector(len),
            &[rows, cols] => TensorDims::Matrix { rows, cols },
            _ => {
                return Err(ExportError::Shape {
                    name: self.name.clone(),
                    shape: self.shape.clone(),
                });
            }
        };
        let expected = match dims {
            TensorDims::Vector(len) => Some(len),
            TensorDims::Matrix { rows, cols } => rows.checked_mul(cols),
        };
        if expected != Some(self.data.len()) {
            return Err(ExportError::LengthMismatch {
                name: self.name.clone(),
                shape: self.shape.clone(),
                expected: expected.unwrap_or(usize::MAX),
                actual: self.data.len(),
            });
        }
        Ok(dims)
    }

    /// NaN / 無限大を含まないことを確認
    pub fn check_finite(&self) -> ExportResult<()> {
        match self.data.iter().position(|v| !v.is_finite()) {
            Some(index) => Err(ExportError::NonFinite {
                name: self.name.clone(),
                index,
            }),
            None => Ok(()),
        }
    }

    /// 宣言名（英数字以外を `_` に置換して大文字化）
    pub fn identifier(&self) -> ExportResult<String> {
        identifier(&self.name)
    }
}

/// テンソル名を定数名へ変換する
///
/// `fc0.weight` -> `FC0_WEIGHT`。空や数字始まりになる名前はエラー。
pub fn identifier(name: &str) -> ExportResult<String> {
    let ident: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    match ident.chars().next() {
        None => Err(ExportError::InvalidName(name.to_string())),
        Some(c) if c.is_ascii_digit() => Err(ExportError::InvalidName(name.to_string())),
        _ if ident.chars().all(|c| c == '_') => Err(ExportError::InvalidName(name.to_string())),
        _ => Ok(ident),
    }
}
