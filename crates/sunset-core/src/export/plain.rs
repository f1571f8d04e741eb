//! センチネル区切りの平坦な `f64` 配列形式
//!
//! 1層あたり `[layer_size, weights..., 8.36, biases..., 8.366]`。
//! 重みは行優先で `layer_size * input_dim` 個、バイアスは `layer_size` 個。
//! 複数層は宣言順に連結する。

use super::tensor::{ParameterTensor, TensorDims};
use crate::error::{ExportError, ExportResult};

/// 重み列の終端
pub const WEIGHT_SENTINEL: f64 = 8.36;
/// バイアス列の終端
pub const BIAS_SENTINEL: f64 = 8.366;

/// 重み行列とバイアスの組
#[derive(Debug, Clone, Copy)]
pub struct PlainLayer<'a> {
    pub weights: &'a ParameterTensor,
    pub biases: &'a ParameterTensor,
}

impl PlainLayer<'_> {
    /// (layer_size, input_dim) を検証して返す
    fn checked_dims(&self, layer: usize) -> ExportResult<(usize, usize)> {
        let shape_err = || ExportError::LayerShape {
            layer,
            weights: self.weights.shape.clone(),
            biases: self.biases.shape.clone(),
        };
        let (TensorDims::Matrix { rows, cols }, TensorDims::Vector(len)) =
            (self.weights.dims()?, self.biases.dims()?)
        else {
            return Err(shape_err());
        };
        if rows != len {
            return Err(shape_err());
        }
        self.weights.check_finite()?;
        self.biases.check_finite()?;
        Ok((rows, cols))
    }
}

/// 書き出す f64 値が区切り値と一致すると読み手が誤解釈する
fn collides(v: f32, sentinel: f64) -> bool {
    f64::from(v) == sentinel
}

/// 全層を検証して平坦な配列を作る
pub fn render_plain(layers: &[PlainLayer<'_>]) -> ExportResult<Vec<f64>> {
    let mut out = Vec::new();
    for (layer, l) in layers.iter().enumerate() {
        let (layer_size, _input_dim) = l.checked_dims(layer)?;

        if let Some(index) = l.weights.data.iter().position(|&w| collides(w, WEIGHT_SENTINEL)) {
            return Err(ExportError::SentinelCollision {
                layer,
                index,
                value: WEIGHT_SENTINEL,
            });
        }
        if let Some(index) = l.biases.data.iter().position(|&b| collides(b, BIAS_SENTINEL)) {
            return Err(ExportError::SentinelCollision {
                layer,
                index,
                value: BIAS_SENTINEL,
            });
        }

        out.reserve(l.weights.data.len() + l.biases.data.len() + 3);
        out.push(layer_size as f64);
        out.extend(l.weights.data.iter().map(|&w| f64::from(w)));
        out.push(WEIGHT_SENTINEL);
        out.extend(l.biases.data.iter().map(|&b| f64::from(b)));
        out.push(BIAS_SENTINEL);
    }
    Ok(out)
}

/// 読み戻した1層分
#[derive(Debug, Clone, PartialEq)]
pub struct PlainBlock {
    pub layer_size: usize,
    pub weights: Vec<f64>,
    pub biases: Vec<f64>,
}

impl PlainBlock {
    /// 入力次元（重み数 / layer_size）
    pub fn input_dim(&self) -> usize {
        self.weights.len().checked_div(self.layer_size).unwrap_or(0)
    }
}

/// 区切り値を探して層ごとに分解する
pub fn parse_plain(values: &[f64]) -> ExportResult<Vec<PlainBlock>> {
    let mut blocks = Vec::new();
    let mut pos = 0;
    while pos < values.len() {
        let layer = blocks.len();
        let size = values[pos];
        if !(size >= 0.0 && size.fract() == 0.0) {
            return Err(ExportError::Truncated(format!(
                "layer {layer}: invalid layer size {size}"
            )));
        }
        let layer_size = size as usize;

        let weights_start = pos + 1;
        let weights_end = find(values, weights_start, WEIGHT_SENTINEL).ok_or_else(|| {
            ExportError::Truncated(format!("layer {layer}: missing weight sentinel"))
        })?;
        let biases_start = weights_end + 1;
        let biases_end = find(values, biases_start, BIAS_SENTINEL).ok_or_else(|| {
            ExportError::Truncated(format!("layer {layer}: missing bias sentinel"))
        })?;

        let block = PlainBlock {
            layer_size,
            weights: values[weights_start..weights_end].to_vec(),
            biases: values[biases_start..biases_end].to_vec(),
        };
        let weights_ok = if layer_size == 0 {
            block.weights.is_empty()
        } else {
            block.weights.len() % layer_size == 0
        };
        if block.biases.len() != layer_size || !weights_ok {
            return Err(ExportError::Truncated(format!(
                "layer {layer}: {} weights and {} biases for layer size {layer_size}",
                block.weights.len(),
                block.biases.len()
            )));
        }
        blocks.push(block);
        pos = biases_end + 1;
    }
    Ok(blocks)
}

fn find(values: &[f64], from: usize, sentinel: f64) -> Option<usize> {
    values
        .get(from..)?
        .iter()
        .position(|&v| v == sentinel)
        .map(|i| from + i)
}
