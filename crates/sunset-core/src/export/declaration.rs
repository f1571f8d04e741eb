//! 名前付き定数宣言形式
//!
//! 推論エンジンのソースへそのまま `include!` できる形で出力する。
//!
//! ```text
//! #[rustfmt::skip]
//! pub const FC0_WEIGHT: [[f32; 2]; 2] = [[0.5, -1.0], [0.25, 0.0]];
//! pub const FC0_BIAS: [f32; 2] = [0.1, 0.2];
//! ```

use super::ElementType;
use super::tensor::{ParameterTensor, TensorDims};
use crate::error::{ExportError, ExportResult};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// 先頭の指示行
pub const DIRECTIVE: &str = "#[rustfmt::skip]";

/// 全テンソルを検証して宣言テキストを作る
///
/// 途中で失敗した場合は何も返さない（部分的な出力は作らない）。
pub fn render_declarations(
    tensors: &[ParameterTensor],
    element_type: ElementType,
) -> ExportResult<String> {
    let mut seen = HashSet::with_capacity(tensors.len());
    let mut out = String::new();
    out.push_str(DIRECTIVE);
    out.push('\n');

    for tensor in tensors {
        let dims = tensor.dims()?;
        tensor.check_finite()?;
        let ident = tensor.identifier()?;
        if !seen.insert(ident.clone()) {
            return Err(ExportError::DuplicateName(ident));
        }
        render_tensor(&mut out, &ident, dims, &tensor.data, element_type);
    }
    Ok(out)
}

fn render_tensor(
    out: &mut String,
    ident: &str,
    dims: TensorDims,
    data: &[f32],
    element_type: ElementType,
) {
    let ty = element_type.rust_name();
    match dims {
        TensorDims::Vector(len) => {
            let _ = write!(out, "pub const {ident}: [{ty}; {len}] = ");
            render_row(out, data, element_type);
        }
        TensorDims::Matrix { rows, cols } => {
            let _ = write!(out, "pub const {ident}: [[{ty}; {cols}]; {rows}] = [");
            for r in 0..rows {
                if r > 0 {
                    out.push_str(", ");
                }
                render_row(out, &data[r * cols..(r + 1) * cols], element_type);
            }
            out.push(']');
        }
    }
    out.push_str(";\n");
}

fn render_row(out: &mut String, values: &[f32], element_type: ElementType) {
    out.push('[');
    for (i, &v) in values.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        push_value(out, v, element_type);
    }
    out.push(']');
}

/// 往復で同じ値に戻る最短表記
#[inline]
fn push_value(out: &mut String, v: f32, element_type: ElementType) {
    let _ = match element_type {
        ElementType::F32 => write!(out, "{v:?}"),
        ElementType::F64 => write!(out, "{:?}", f64::from(v)),
    };
}

/// 宣言ファイルを書き出す（既存ファイルは切り詰める）
pub fn write_declarations(
    path: &Path,
    tensors: &[ParameterTensor],
    element_type: ElementType,
) -> ExportResult<()> {
    let text = render_declarations(tensors, element_type)?;
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(text.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// 既存アーティファクトの状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactStatus {
    Missing,
    Complete { declarations: usize },
    /// 書き込み途中で止まった等で再生成が必要
    Incomplete { declarations: usize, reason: String },
}

impl ArtifactStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, ArtifactStatus::Complete { .. })
    }
}

/// 宣言ファイルが完全な形で残っているかを調べる
pub fn inspect_declarations(path: &Path, expected: usize) -> ExportResult<ArtifactStatus> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ArtifactStatus::Missing),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);

    let mut declarations = 0;
    let mut saw_directive = false;
    let incomplete = |declarations: usize, reason: &str| ArtifactStatus::Incomplete {
        declarations,
        reason: reason.to_string(),
    };

    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let Some(line) = buf.strip_suffix(b"\n") else {
            return Ok(incomplete(declarations, "missing trailing newline"));
        };
        let Ok(line) = std::str::from_utf8(line) else {
            return Ok(incomplete(declarations, "invalid UTF-8"));
        };
        if !saw_directive {
            if line != DIRECTIVE {
                return Ok(incomplete(0, "missing leading directive"));
            }
            saw_directive = true;
            continue;
        }
        if !(line.starts_with("pub const ") && line.ends_with("];")) {
            return Ok(incomplete(declarations, "truncated declaration"));
        }
        declarations += 1;
    }

    if !saw_directive {
        return Ok(incomplete(0, "empty artifact"));
    }
    if declarations != expected {
        return Ok(incomplete(
            declarations,
            &format!("expected {expected} declarations"),
        ));
    }
    Ok(ArtifactStatus::Complete { declarations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// 型注釈からネストの深さと配列境界（記述順）を取り出す
    fn type_bounds(line: &str) -> (usize, Vec<usize>) {
        let ty = line.split(": ").nth(1).unwrap().split(" = ").next().unwrap();
        let depth = ty.chars().take_while(|&c| c == '[').count();
        let bounds = ty
            .split(';')
            .skip(1)
            .map(|s| s.trim_matches(|c: char| c == ']' || c == ' ').parse().unwrap())
            .collect::<Vec<usize>>();
        (depth, bounds)
    }

    fn two_layer() -> Vec<ParameterTensor> {
        vec![
            ParameterTensor::matrix("fc0.weight", 2, 3, vec![0.5, -1.0, 0.25, 0.0, 2.0, -0.125]),
            ParameterTensor::vector("fc0.bias", vec![0.1, 0.2]),
        ]
    }

    #[test]
    fn test_render_matrix_and_vector() {
        let text = render_declarations(&two_layer(), ElementType::F32).unwrap();
        let expected = "#[rustfmt::skip]\n\
            pub const FC0_WEIGHT: [[f32; 3]; 2] = [[0.5, -1.0, 0.25], [0.0, 2.0, -0.125]];\n\
            pub const FC0_BIAS: [f32; 2] = [0.1, 0.2];\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_bounds_order_and_depth() {
        let tensors = vec![
            ParameterTensor::matrix("w", 4, 7, vec![0.0; 28]),
            ParameterTensor::vector("b", vec![0.0; 5]),
        ];
        let text = render_declarations(&tensors, ElementType::F32).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], DIRECTIVE);
        // (R, C) は内側の列数 C が先、外側の行数 R が後
        assert_eq!(type_bounds(lines[1]), (2, vec![7, 4]));
        assert_eq!(type_bounds(lines[2]), (1, vec![5]));

        let values = lines[1].split(" = ").nth(1).unwrap();
        assert!(values.starts_with("[["));
        assert_eq!(values.matches('[').count(), 1 + 4);
    }

    #[test]
    fn test_zero_length_dimensions() {
        let tensors = vec![
            ParameterTensor::vector("a", vec![]),
            ParameterTensor::matrix("b", 0, 3, vec![]),
            ParameterTensor::matrix("c", 2, 0, vec![]),
        ];
        let text = render_declarations(&tensors, ElementType::F32).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "pub const A: [f32; 0] = [];");
        assert_eq!(lines[2], "pub const B: [[f32; 3]; 0] = [];");
        assert_eq!(lines[3], "pub const C: [[f32; 0]; 2] = [[], []];");
    }

    #[test]
    fn test_f64_element_type_keeps_exact_value() {
        let tensors = vec![ParameterTensor::vector("b", vec![0.1])];
        let text = render_declarations(&tensors, ElementType::F64).unwrap();
        let line = text.lines().nth(1).unwrap();
        assert!(line.starts_with("pub const B: [f64; 1] = ["));
        let value: f64 = line
            .trim_start_matches("pub const B: [f64; 1] = [")
            .trim_end_matches("];")
            .parse()
            .unwrap();
        assert_eq!(value, f64::from(0.1f32));
    }

    #[test]
    fn test_values_round_trip() {
        let values = vec![1.0e-7, -3.402_823_5e38, 0.333_333_34, 123_456.79, -0.0];
        let tensors = vec![ParameterTensor::vector("v", values.clone())];
        let text = render_declarations(&tensors, ElementType::F32).unwrap();
        let body = text
            .lines()
            .nth(1)
            .unwrap()
            .split(" = [")
            .nth(1)
            .unwrap()
            .trim_end_matches("];");
        let parsed: Vec<f32> = body.split(", ").map(|s| s.parse().unwrap()).collect();
        assert_eq!(parsed.len(), values.len());
        for (a, b) in parsed.iter().zip(&values) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_rejects_invalid_tensors() {
        let bad_shape = vec![ParameterTensor::new("t", vec![1, 1, 1], vec![0.0])];
        assert!(matches!(
            render_declarations(&bad_shape, ElementType::F32),
            Err(ExportError::Shape { .. })
        ));

        let nan = vec![ParameterTensor::vector("t", vec![f32::NAN])];
        assert!(matches!(
            render_declarations(&nan, ElementType::F32),
            Err(ExportError::NonFinite { .. })
        ));

        let dup = vec![
            ParameterTensor::vector("fc0.bias", vec![0.0]),
            ParameterTensor::vector("fc0_bias", vec![0.0]),
        ];
        assert!(matches!(
            render_declarations(&dup, ElementType::F32),
            Err(ExportError::DuplicateName(name)) if name == "FC0_BIAS"
        ));
    }

    #[test]
    fn test_write_truncates_and_failed_write_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("net.rs");
        std::fs::write(&path, "x".repeat(10_000)).unwrap();

        write_declarations(&path, &two_layer(), ElementType::F32).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(DIRECTIVE));
        assert_eq!(text.lines().count(), 3);

        let bad = vec![ParameterTensor::new("t", vec![2, 2], vec![0.0])];
        assert!(write_declarations(&path, &bad, ElementType::F32).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), text);
    }

    #[test]
    fn test_inspect_declarations() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("net.rs");
        assert_eq!(inspect_declarations(&path, 2).unwrap(), ArtifactStatus::Missing);

        write_declarations(&path, &two_layer(), ElementType::F32).unwrap();
        assert_eq!(
            inspect_declarations(&path, 2).unwrap(),
            ArtifactStatus::Complete { declarations: 2 }
        );
        assert!(!inspect_declarations(&path, 3).unwrap().is_complete());

        // 書き込み途中で止まったファイル
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, &text[..text.len() - 12]).unwrap();
        match inspect_declarations(&path, 2).unwrap() {
            ArtifactStatus::Incomplete { declarations, .. } => assert_eq!(declarations, 1),
            other => panic!("unexpected status {other:?}"),
        }

        std::fs::write(&path, "").unwrap();
        assert!(!inspect_declarations(&path, 0).unwrap().is_complete());
    }
}
