//! 学習済みネットワークの重み出力

use anyhow::{Context, Result};
use std::path::Path;
use sunset_core::export::{ArtifactStatus, ElementType, ExportFormat, inspect_declarations};

use super::checkpoint::ModelState;
use super::network::TrainableNetwork;

/// ネットワークを宣言順のテンソル列として書き出す
pub fn export_network(
    network: &TrainableNetwork,
    path: &Path,
    format: ExportFormat,
    element_type: ElementType,
) -> Result<()> {
    network
        .to_artifact()
        .write(path, format, element_type)
        .with_context(|| format!("Failed to export weights to {}", path.display()))
}

/// チェックポイントから重みだけを書き出す
pub fn export_checkpoint(
    checkpoint: &Path,
    output: &Path,
    format: ExportFormat,
    element_type: ElementType,
) -> Result<ModelState> {
    // 学習率は出力に影響しない
    let state = ModelState::load(checkpoint, 1.0, 0.0)?;
    export_network(&state.network, output, format, element_type)?;
    Ok(state)
}

/// 既存の宣言形式アーティファクトが書きかけでないか調べる
///
/// 平坦形式は読み戻しで検査する。ファイルが無ければ `Ok(None)`。
pub fn check_existing_artifact(
    network: &TrainableNetwork,
    path: &Path,
    format: ExportFormat,
) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let expected = network.layers.len() * 2;
    match format {
        ExportFormat::Declarations => {
            let status = inspect_declarations(path, expected)
                .with_context(|| format!("Failed to inspect {}", path.display()))?;
            Ok(match status {
                ArtifactStatus::Missing | ArtifactStatus::Complete { .. } => None,
                ArtifactStatus::Incomplete { reason, .. } => Some(reason),
            })
        }
        ExportFormat::Plain => match sunset_core::export::read_plain(path) {
            Ok(blocks) if blocks.len() * 2 == expected => Ok(None),
            Ok(blocks) => Ok(Some(format!(
                "{} layers, expected {}",
                blocks.len(),
                network.layers.len()
            ))),
            Err(e) => Ok(Some(e.to_string())),
        },
    }
}
