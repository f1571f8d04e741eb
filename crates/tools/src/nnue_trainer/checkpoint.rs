//! 学習状態とチェックポイントファイル
//!
//! 形式（リトルエンディアン）:
//!
//! ```text
//! magic "SNCK" | version u32 | n_dims u32 | dims u32 × n_dims
//! epoch u64 | step u64 | adam_t u64
//! 層ごとに weights, biases, m_w, v_w, m_b, v_b （f32 列）
//! ```
//!
//! 途中で切れたファイルや末尾に余りのあるファイルは読み込みエラーにする。
//! ファイル長はヘッダの次元から決まるので、パラメータ領域を確保する前に照合する。

use anyhow::{Context, Result, bail, ensure};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use sunset_core::FEATURE_DIM;

use super::network::{OUTPUT_DIMENSIONS, TrainableNetwork};
use super::optimizer::{Adam, LayerMoments};

pub const CHECKPOINT_MAGIC: &[u8; 4] = b"SNCK";
pub const CHECKPOINT_VERSION: u32 = 1;

/// 層数の上限（壊れたヘッダで巨大な確保をしないため）
const MAX_LAYERS: usize = 64;
const MAX_WIDTH: usize = 1 << 20;

/// モデルとオプティマイザの状態
///
/// 学習ループと重み出力の間で明示的に受け渡す。
#[derive(Clone, Debug, PartialEq)]
pub struct ModelState {
    pub network: TrainableNetwork,
    pub optimizer: Adam,
    /// 完了したエポック数
    pub epoch: u64,
    /// 完了した更新ステップ数
    pub step: u64,
}

impl ModelState {
    pub fn new(network: TrainableNetwork, optimizer: Adam) -> Self {
        Self {
            network,
            optimizer,
            epoch: 0,
            step: 0,
        }
    }

    /// チェックポイントを書き出す（既存ファイルは切り詰める）
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create checkpoint {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)
            .and_then(|_| writer.flush())
            .with_context(|| format!("Failed to write checkpoint {}", path.display()))?;
        log::debug!(
            "saved checkpoint {} (epoch {}, step {})",
            path.display(),
            self.epoch,
            self.step
        );
        Ok(())
    }

    /// チェックポイントを読み込む
    ///
    /// 学習率と重み減衰はファイルに含まないので呼び出し側が与える。
    pub fn load(path: &Path, lr: f32, weight_decay: f32) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open checkpoint {}", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("Failed to stat checkpoint {}", path.display()))?
            .len();
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader, len, lr, weight_decay)
            .with_context(|| format!("Corrupt checkpoint {}", path.display()))
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(CHECKPOINT_MAGIC)?;
        w.write_u32::<LittleEndian>(CHECKPOINT_VERSION)?;

        let dims = self.network.dims();
        w.write_u32::<LittleEndian>(dims.len() as u32)?;
        for &d in &dims {
            w.write_u32::<LittleEndian>(d as u32)?;
        }

        w.write_u64::<LittleEndian>(self.epoch)?;
        w.write_u64::<LittleEndian>(self.step)?;
        w.write_u64::<LittleEndian>(self.optimizer.step_count())?;

        for (layer, m) in self.network.layers.iter().zip(self.optimizer.moments()) {
            for values in [
                &layer.weights,
                &layer.biases,
                &m.m_weights,
                &m.v_weights,
                &m.m_biases,
                &m.v_biases,
            ] {
                write_f32s(w, values)?;
            }
        }
        Ok(())
    }

    /// `len` は `r` から読めるバイト数
    pub fn read_from<R: Read>(r: &mut R, len: u64, lr: f32, weight_decay: f32) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).context("truncated header")?;
        ensure!(&magic == CHECKPOINT_MAGIC, "bad magic {:?}", magic);
        let version = r.read_u32::<LittleEndian>().context("truncated header")?;
        ensure!(version == CHECKPOINT_VERSION, "unsupported version {version}");

        let n_dims = r.read_u32::<LittleEndian>().context("truncated header")? as usize;
        ensure!(
            (2..=MAX_LAYERS + 1).contains(&n_dims),
            "invalid layer count {}",
            n_dims.saturating_sub(1)
        );
        let mut dims = Vec::with_capacity(n_dims);
        for _ in 0..n_dims {
            let d = r.read_u32::<LittleEndian>().context("truncated header")? as usize;
            ensure!((1..=MAX_WIDTH).contains(&d), "invalid layer width {d}");
            dims.push(d);
        }
        ensure!(
            dims[0] == FEATURE_DIM && dims[n_dims - 1] == OUTPUT_DIMENSIONS,
            "unexpected model dimensions {dims:?}"
        );

        let expected = encoded_len(&dims).context("model dimensions overflow")?;
        ensure!(
            len == expected,
            "checkpoint is {len} bytes but dimensions {dims:?} need {expected}"
        );

        let epoch = r.read_u64::<LittleEndian>().context("truncated header")?;
        let step = r.read_u64::<LittleEndian>().context("truncated header")?;
        let adam_t = r.read_u64::<LittleEndian>().context("truncated header")?;

        let mut network = TrainableNetwork::from_dims(&dims);
        let mut moments = Vec::with_capacity(network.layers.len());
        for (i, layer) in network.layers.iter_mut().enumerate() {
            let n_w = layer.weights.len();
            let n_b = layer.biases.len();
            let ctx = || format!("truncated data in layer {i}");
            read_f32s(r, &mut layer.weights).with_context(ctx)?;
            read_f32s(r, &mut layer.biases).with_context(ctx)?;
            let mut m = LayerMoments::zeros(n_w, n_b);
            read_f32s(r, &mut m.m_weights).with_context(ctx)?;
            read_f32s(r, &mut m.v_weights).with_context(ctx)?;
            read_f32s(r, &mut m.m_biases).with_context(ctx)?;
            read_f32s(r, &mut m.v_biases).with_context(ctx)?;
            moments.push(m);
        }

        let mut rest = [0u8; 1];
        if r.read(&mut rest)? != 0 {
            bail!("trailing data after layer {}", network.layers.len() - 1);
        }

        let optimizer = Adam::from_parts(&network, lr, adam_t, moments)
            .context("optimizer state does not match the model")?
            .with_weight_decay(weight_decay);
        Ok(Self {
            network,
            optimizer,
            epoch,
            step,
        })
    }
}

/// 次元 `dims` のチェックポイントのバイト数
fn encoded_len(dims: &[usize]) -> Option<u64> {
    // magic, version, n_dims, dims, epoch, step, adam_t
    let header = 4 + 4 + 4 + 4 * dims.len() as u64 + 3 * 8;
    dims.windows(2).try_fold(header, |acc, w| {
        let (input, output) = (w[0] as u64, w[1] as u64);
        // 重み・バイアスとその1次/2次モーメント
        let per_layer = input.checked_mul(output)?.checked_add(output)?.checked_mul(3 * 4)?;
        acc.checked_add(per_layer)
    })
}

fn write_f32s<W: Write>(w: &mut W, values: &[f32]) -> std::io::Result<()> {
    for &v in values {
        w.write_f32::<LittleEndian>(v)?;
    }
    Ok(())
}

fn read_f32s<R: Read>(r: &mut R, out: &mut [f32]) -> std::io::Result<()> {
    r.read_f32_into::<LittleEndian>(out)
}
