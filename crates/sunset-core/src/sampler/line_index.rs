//! コーパスファイルの行インデックス
//!
//! 各行の開始バイトオフセットを起動時に1度だけ走査して保持する。
//! 最終行が改行で終わっていなくても1行として数える。

use crate::error::SamplerError;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SCAN_BUFFER_SIZE: usize = 1 << 20;

/// 1ファイル分の行開始オフセット
pub struct LineIndex {
    path: PathBuf,
    starts: Vec<u64>,
    file_len: u64,
}

impl LineIndex {
    /// ファイルを走査して行インデックスを作る
    pub fn build(path: &Path) -> Result<LineIndex, SamplerError> {
        let file = File::open(path).map_err(|e| SamplerError::io(path, e))?;
        let mut reader = BufReader::with_capacity(SCAN_BUFFER_SIZE, file);

        let mut starts = Vec::new();
        let mut pos: u64 = 0;
        let mut at_line_start = true;
        loop {
            let buf = reader.fill_buf().map_err(|e| SamplerError::io(path, e))?;
            if buf.is_empty() {
                break;
            }
            for &b in buf {
                if at_line_start {
                    starts.push(pos);
                    at_line_start = false;
                }
                if b == b'\n' {
                    at_line_start = true;
                }
                pos += 1;
            }
            let consumed = buf.len();
            reader.consume(consumed);
        }

        log::debug!("indexed {} lines in {}", starts.len(), path.display());
        Ok(LineIndex {
            path: path.to_path_buf(),
            starts,
            file_len: pos,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 行数
    #[inline]
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    #[inline]
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// `line` 行目のバイト範囲（改行を含む）
    pub fn span(&self, line: usize) -> Option<Range<u64>> {
        let start = *self.starts.get(line)?;
        let end = self.starts.get(line + 1).copied().unwrap_or(self.file_len);
        Some(start..end)
    }
}

impl std::fmt::Debug for LineIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineIndex")
            .field("path", &self.path)
            .field("lines", &self.starts.len())
            .field("file_len", &self.file_len)
            .finish()
    }
}

/// ソート済みファイル列を連結したレコード空間
#[derive(Debug, Clone)]
pub struct CorpusIndex {
    files: Vec<Arc<LineIndex>>,
    /// 各ファイル先頭のグローバルレコード番号
    offsets: Vec<usize>,
    total: usize,
}

/// 1ファイル内の連続したレコード範囲
#[derive(Debug, Clone)]
pub struct ShardRange {
    /// コーパス内でのファイル番号
    pub file: usize,
    pub index: Arc<LineIndex>,
    /// ファイル内の行番号範囲
    pub records: Range<usize>,
}

impl ShardRange {
    pub fn path(&self) -> &Path {
        self.index.path()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CorpusIndex {
    pub fn build(paths: &[PathBuf]) -> Result<CorpusIndex, SamplerError> {
        let files = paths
            .iter()
            .map(|p| LineIndex::build(p).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CorpusIndex::from_files(files))
    }

    pub fn from_files(files: Vec<Arc<LineIndex>>) -> CorpusIndex {
        let mut offsets = Vec::with_capacity(files.len());
        let mut total = 0;
        for file in &files {
            offsets.push(total);
            total += file.len();
        }
        CorpusIndex {
            files,
            offsets,
            total,
        }
    }

    /// 全レコード数
    #[inline]
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn files(&self) -> &[Arc<LineIndex>] {
        &self.files
    }

    /// グローバル範囲をファイルごとの区間へ分割する（空の区間は含めない）
    pub fn segments(&self, range: Range<usize>) -> Vec<ShardRange> {
        let mut segments = Vec::new();
        for (file, (index, &offset)) in self.files.iter().zip(&self.offsets).enumerate() {
            let file_end = offset + index.len();
            let start = range.start.max(offset);
            let end = range.end.min(file_end);
            if start < end {
                segments.push(ShardRange {
                    file,
                    index: Arc::clone(index),
                    records: (start - offset)..(end - offset),
                });
            }
        }
        segments
    }
}
