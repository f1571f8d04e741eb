//! NumPy `.npy` v1.0（1次元 `<f8` のみ）の読み書き

use crate::error::{ExportError, ExportResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
/// マジック + バージョン + ヘッダ長
const PREAMBLE_LEN: usize = 10;
const ALIGNMENT: usize = 64;

fn header(len: usize) -> String {
    let mut header = format!("{{'descr': '<f8', 'fortran_order': False, 'shape': ({len},), }}");
    let unpadded = PREAMBLE_LEN + header.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    header.extend(std::iter::repeat_n(' ', padding));
    header.push('\n');
    header
}

/// `values` を1次元配列として書き出す
pub fn write_f64<W: Write>(writer: &mut W, values: &[f64]) -> std::io::Result<()> {
    let header = header(values.len());
    writer.write_all(MAGIC)?;
    writer.write_u8(1)?;
    writer.write_u8(0)?;
    writer.write_u16::<LittleEndian>(header.len() as u16)?;
    writer.write_all(header.as_bytes())?;
    for &v in values {
        writer.write_f64::<LittleEndian>(v)?;
    }
    Ok(())
}

pub fn write_f64_file(path: &Path, values: &[f64]) -> ExportResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_f64(&mut writer, values)?;
    writer.flush()?;
    Ok(())
}

/// 1次元 `<f8` 配列を読む
pub fn read_f64<R: Read>(reader: &mut R) -> ExportResult<Vec<f64>> {
    let corrupt = |msg: &str| ExportError::Truncated(format!("npy: {msg}"));

    let mut magic = [0u8; 6];
    reader
        .read_exact(&mut magic)
        .map_err(|_| corrupt("missing magic"))?;
    if &magic != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let major = reader.read_u8().map_err(|_| corrupt("missing version"))?;
    let _minor = reader.read_u8().map_err(|_| corrupt("missing version"))?;
    if major != 1 {
        return Err(corrupt("unsupported version"));
    }
    let header_len = reader
        .read_u16::<LittleEndian>()
        .map_err(|_| corrupt("missing header length"))? as usize;
    let mut header = vec![0u8; header_len];
    reader
        .read_exact(&mut header)
        .map_err(|_| corrupt("short header"))?;
    let header = String::from_utf8(header).map_err(|_| corrupt("header is not text"))?;

    if !header.contains("'descr': '<f8'") {
        return Err(corrupt("dtype is not <f8"));
    }
    if !header.contains("'fortran_order': False") {
        return Err(corrupt("fortran order is not supported"));
    }
    let len = parse_shape(&header).ok_or_else(|| corrupt("shape is not 1-D"))?;

    // 確保は実際に読めた分だけ
    let expected = len
        .checked_mul(8)
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| corrupt("shape is too large"))?;
    let mut data = Vec::new();
    reader.take(expected).read_to_end(&mut data)?;
    if data.len() as u64 != expected {
        return Err(corrupt("data ends early"));
    }
    Ok(data
        .chunks_exact(8)
        .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .collect())
}

pub fn read_f64_file(path: &Path) -> ExportResult<Vec<f64>> {
    let mut reader = BufReader::new(File::open(path)?);
    read_f64(&mut reader)
}

/// `'shape': (N,)` から N を取り出す
fn parse_shape(header: &str) -> Option<usize> {
    let rest = &header[header.find("'shape': (")? + "'shape': (".len()..];
    let inner = &rest[..rest.find(')')?];
    let mut dims = inner.split(',').map(str::trim).filter(|s| !s.is_empty());
    let len = dims.next()?.parse().ok()?;
    if dims.next().is_some() {
        return None;
    }
    Some(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_layout() {
        let mut buf = Vec::new();
        write_f64(&mut buf, &[1.0, 2.5]).unwrap();
        assert_eq!(&buf[..6], MAGIC);
        assert_eq!(&buf[6..8], &[1, 0]);
        let header_len = u16::from_le_bytes([buf[8], buf[9]]) as usize;
        assert_eq!((PREAMBLE_LEN + header_len) % ALIGNMENT, 0);
        let header = std::str::from_utf8(&buf[10..10 + header_len]).unwrap();
        assert!(header.starts_with("{'descr': '<f8', 'fortran_order': False, 'shape': (2,), }"));
        assert!(header.ends_with('\n'));
        assert_eq!(buf.len(), PREAMBLE_LEN + header_len + 16);
        assert_eq!(&buf[buf.len() - 8..], &2.5f64.to_le_bytes());
    }

    #[test]
    fn test_read_back() {
        let values = vec![3.0, -1.5, 8.36, 0.0, 8.366];
        let mut buf = Vec::new();
        write_f64(&mut buf, &values).unwrap();
        let read = read_f64(&mut Cursor::new(buf)).unwrap();
        assert_eq!(read, values);
    }

    #[test]
    fn test_empty_array() {
        let mut buf = Vec::new();
        write_f64(&mut buf, &[]).unwrap();
        assert!(read_f64(&mut Cursor::new(buf)).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_data() {
        let mut buf = Vec::new();
        write_f64(&mut buf, &[1.0, 2.0, 3.0]).unwrap();
        buf.truncate(buf.len() - 4);
        assert!(matches!(
            read_f64(&mut Cursor::new(buf)),
            Err(ExportError::Truncated(_))
        ));
        assert!(matches!(
            read_f64(&mut Cursor::new(b"\x93NUM".to_vec())),
            Err(ExportError::Truncated(_))
        ));
    }

    /// 要素数 `shape` を宣言し、`data` だけを持つファイル
    fn with_declared_len(shape: usize, data: &[f64]) -> Vec<u8> {
        let header = header(0).replace("(0,)", &format!("({shape},)"));
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&[1, 0]);
        buf.extend_from_slice(&(header.len() as u16).to_le_bytes());
        buf.extend_from_slice(header.as_bytes());
        for v in data {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf
    }

    #[test]
    fn test_oversized_shape_is_truncated() {
        for shape in [usize::MAX / 16, usize::MAX] {
            let buf = with_declared_len(shape, &[1.0]);
            assert!(matches!(
                read_f64(&mut Cursor::new(buf)),
                Err(ExportError::Truncated(_))
            ));
        }
        let buf = with_declared_len(1, &[4.5]);
        assert_eq!(read_f64(&mut Cursor::new(buf)).unwrap(), vec![4.5]);
    }

    #[test]
    fn test_parse_shape() {
        assert_eq!(parse_shape("{'shape': (12,), }"), Some(12));
        assert_eq!(parse_shape("{'shape': (2, 3), }"), None);
        assert_eq!(parse_shape("{'shape': (), }"), None);
    }
}
