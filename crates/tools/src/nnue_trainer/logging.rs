use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// 構造化JSONログ（1行1レコード）を扱うヘルパ。
///
/// パスが `-` のときは標準出力へ書く。
pub struct StructuredLogger {
    pub to_stdout: bool,
    file: Option<Mutex<BufWriter<File>>>,
}

impl StructuredLogger {
    pub fn new(path: &str) -> std::io::Result<Self> {
        if path == "-" {
            return Ok(Self {
                to_stdout: true,
                file: None,
            });
        }
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        let f = fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            to_stdout: false,
            file: Some(Mutex::new(BufWriter::with_capacity(1 << 16, f))),
        })
    }

    pub fn write_json(&self, v: &Value) {
        if self.to_stdout {
            println!("{v}");
        } else if let Some(ref file) = self.file {
            if let Ok(mut w) = file.lock() {
                let _ = writeln!(w, "{v}");
            }
        }
    }

    /// `type` と `ts`（RFC 3339）を付けて書く
    pub fn event(&self, kind: &str, fields: Value) {
        let mut record = Map::new();
        record.insert("type".to_string(), Value::from(kind));
        record.insert("ts".to_string(), Value::from(chrono::Utc::now().to_rfc3339()));
        if let Value::Object(fields) = fields {
            record.extend(fields);
        }
        self.write_json(&Value::Object(record));
    }

    /// 内部バッファを flush する。stdout モードの場合は何もしない。
    pub fn flush(&self) -> std::io::Result<()> {
        match &self.file {
            Some(file) => match file.lock() {
                Ok(mut w) => w.flush(),
                Err(_) => Ok(()),
            },
            None => Ok(()),
        }
    }
}
