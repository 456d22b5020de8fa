use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::format::{PointFormat, ScalarKind};
use crate::io::PointSink;

/// カンマ区切りのテキストとして点を書き出す出力先です。
/// 1行目は`# `に続く列名のヘッダーです。
pub struct TxtSink {
    writer: Option<BufWriter<File>>,
    kinds: Vec<ScalarKind>,
}

impl TxtSink {
    pub fn create(path: &Path, format: &PointFormat) -> Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "# {}", format.txt_header())?;

        Ok(Self {
            writer: Some(writer),
            kinds: format.fields().iter().map(|f| f.kind).collect(),
        })
    }
}

impl PointSink for TxtSink {
    fn write_rows(&mut self, rows: &[f64]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        for row in rows.chunks_exact(self.kinds.len()) {
            for (i, (&value, kind)) in row.iter().zip(&self.kinds).enumerate() {
                if i > 0 {
                    writer.write_all(b",")?;
                }
                match kind {
                    ScalarKind::F32 => write!(writer, "{:.6}", value)?,
                    integer => write!(writer, "{}", integer.quantize(value))?,
                }
            }
            writer.write_all(b"\n")?;
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// テキストファイルの先頭3列を座標として読み込みます。
/// `#`で始まる行は読み飛ばし、区切り文字にはカンマと空白の両方を受け付けます。
pub fn read_txt_positions(path: &Path) -> Result<Vec<f64>> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let values = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .take(3)
            .map(|s| s.parse::<f64>().unwrap_or(f64::NAN))
            .collect::<Vec<_>>();

        // 列が足りない行は壊れた行として非数で埋める
        rows.extend((0..3).map(|i| values.get(i).copied().unwrap_or(f64::NAN)));
    }

    Ok(rows)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::format::FORMAT_XYZRGB;

    #[test]
    fn test_write_txt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.txt");

        let mut sink = TxtSink::create(&path, &FORMAT_XYZRGB).unwrap();
        sink.write_rows(&[1.5, -2., 0.25, 255., 12.7, 0.]).unwrap();
        sink.close().unwrap();
        sink.close().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "# X,Y,Z,red,green,blue\n1.500000,-2.000000,0.250000,255,12,0\n");
    }

    #[test]
    fn test_read_txt_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.xyz");
        std::fs::write(&path, "# x y z\n1 2 3 9\n\n4.5,5,6\n7 8\n").unwrap();

        let rows = read_txt_positions(&path).unwrap();

        assert_eq!(&rows[..6], &[1., 2., 3., 4.5, 5., 6.]);
        assert_eq!(&rows[6..8], &[7., 8.]);
        assert!(rows[8].is_nan());
    }
}
