use std::fs::remove_file;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Result, TilerError};
use crate::format::PointFormat;
use crate::io::{FileFormat, HeaderParams, PointSink};
use crate::processing::compact_finite;

/// 1つのタイルの出力先と、一定行数までの書き込みバッファを持つ構造体です。
///
/// バッファは`capacity`行を超えて点を保持しません。
/// 閉じた時点で1点も書き出していない場合は出力ファイルを削除します。
pub struct TileBuffer {
    path: PathBuf,
    sink: Box<dyn PointSink>,
    data: Vec<f64>,
    width: usize,
    capacity: usize,
    points_written: u64,
    discarded: u64,
    flushes: usize,
    closed: bool,
}

impl TileBuffer {
    /// 既に開かれた出力先からインスタンスを生成します。
    /// `capacity`行分のバッファを確保します。
    ///
    /// # Errors
    ///
    /// 列数や行数が0の場合、またはバッファの大きさが表現できない場合は
    /// [`TilerError::Configuration`]を返します。
    pub fn new(path: PathBuf, sink: Box<dyn PointSink>, width: usize, capacity: usize) -> Result<Self> {
        if width == 0 || capacity == 0 {
            return Err(TilerError::Configuration(format!(
                "tile buffer needs a positive width and capacity: width {}, capacity {}", width, capacity
            )));
        }
        let len = buffer_len(width, capacity)?;

        Ok(Self {
            path,
            sink,
            data: Vec::with_capacity(len),
            width,
            capacity,
            points_written: 0,
            discarded: 0,
            flushes: 0,
            closed: false,
        })
    }

    /// `path`に出力先を開き、インスタンスを生成します。
    pub fn open(path: PathBuf, file_format: FileFormat, format: &PointFormat, header: &HeaderParams, capacity: usize) -> Result<Self> {
        buffer_len(format.width(), capacity)?;
        let sink = file_format.open_sink(&path, format, header)?;
        Self::new(path, sink, format.width(), capacity)
    }

    /// 点を追加します。
    ///
    /// 追加するとバッファがあふれる場合は、追加する前にバッファを書き出します。
    /// `capacity`より多い行は`capacity`行ずつ書き出されます。
    pub fn add_points(&mut self, rows: &[f64]) -> Result<()> {
        if self.closed {
            return Err(TilerError::Closed);
        }
        debug_assert_eq!(rows.len() % self.width, 0);

        if rows.is_empty() {
            return Ok(());
        }

        if self.len() + rows.len() / self.width > self.capacity {
            self.flush()?;
        }

        for chunk in rows.chunks(self.capacity * self.width) {
            if self.len() + chunk.len() / self.width > self.capacity {
                self.flush()?;
            }
            self.data.extend_from_slice(chunk);
        }

        Ok(())
    }

    /// バッファ内の点を出力先に書き出します。
    /// 有限でない値を含む行は壊れた点として書き出さずに捨てます。
    pub fn flush(&mut self) -> Result<()> {
        if self.data.is_empty() {
            return Ok(());
        }

        let buffered = self.len();
        let kept = compact_finite(&mut self.data, self.width);

        if kept > 0 {
            self.sink.write_rows(&self.data[..kept * self.width])?;
        }

        self.points_written += kept as u64;
        self.discarded += (buffered - kept) as u64;
        self.flushes += 1;
        self.data.clear();

        log::debug!("flushed {} points to {:?} ({} discarded)", kept, self.path, buffered - kept);

        Ok(())
    }

    /// 残りの点を書き出して出力先を閉じます。
    /// 1点も書き出していない場合は出力ファイルを削除します。
    /// 2回目以降の呼び出しは何もしません。
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        // 書き出しに失敗しても出力先は閉じる
        let flushed = self.flush();
        let sink_closed = self.sink.close();
        self.closed = true;
        flushed?;
        sink_closed?;

        if self.points_written == 0 {
            match remove_file(&self.path) {
                Ok(()) => log::debug!("removed empty tile {:?}", self.path),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// バッファに保持している行数です。
    pub fn len(&self) -> usize {
        self.data.len() / self.width
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 出力先に書き出した点の累計です。
    pub fn points_written(&self) -> u64 {
        self.points_written
    }

    /// 書き出し時に捨てた行の累計です。
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// 空でないバッファを書き出した回数です。
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// `capacity`行分のバッファの要素数です。
/// 確保できる大きさを超える場合はエラーを返します。
pub(crate) fn buffer_len(width: usize, capacity: usize) -> Result<usize> {
    width.checked_mul(capacity)
        .filter(|len| len.checked_mul(std::mem::size_of::<f64>()).is_some_and(|bytes| bytes <= isize::MAX as usize))
        .ok_or_else(|| TilerError::Configuration(format!(
            "tile buffer of {} rows x {} values is too large", capacity, width
        )))
}
