use std::path::PathBuf;

/// タイル書き出しで発生するエラーです。
#[derive(thiserror::Error, Debug)]
pub enum TilerError {
    /// 境界やタイル分割の指定が不正な場合のエラーです。
    /// ファイルを開く前に返されます。
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// 入力された行列の要素数が点の列数の倍数でない場合のエラーです。
    #[error("row width mismatch: expected a multiple of {width} values, got {len}")]
    RowWidth { width: usize, len: usize },

    /// 閉じた後の[`crate::tiler::TileWriter`]に点を追加しようとした場合のエラーです。
    #[error("tile writer is already closed")]
    Closed,

    /// 拡張子から入出力形式を判定できない場合のエラーです。
    #[error("unsupported point cloud format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "las")]
    #[error("LAS error: {0}")]
    Las(#[from] las::Error),
}

pub type Result<T> = std::result::Result<T, TilerError>;
