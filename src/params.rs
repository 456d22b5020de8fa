use std::path::{Path, PathBuf};

use vec_x::VecX;

use crate::error::Result;
use crate::format::PointFormat;
use crate::grid::{BoundingBox, Point2D, TileGrid, TileIdx, Tiling};
use crate::io::{FileFormat, HeaderParams};
use crate::tiler::TileWriter;

/// タイルごとのバッファの既定の行数です。
pub const DEFAULT_FLUSH_THRESHOLD: usize = 4_000_000;

/// [`TileWriter`]を構築するためのビルダーです。
///
/// タイルの大きさとタイル数の両方が指定された場合は、タイルの大きさが優先されます。
#[derive(Clone, Debug)]
pub struct TileWriterBuilder {
    output_folder: PathBuf,
    format: PointFormat,
    file_format: FileFormat,
    bbox: BoundingBox,
    tile_size: Option<Point2D>,
    num_tiles: TileIdx,
    padding: usize,
    flush_threshold: usize,
    header: HeaderParams,
}

impl TileWriterBuilder {
    pub fn new(output_folder: &Path, format: PointFormat) -> Self {
        Self {
            output_folder: output_folder.to_path_buf(),
            format,
            file_format: FileFormat::default(),
            bbox: BoundingBox::new([0., 0.], [1., 1.]),
            tile_size: None,
            num_tiles: TileIdx::new([1, 1]),
            padding: 0,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            header: HeaderParams::default(),
        }
    }

    /// <必須>
    /// 分割する範囲を指定します。
    /// 点群そのものではなく、軌跡などの既知の範囲から指定することを想定しています。
    pub fn bbox(mut self, min: [f64; 2], max: [f64; 2]) -> Self {
        self.bbox = BoundingBox::new(min, max);
        self
    }

    /// <任意>
    /// タイルの一辺の長さを指定します。タイル数はこの値から決まります。
    pub fn tile_size(mut self, tile_size: f64) -> Self {
        self.tile_size = Some(Point2D::new([tile_size, tile_size]));
        self
    }

    /// <任意>
    /// 軸ごとにタイルの大きさを指定します。
    pub fn tile_size_xy(mut self, tile_size: [f64; 2]) -> Self {
        self.tile_size = Some(Point2D::new(tile_size));
        self
    }

    /// <任意>
    /// 軸ごとのタイル数を指定します。
    /// このメソッドを使用しない場合、デフォルト値は`[1, 1]`です。
    pub fn num_tiles(mut self, num_tiles: [usize; 2]) -> Self {
        self.num_tiles = TileIdx::new(num_tiles);
        self
    }

    /// <任意>
    /// 範囲の各辺に追加するタイル数を指定します。
    pub fn padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    /// <任意>
    /// タイルごとにメモリ上に保持する最大の行数を指定します。
    pub fn flush_threshold(mut self, flush_threshold: usize) -> Self {
        self.flush_threshold = flush_threshold;
        self
    }

    /// <任意>
    /// 出力形式を指定します。
    pub fn file_format(mut self, file_format: FileFormat) -> Self {
        self.file_format = file_format;
        self
    }

    /// <任意>
    /// LAS/LAZヘッダーの座標変換をまとめて指定します。
    pub fn header(mut self, header: HeaderParams) -> Self {
        self.header = header;
        self
    }

    /// <任意>
    /// LAS/LAZヘッダーの座標オフセットを指定します。
    pub fn offsets(mut self, offsets: [f64; 3]) -> Self {
        self.header.offsets = VecX::new(offsets);
        self
    }

    /// <任意>
    /// LAS/LAZで保存する座標の精度(1単位あたりの分割数)を指定します。
    pub fn precision(mut self, precision: f64) -> Self {
        self.header.precision = precision;
        self
    }

    /// 格子を計算し、すべてのタイルの出力先を開いて[`TileWriter`]を構築します。
    ///
    /// # Errors
    ///
    /// 設定が不正な場合はファイルを開く前に[`crate::error::TilerError::Configuration`]を返します。
    pub fn build(self) -> Result<TileWriter> {
        let tiling = match self.tile_size {
            Some(tile_size) => Tiling::TileSize(tile_size),
            None => Tiling::NumTiles(self.num_tiles),
        };

        let grid = TileGrid::new(self.bbox, tiling, self.padding)?;

        if !(self.header.precision.is_finite() && self.header.precision > 0.) {
            return Err(crate::error::TilerError::Configuration(format!(
                "precision must be positive: {}", self.header.precision
            )));
        }

        TileWriter::open(&self.output_folder, self.format, self.file_format, grid, &self.header, self.flush_threshold)
    }
}
