use std::fs::create_dir_all;
use std::path::Path;

use fxhash::FxHashMap;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::error::{Result, TilerError};
use crate::format::PointFormat;
use crate::grid::{TileGrid, TileIdx};
use crate::io::{check_width, FileFormat, HeaderParams};
use crate::params::TileWriterBuilder;
use crate::tile_buffer::{buffer_len, TileBuffer};

/// 点群を地表面上の格子に分割し、タイルごとのファイルに書き出す構造体です。
///
/// 生成時に格子のすべてのタイルについて出力先を開き、
/// [`TileWriter::close`]まで同じファイルハンドルを使い続けます。
/// 使用するメモリは最大で`タイル数 * flush_threshold * 列数`個の`f64`です。
///
/// ```no_run
/// use point_tiler_core::format::FORMAT_XYZ;
/// use point_tiler_core::tiler::TileWriter;
///
/// let mut writer = TileWriter::builder("tiles", FORMAT_XYZ)
///     .bbox([0., 0.], [100., 100.])
///     .tile_size(25.)
///     .padding(1)
///     .build()?;
///
/// writer.add_points(&[1., 2., 0., 60., 70., 0.5])?;
/// writer.close()?;
/// # Ok::<(), point_tiler_core::error::TilerError>(())
/// ```
pub struct TileWriter {
    grid: TileGrid,
    format: PointFormat,
    file_format: FileFormat,
    tiles: Vec<TileBuffer>,
    discarded: u64,
    closed: bool,
}

impl TileWriter {
    /// 設定を指定してインスタンスを構築するためのビルダーを返します。
    pub fn builder<P: AsRef<Path>>(output_folder: P, format: PointFormat) -> TileWriterBuilder {
        TileWriterBuilder::new(output_folder.as_ref(), format)
    }

    /// 計算済みの格子からインスタンスを生成し、すべてのタイルの出力先を開きます。
    /// タイルのファイル名は`tile_<x>_<y>.<拡張子>`です。
    pub fn open(
        output_folder: &Path,
        format: PointFormat,
        file_format: FileFormat,
        grid: TileGrid,
        header: &HeaderParams,
        flush_threshold: usize,
    ) -> Result<Self> {
        if flush_threshold == 0 {
            return Err(TilerError::Configuration("flush threshold must be at least one row".to_string()));
        }
        buffer_len(format.width(), flush_threshold)?;

        create_dir_all(output_folder)?;

        let tiles = grid.tiles().map(|tile_idx| {
            let path = output_folder.join(format!("tile_{}_{}.{}", tile_idx[0], tile_idx[1], file_format.extension()));
            TileBuffer::open(path, file_format, &format, header, flush_threshold)
        }).collect::<Result<Vec<_>>>()?;

        let num_tiles = grid.num_tiles();
        log::info!(
            "opened {} x {} tiles of {:?} in {:?} (flush threshold {} points)",
            num_tiles[0], num_tiles[1], grid.tile_size(), output_folder, flush_threshold
        );

        Ok(Self {
            grid,
            format,
            file_format,
            tiles,
            discarded: 0,
            closed: false,
        })
    }

    /// 点を追加します。
    ///
    /// `rows`は[`PointFormat`]の列順に並んだ行の平坦な配列です。
    /// 各点は平面座標から求めたタイルに振り分けられ、境界の外の点は最も近い端のタイルに入ります。
    /// 平面座標が有限でない点は捨てられます。
    pub fn add_points(&mut self, rows: &[f64]) -> Result<()> {
        if self.closed {
            return Err(TilerError::Closed);
        }

        let width = self.format.width();
        check_width(rows, width)?;

        if rows.is_empty() {
            return Ok(());
        }

        let indices = self.tile_indices(rows);

        let mut buckets = FxHashMap::<usize, Vec<f64>>::default();
        let mut discarded = 0;
        rows.chunks_exact(width).zip(indices).for_each(|(row, index)| match index {
            Some(index) => buckets.entry(index).or_default().extend_from_slice(row),
            None => discarded += 1,
        });

        if discarded > 0 {
            log::debug!("discarded {} points with non-finite coordinates", discarded);
            self.discarded += discarded;
        }

        for (index, bucket) in buckets {
            self.tiles[index].add_points(&bucket)?;
        }

        Ok(())
    }

    fn tile_indices(&self, rows: &[f64]) -> Vec<Option<usize>> {
        let width = self.format.width();
        let grid = &self.grid;
        let locate = |row: &[f64]| grid.tile_index(row[0], row[1]).map(|tile_idx| grid.flat_index(tile_idx));

        #[cfg(feature = "rayon")]
        let indices = rows.par_chunks_exact(width).map(locate).collect();

        #[cfg(not(feature = "rayon"))]
        let indices = rows.chunks_exact(width).map(locate).collect();

        indices
    }

    /// すべてのタイルを閉じます。
    /// 点が1つも書き出されなかったタイルのファイルは削除されます。
    /// 2回目以降の呼び出しは何もしません。
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        // 失敗したタイルがあっても残りのタイルは閉じる
        let mut first_error = None;
        for tile in self.tiles.iter_mut() {
            if let Err(e) = tile.close() {
                log::warn!("failed to close tile {:?}: {}", tile.path(), e);
                first_error.get_or_insert(e);
            }
        }
        self.closed = true;

        if let Some(e) = first_error {
            return Err(e);
        }

        let written_tiles = self.tiles.iter().filter(|t| t.points_written() > 0).count();
        log::info!(
            "closed tile writer: {} points in {} of {} tiles, {} points discarded",
            self.points_written(), written_tiles, self.tiles.len(), self.discarded_points()
        );

        Ok(())
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn format(&self) -> &PointFormat {
        &self.format
    }

    pub fn file_format(&self) -> FileFormat {
        self.file_format
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 指定した位置のタイルを返します。
    pub fn tile(&self, x: usize, y: usize) -> Option<&TileBuffer> {
        let num_tiles = self.grid.num_tiles();
        if x >= num_tiles[0] || y >= num_tiles[1] {
            return None;
        }
        self.tiles.get(self.grid.flat_index(TileIdx::new([x, y])))
    }

    /// 指定した位置のタイルに書き出した点の数です。
    pub fn tile_points(&self, x: usize, y: usize) -> Option<u64> {
        self.tile(x, y).map(TileBuffer::points_written)
    }

    /// 指定した位置のタイルの出力先です。
    pub fn tile_path(&self, x: usize, y: usize) -> Option<&Path> {
        self.tile(x, y).map(TileBuffer::path)
    }

    /// 全タイルを、位置とともに返します。
    pub fn tiles(&self) -> impl Iterator<Item = (TileIdx, &TileBuffer)> + '_ {
        self.grid.tiles().zip(self.tiles.iter())
    }

    /// 全タイルに書き出した点の合計です。
    pub fn points_written(&self) -> u64 {
        self.tiles.iter().map(TileBuffer::points_written).sum()
    }

    /// 全タイルのバッファに保持している点の合計です。
    pub fn buffered_points(&self) -> usize {
        self.tiles.iter().map(TileBuffer::len).sum()
    }

    /// 座標や属性が有限でないために捨てた点の合計です。
    pub fn discarded_points(&self) -> u64 {
        self.discarded + self.tiles.iter().map(TileBuffer::discarded).sum::<u64>()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::format::{PointField, FieldRole, ScalarKind, FORMAT_XYZ, FORMAT_XYZC, X, Y, Z};
    use crate::io::{read_point_cloud, ReadOptions};

    fn txt_writer(dir: &Path, format: PointFormat, num_tiles: [usize; 2], flush_threshold: usize) -> TileWriter {
        TileWriter::builder(dir, format)
            .file_format(FileFormat::Txt)
            .bbox([0., 0.], [100., 100.])
            .num_tiles(num_tiles)
            .flush_threshold(flush_threshold)
            .build()
            .unwrap()
    }

    #[test]
    fn test_example_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = txt_writer(dir.path(), FORMAT_XYZ, [2, 2], 3);

        writer.add_points(&[1., 1., 0., 1., 1., 0.]).unwrap();
        writer.add_points(&[60., 60., 0.]).unwrap();
        writer.add_points(&[1., 1., 0., 1., 1., 0., 1., 1., 0.]).unwrap();
        writer.close().unwrap();

        let tile_00 = writer.tile(0, 0).unwrap();
        assert_eq!(tile_00.points_written(), 5);
        assert_eq!(tile_00.flushes(), 2);
        assert_eq!(writer.tile(1, 1).unwrap().points_written(), 1);

        assert_eq!(writer.tile_points(1, 0), Some(0));
        assert_eq!(writer.tile_path(1, 1), Some(dir.path().join("tile_1_1.txt").as_path()));
        assert!(dir.path().join("tile_0_0.txt").exists());
        assert!(dir.path().join("tile_1_1.txt").exists());
        assert!(!dir.path().join("tile_0_1.txt").exists());
        assert!(!dir.path().join("tile_1_0.txt").exists());
        assert_eq!(writer.points_written(), 6);
    }

    #[test]
    fn test_files_are_opened_eagerly() {
        let dir = tempfile::tempdir().unwrap();
        let writer = txt_writer(dir.path(), FORMAT_XYZ, [3, 2], 10);

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 6);
        assert!(dir.path().join("tile_2_1.txt").exists());
        assert!(writer.tile(3, 0).is_none());
    }

    #[test]
    fn test_exclusive_assignment() {
        let dir = tempfile::tempdir().unwrap();
        let id = PointField { name: "id", role: FieldRole::Intensity, kind: ScalarKind::U32 };
        let format = PointFormat::new(vec![X, Y, Z, id]).unwrap();
        let mut writer = txt_writer(dir.path(), format, [4, 3], 7);

        // 格子の境目と範囲外を含む点列
        let mut rows = Vec::new();
        for i in 0..500 {
            let x = (i % 25) as f64 * 5. - 10.;
            let y = (i / 25) as f64 * 6.25 - 5.;
            rows.extend([x, y, 0., i as f64]);
        }
        rows.chunks(4 * 33).for_each(|batch| writer.add_points(batch).unwrap());
        writer.close().unwrap();

        let mut seen = vec![0; 500];
        for (tile_idx, tile) in writer.tiles() {
            if tile.points_written() == 0 {
                assert!(!tile.path().exists());
                continue;
            }

            let text = std::fs::read_to_string(tile.path()).unwrap();
            for line in text.lines().skip(1) {
                let values = line.split(',').map(|v| v.parse::<f64>().unwrap()).collect::<Vec<_>>();
                let expected = writer.grid().tile_index(values[0], values[1]).unwrap();
                assert_eq!(expected, tile_idx);
                seen[values[3] as usize] += 1;
            }
        }

        assert!(seen.iter().all(|&count| count == 1));
        assert_eq!(writer.points_written(), 500);
    }

    #[test]
    fn test_non_finite_rows_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = txt_writer(dir.path(), FORMAT_XYZC, [2, 2], 100);

        writer.add_points(&[
            f64::NAN, 1., 0., 0.,
            1., 1., f64::NAN, 0.,
            1., 1., 1., f64::INFINITY,
            1., 1., 1., 1.,
        ]).unwrap();
        writer.close().unwrap();

        assert_eq!(writer.points_written(), 1);
        assert_eq!(writer.discarded_points(), 3);

        let cloud = read_point_cloud(&dir.path().join("tile_0_0.txt"), &ReadOptions::default()).unwrap();
        assert_eq!(cloud.rows, vec![1., 1., 1.]);
    }

    #[test]
    fn test_bounded_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = txt_writer(dir.path(), FORMAT_XYZ, [2, 2], 4);

        for n in [1, 3, 9, 1, 1, 17, 2] {
            let rows = (0..n).flat_map(|i| [(i * 13 % 100) as f64, (i * 29 % 100) as f64, 0.]).collect::<Vec<_>>();
            writer.add_points(&rows).unwrap();

            assert!(writer.tiles().all(|(_, tile)| tile.len() <= 4));
            assert!(writer.buffered_points() <= 4 * 4);
        }
        writer.close().unwrap();

        assert_eq!(writer.points_written(), 34);
        assert_eq!(writer.buffered_points(), 0);
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = txt_writer(dir.path(), FORMAT_XYZ, [1, 1], 4);

        writer.add_points(&[1., 1., 1.]).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();

        assert!(writer.is_closed());
        assert!(dir.path().join("tile_0_0.txt").exists());
        assert!(matches!(writer.add_points(&[1., 1., 1.]), Err(TilerError::Closed)));
    }

    #[test]
    fn test_row_width_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = txt_writer(dir.path(), FORMAT_XYZ, [1, 1], 4);

        let result = writer.add_points(&[1., 2., 3., 4.]);

        assert!(matches!(result, Err(TilerError::RowWidth { width: 3, len: 4 })));
        assert_eq!(writer.buffered_points(), 0);
    }

    #[test]
    fn test_oversized_flush_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("tiles");

        let result = TileWriter::builder(&output, FORMAT_XYZ)
            .file_format(FileFormat::Txt)
            .bbox([0., 0.], [1., 1.])
            .flush_threshold(usize::MAX / 2)
            .build();

        assert!(matches!(result, Err(TilerError::Configuration(_))));
        assert!(!output.exists());
    }

    #[cfg(feature = "las")]
    #[test]
    fn test_las_out_of_range_point_is_an_error() {
        let dir = tempfile::tempdir().unwrap();

        // 既定の精度ではオフセットから約2147以上離れた座標を表現できない
        let mut writer = TileWriter::builder(dir.path(), FORMAT_XYZ)
            .file_format(FileFormat::Las)
            .bbox([480_000., 5_400_000.], [480_100., 5_400_100.])
            .num_tiles([2, 1])
            .flush_threshold(8)
            .build()
            .unwrap();

        writer.add_points(&[480_010., 5_400_010., 0., 480_090., 5_400_010., 0.]).unwrap();

        assert!(matches!(writer.close(), Err(TilerError::Las(_))));
        assert!(writer.is_closed());
        assert!(writer.close().is_ok());
        drop(writer);
    }

    #[test]
    fn test_configuration_error_opens_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("tiles");

        let result = TileWriter::builder(&output, FORMAT_XYZ)
            .file_format(FileFormat::Txt)
            .bbox([3., 3.], [3., 3.])
            .tile_size(1.)
            .build();

        assert!(matches!(result, Err(TilerError::Configuration(_))));
        assert!(!output.exists());
    }
}
