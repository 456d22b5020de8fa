use std::fs::create_dir_all;
use std::path::{Path, PathBuf};

use vec_x::VecX;

use crate::error::{Result, TilerError};
use crate::format::PointFormat;
use crate::processing::{remove_duplicates, retain_finite};
use crate::txt::TxtSink;

/// 行単位で点を書き込む出力先を表すトレイトです。
///
/// 行は`PointFormat`の列順に並んだ`f64`の平坦な配列として渡されます。
/// 実装は追記のみを行い、`close`で出力を確定させます。
pub trait PointSink {
    /// 行を追記します。`rows.len()`は列数の倍数です。
    fn write_rows(&mut self, rows: &[f64]) -> Result<()>;

    /// 出力を確定させ、ファイルを閉じます。
    fn close(&mut self) -> Result<()>;
}

/// 出力ファイルの形式です。
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FileFormat {
    Las,
    Laz,
    Ply,
    Txt,
}

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Las => "las",
            FileFormat::Laz => "laz",
            FileFormat::Ply => "ply",
            FileFormat::Txt => "txt",
        }
    }

    /// 拡張子から形式を判定します。
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "las" => Some(FileFormat::Las),
            "laz" => Some(FileFormat::Laz),
            "ply" => Some(FileFormat::Ply),
            "txt" | "xyz" => Some(FileFormat::Txt),
            _ => None,
        }
    }

    /// `path`に書き込む出力先を開きます。
    /// 有効になっていないfeatureの形式を指定した場合は[`TilerError::UnsupportedFormat`]を返します。
    #[cfg_attr(not(feature = "las"), allow(unused_variables))]
    pub fn open_sink(self, path: &Path, format: &PointFormat, header: &HeaderParams) -> Result<Box<dyn PointSink>> {
        match self {
            #[cfg(feature = "las")]
            FileFormat::Las | FileFormat::Laz => Ok(Box::new(crate::las::LasSink::create(path, format, header)?)),
            #[cfg(feature = "ply")]
            FileFormat::Ply => Ok(Box::new(crate::ply::PlySink::create(path, format)?)),
            FileFormat::Txt => Ok(Box::new(TxtSink::create(path, format)?)),
            #[allow(unreachable_patterns)]
            _ => Err(TilerError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

impl Default for FileFormat {
    fn default() -> Self {
        if cfg!(feature = "laz") {
            FileFormat::Laz
        } else if cfg!(feature = "las") {
            FileFormat::Las
        } else {
            FileFormat::Txt
        }
    }
}

/// LAS/LAZヘッダーに書き込む座標変換のパラメータです。
///
/// 保存される整数値は`(座標 - offset) / scale`になります。
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HeaderParams {
    pub offsets: VecX<f64, 3>,
    /// 1単位あたりの分割数。スケールはこの逆数です。
    pub precision: f64,
}

impl HeaderParams {
    pub fn scales(&self) -> VecX<f64, 3> {
        VecX::new([1. / self.precision; 3])
    }
}

impl Default for HeaderParams {
    fn default() -> Self {
        Self {
            offsets: VecX::new([0., 0., 0.]),
            precision: 1_000_000.,
        }
    }
}

/// メモリ上の点群を1つのファイルに書き出します。
/// 出力先は`folder/file_stem.<拡張子>`です。点が1つもない場合は何も書き出しません。
pub fn write_point_cloud(
    rows: &[f64],
    folder: &Path,
    file_stem: &str,
    file_format: FileFormat,
    format: &PointFormat,
    header: &HeaderParams,
) -> Result<Option<PathBuf>> {
    check_width(rows, format.width())?;

    if rows.is_empty() {
        log::warn!("point cloud {} is empty, nothing written", file_stem);
        return Ok(None);
    }

    create_dir_all(folder)?;
    let path = folder.join(format!("{}.{}", file_stem, file_format.extension()));

    let mut sink = file_format.open_sink(&path, format, header)?;
    sink.write_rows(rows)?;
    sink.close()?;

    Ok(Some(path))
}

/// 評価用に点群を読み込む際の設定です。
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ReadOptions {
    /// LAS/LAZ以外の形式で読み込んだ座標に加算する値です。
    pub position_offset: [f64; 3],
    /// 重複する行を取り除くかどうか。
    pub remove_duplicates: bool,
}

/// 読み込んだ点群です。`rows`は`width`列の平坦な配列です。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadedPointCloud {
    pub rows: Vec<f64>,
    pub width: usize,
}

impl LoadedPointCloud {
    pub fn len(&self) -> usize {
        if self.width == 0 { 0 } else { self.rows.len() / self.width }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.rows[i * self.width..(i + 1) * self.width]
    }
}

/// 点群ファイルから座標を読み込みます。
///
/// LAS/LAZではヘッダーのオフセットを無視したローカル座標を返し、
/// `change`の追加次元があれば4列目として返します。
/// PLYとテキストでは先頭3列を座標として読み、`position_offset`を加算します。
/// 非数を含む行は取り除かれます。
pub fn read_point_cloud(path: &Path, options: &ReadOptions) -> Result<LoadedPointCloud> {
    let format = FileFormat::from_path(path).ok_or_else(|| TilerError::UnsupportedFormat(path.to_path_buf()))?;

    let (mut rows, width) = match format {
        #[cfg(feature = "las")]
        FileFormat::Las | FileFormat::Laz => crate::las::read_las_in_local_crs(path)?,
        #[cfg(feature = "ply")]
        FileFormat::Ply => (apply_offset(crate::ply::read_ply_positions(path)?, options), 3),
        FileFormat::Txt => (apply_offset(crate::txt::read_txt_positions(path)?, options), 3),
        #[allow(unreachable_patterns)]
        _ => return Err(TilerError::UnsupportedFormat(path.to_path_buf())),
    };

    retain_finite(&mut rows, width);

    if options.remove_duplicates {
        rows = remove_duplicates(&rows, width);
    }

    Ok(LoadedPointCloud { rows, width })
}

/// 複数の点群ファイルを読み込み、1つに結合します。
/// 列数が一致しない場合は座標の3列のみを結合します。
pub fn read_and_merge_point_clouds<P: AsRef<Path>>(paths: &[P], options: &ReadOptions) -> Result<LoadedPointCloud> {
    let parts = paths.iter()
        .map(|path| read_point_cloud(path.as_ref(), options))
        .collect::<Result<Vec<_>>>()?;

    let width = match parts.first() {
        Some(first) if parts.iter().all(|p| p.width == first.width) => first.width,
        Some(_) => 3,
        None => return Ok(LoadedPointCloud { rows: Vec::new(), width: 3 }),
    };

    let rows = parts.iter()
        .flat_map(|part| part.rows.chunks_exact(part.width).flat_map(|row| &row[..width]))
        .copied()
        .collect();

    Ok(LoadedPointCloud { rows, width })
}

fn apply_offset(mut rows: Vec<f64>, options: &ReadOptions) -> Vec<f64> {
    rows.chunks_exact_mut(3).for_each(|row| {
        row.iter_mut().zip(options.position_offset).for_each(|(v, offset)| *v += offset);
    });
    rows
}

pub(crate) fn check_width(rows: &[f64], width: usize) -> Result<()> {
    if rows.len() % width != 0 {
        return Err(TilerError::RowWidth { width, len: rows.len() });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::format::{FORMAT_XYZ, FORMAT_XYZC};

    #[test]
    fn test_file_format_from_path() {
        assert_eq!(FileFormat::from_path(Path::new("a/tile_0_1.LAZ")), Some(FileFormat::Laz));
        assert_eq!(FileFormat::from_path(Path::new("scan.xyz")), Some(FileFormat::Txt));
        assert_eq!(FileFormat::from_path(Path::new("scan.pcd")), None);
        assert_eq!(FileFormat::from_path(Path::new("scan")), None);
    }

    #[test]
    fn test_header_scales() {
        let header = HeaderParams { precision: 1000., ..Default::default() };
        assert_eq!(header.scales(), VecX::new([0.001, 0.001, 0.001]));
    }

    #[test]
    fn test_write_point_cloud_skips_empty() {
        let dir = tempfile::tempdir().unwrap();

        let written = write_point_cloud(&[], dir.path(), "empty", FileFormat::Txt, &FORMAT_XYZ, &HeaderParams::default()).unwrap();

        assert!(written.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_write_point_cloud_rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();

        let result = write_point_cloud(&[1., 2.], dir.path(), "ragged", FileFormat::Txt, &FORMAT_XYZ, &HeaderParams::default());

        assert!(matches!(result, Err(TilerError::RowWidth { width: 3, len: 2 })));
    }

    #[test]
    fn test_txt_round_trip_with_offset_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let rows = [1., 2., 3., 1., 1., 2., 3., 1., 4., 5., 6., 0.];

        let path = write_point_cloud(&rows, dir.path(), "cloud", FileFormat::Txt, &FORMAT_XYZC, &HeaderParams::default())
            .unwrap()
            .unwrap();

        let options = ReadOptions { position_offset: [10., 0., 0.], remove_duplicates: true };
        let cloud = read_point_cloud(&path, &options).unwrap();

        assert_eq!(cloud.width, 3);
        assert_eq!(cloud.rows, vec![11., 2., 3., 14., 5., 6.]);
    }

    #[test]
    fn test_read_unknown_extension() {
        let result = read_point_cloud(Path::new("cloud.e57"), &ReadOptions::default());
        assert!(matches!(result, Err(TilerError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_read_and_merge() {
        let dir = tempfile::tempdir().unwrap();
        let header = HeaderParams::default();

        let a = write_point_cloud(&[0., 0., 0.], dir.path(), "a", FileFormat::Txt, &FORMAT_XYZ, &header).unwrap().unwrap();
        let b = write_point_cloud(&[1., 1., 1., 2., 2., 2.], dir.path(), "b", FileFormat::Txt, &FORMAT_XYZ, &header).unwrap().unwrap();

        let merged = read_and_merge_point_clouds(&[a, b], &ReadOptions::default()).unwrap();

        assert_eq!(merged.len(), 3);
        assert_eq!(merged.row(2), &[2., 2., 2.]);
    }
}
