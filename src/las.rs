use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use las::point::Format;
use las::{Builder, Color, Point, Read, Reader, Transform, Vector, Vlr, Write, Writer};
use num::cast::AsPrimitive;

use crate::error::Result;
use crate::format::{FieldRole, PointFormat, ScalarKind};
use crate::io::{HeaderParams, PointSink};

// 追加次元の書き出し順
const EXTRA_DIMENSIONS: [FieldRole; 3] = [FieldRole::Semantic, FieldRole::Instance, FieldRole::Change];

/// 点の列とLASの各項目の対応です。
#[derive(Clone, Debug)]
struct LasLayout {
    width: usize,
    color: Option<[usize; 3]>,
    intensity: Option<usize>,
    extra: Vec<(usize, ScalarKind)>,
}

impl LasLayout {
    fn new(format: &PointFormat) -> Self {
        let color = match (format.index_of(FieldRole::Red), format.index_of(FieldRole::Green), format.index_of(FieldRole::Blue)) {
            (Some(r), Some(g), Some(b)) => Some([r, g, b]),
            _ => None,
        };

        let extra = EXTRA_DIMENSIONS.iter()
            .filter_map(|&role| format.index_of(role).map(|i| (i, format.fields()[i].kind)))
            .collect();

        Self {
            width: format.width(),
            color,
            intensity: format.index_of(FieldRole::Intensity),
            extra,
        }
    }

    fn extra_bytes_len(&self) -> usize {
        self.extra.iter().map(|(_, kind)| kind.size_of()).sum()
    }

    fn to_point(&self, row: &[f64]) -> Point {
        // 点形式2は色を必須とするため、色列がない場合は黒で埋める
        let color = match self.color {
            Some([r, g, b]) => Color::new(row[r].as_(), row[g].as_(), row[b].as_()),
            None => Color::new(0, 0, 0),
        };

        let mut extra_bytes: Vec<u8> = Vec::with_capacity(self.extra_bytes_len());
        self.extra.iter().for_each(|&(i, kind)| match kind {
            ScalarKind::U8 => extra_bytes.push(row[i].as_()),
            ScalarKind::U16 => extra_bytes.extend(AsPrimitive::<u16>::as_(row[i]).to_le_bytes()),
            ScalarKind::U32 => extra_bytes.extend(AsPrimitive::<u32>::as_(row[i]).to_le_bytes()),
            ScalarKind::F32 => extra_bytes.extend(AsPrimitive::<f32>::as_(row[i]).to_le_bytes()),
        });

        Point {
            x: row[0],
            y: row[1],
            z: row[2],
            intensity: self.intensity.map(|i| AsPrimitive::<u16>::as_(row[i])).unwrap_or(0),
            color: Some(color),
            extra_bytes,
            ..Default::default()
        }
    }
}

/// Extra Bytes VLR(LASF_Spec, record 4)の1項目を組み立てます。
fn extra_bytes_descriptor(name: &str, kind: ScalarKind) -> [u8; 192] {
    let mut descriptor = [0u8; 192];

    descriptor[2] = match kind {
        ScalarKind::U8 => 1,
        ScalarKind::U16 => 3,
        ScalarKind::U32 => 5,
        ScalarKind::F32 => 9,
    };

    let name = name.as_bytes();
    let len = name.len().min(32);
    descriptor[4..4 + len].copy_from_slice(&name[..len]);

    descriptor
}

fn build_header(format: &PointFormat, layout: &LasLayout, params: &HeaderParams) -> Result<las::Header> {
    let mut builder = Builder::from((1, 4));

    let mut point_format = Format::new(2)?;
    point_format.extra_bytes = layout.extra_bytes_len() as u16;
    builder.point_format = point_format;

    let scales = params.scales();
    let offsets = params.offsets;
    builder.transforms = Vector {
        x: Transform { scale: scales[0], offset: offsets[0] },
        y: Transform { scale: scales[1], offset: offsets[1] },
        z: Transform { scale: scales[2], offset: offsets[2] },
    };

    if !layout.extra.is_empty() {
        let data = layout.extra.iter()
            .flat_map(|&(i, kind)| extra_bytes_descriptor(format.fields()[i].name, kind))
            .collect::<Vec<_>>();

        builder.vlrs.push(Vlr {
            user_id: "LASF_Spec".to_string(),
            record_id: 4,
            description: "Extra Bytes Record".to_string(),
            data,
        });
    }

    Ok(builder.into_header()?)
}

/// LAS/LAZファイルに点を書き出す出力先です。
/// 拡張子が`.laz`の場合は圧縮して書き出します。
/// 書き込みに失敗した場合でも、ライターは`close`で明示的に閉じられます。
pub struct LasSink {
    writer: Option<Writer<BufWriter<File>>>,
    transforms: Vector<Transform>,
    layout: LasLayout,
}

impl LasSink {
    pub fn create(path: &Path, format: &PointFormat, params: &HeaderParams) -> Result<Self> {
        let layout = LasLayout::new(format);
        let header = build_header(format, &layout, params)?;
        let transforms = *header.transforms();
        let writer = Writer::from_path(path, header)?;

        Ok(Self {
            writer: Some(writer),
            transforms,
            layout,
        })
    }

    /// 座標がヘッダーのスケールとオフセットでi32に収まるかを確認します。
    fn check_transform(&self, row: &[f64]) -> Result<()> {
        self.transforms.x.inverse(row[0])?;
        self.transforms.y.inverse(row[1])?;
        self.transforms.z.inverse(row[2])?;
        Ok(())
    }
}

impl PointSink for LasSink {
    fn write_rows(&mut self, rows: &[f64]) -> Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }

        // 書き込む前にすべての点を検査する
        for row in rows.chunks_exact(self.layout.width) {
            self.check_transform(row)?;
        }

        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        for row in rows.chunks_exact(self.layout.width) {
            if let Err(e) = writer.write(self.layout.to_point(row)) {
                // 閉じていないライターはDropでパニックする
                if let Some(mut writer) = self.writer.take() {
                    if let Err(close_error) = writer.close() {
                        log::debug!("failed to close LAS writer after a write error: {}", close_error);
                    }
                }
                return Err(e.into());
            }
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.close()?;
        }
        Ok(())
    }
}

/// LAS/LAZファイルをヘッダーのオフセットを無視したローカル座標で読み込みます。
/// 大きなオフセットを持つ座標の精度低下を避けるためです。
/// `change`の追加次元がある場合は4列目として返します。
pub fn read_las_in_local_crs(path: &Path) -> Result<(Vec<f64>, usize)> {
    let mut reader = Reader::from_path(path)?;

    let transforms = *reader.header().transforms();
    let change = change_byte_offset(reader.header().vlrs());
    let width = if change.is_some() { 4 } else { 3 };

    let mut rows = Vec::new();
    for point in reader.points() {
        let point = point?;
        rows.push(point.x - transforms.x.offset);
        rows.push(point.y - transforms.y.offset);
        rows.push(point.z - transforms.z.offset);
        if let Some(offset) = change {
            rows.push(point.extra_bytes.get(offset).copied().map(f64::from).unwrap_or(f64::NAN));
        }
    }

    Ok((rows, width))
}

/// Extra Bytes VLRから`change`次元の先頭位置を探します。
fn change_byte_offset(vlrs: &[Vlr]) -> Option<usize> {
    let vlr = vlrs.iter().find(|v| v.user_id.trim_end_matches('\0') == "LASF_Spec" && v.record_id == 4)?;

    let mut offset = 0;
    for descriptor in vlr.data.chunks_exact(192) {
        let name_end = descriptor[4..36].iter().position(|&b| b == 0).unwrap_or(32);
        let name = &descriptor[4..4 + name_end];

        let size = match descriptor[2] {
            1 | 2 => 1,
            3 | 4 => 2,
            5 | 6 | 9 => 4,
            7 | 8 | 10 => 8,
            // 型が未定義の場合はoptionsにバイト数が入る
            0 => descriptor[3] as usize,
            _ => return None,
        };

        if name == b"change" {
            return Some(offset);
        }
        offset += size;
    }

    None
}
