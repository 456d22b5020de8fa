use std::fs::{remove_file, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use num::cast::AsPrimitive;
use ply_rs::parser::Parser;
use ply_rs::ply::{Addable, DefaultElement, ElementDef, Encoding, Header, Property, PropertyAccess, PropertyDef, PropertyType, ScalarType};
use ply_rs::ply::Property::{Double, Float};
use ply_rs::writer::Writer;

use crate::error::Result;
use crate::format::{FieldRole, PointFormat, ScalarKind};
use crate::io::PointSink;

/// Plyファイルにおける1つの頂点の座標を表す構造体
#[derive(Copy, Clone, Debug, Default, PartialEq)]
struct Vertex {
    x: f64,
    y: f64,
    z: f64,
}

impl PropertyAccess for Vertex {
    fn new() -> Self {
        Vertex::default()
    }

    fn set_property(&mut self, key: String, property: Property) {
        match (key.as_ref(), property) {
            ("x", Float(v)) => self.x = v as f64,
            ("y", Float(v)) => self.y = v as f64,
            ("z", Float(v)) => self.z = v as f64,
            ("x", Double(v)) => self.x = v,
            ("y", Double(v)) => self.y = v,
            ("z", Double(v)) => self.z = v,
            _ => {}
        }
    }
}

/// 点の列に対応するplyのプロパティ名です。
/// 座標は慣例に合わせて小文字にします。
fn property_name(role: FieldRole, name: &str) -> String {
    match role {
        FieldRole::X => "x".to_string(),
        FieldRole::Y => "y".to_string(),
        FieldRole::Z => "z".to_string(),
        _ => name.to_string(),
    }
}

fn scalar_type(kind: ScalarKind) -> ScalarType {
    match kind {
        ScalarKind::F32 => ScalarType::Float,
        ScalarKind::U8 => ScalarType::UChar,
        ScalarKind::U16 => ScalarType::UShort,
        ScalarKind::U32 => ScalarType::UInt,
    }
}

fn to_property(kind: ScalarKind, value: f64) -> Property {
    match kind {
        ScalarKind::F32 => Float(value.as_()),
        ScalarKind::U8 => Property::UChar(value.as_()),
        ScalarKind::U16 => Property::UShort(value.as_()),
        ScalarKind::U32 => Property::UInt(value.as_()),
    }
}

/// バイナリ形式(リトルエンディアン)のplyファイルに点を書き出す出力先です。
///
/// plyのヘッダーには頂点数が必要ですが、書き出し中は総数が分からないため、
/// ペイロードを`<path>.part`に書き溜め、`close`時にヘッダーと結合します。
pub struct PlySink {
    path: PathBuf,
    part_path: PathBuf,
    part: Option<BufWriter<File>>,
    header: Header,
    properties: Vec<(String, ScalarKind)>,
    count: usize,
}

impl PlySink {
    pub fn create(path: &Path, format: &PointFormat) -> Result<Self> {
        let properties = format.fields().iter()
            .map(|f| (property_name(f.role, f.name), f.kind))
            .collect::<Vec<_>>();

        let mut header = Header::new();
        header.encoding = Encoding::BinaryLittleEndian;

        let mut vertex_element = ElementDef::new("vertex".to_string());
        properties.iter()
            .map(|(name, kind)| PropertyDef::new(name.clone(), PropertyType::Scalar(scalar_type(*kind))))
            .for_each(|p| vertex_element.properties.add(p));
        header.elements.add(vertex_element);

        let mut part_path = path.as_os_str().to_owned();
        part_path.push(".part");
        let part_path = PathBuf::from(part_path);

        let part = BufWriter::new(File::create(&part_path)?);

        Ok(Self {
            path: path.to_path_buf(),
            part_path,
            part: Some(part),
            header,
            properties,
            count: 0,
        })
    }
}

impl PointSink for PlySink {
    fn write_rows(&mut self, rows: &[f64]) -> Result<()> {
        if self.part.is_none() {
            return Ok(());
        }

        let vertices = rows.chunks_exact(self.properties.len()).map(|row| {
            DefaultElement::from_iter(
                self.properties.iter().zip(row).map(|((name, kind), &value)| (name.clone(), to_property(*kind, value)))
            )
        }).collect::<Vec<_>>();

        let writer = Writer::<DefaultElement>::new();
        if let Some(part) = self.part.as_mut() {
            writer.write_payload_of_element(part, &vertices, &self.header.elements["vertex"], &self.header)?;
        }
        self.count += vertices.len();

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut part) = self.part.take() else {
            return Ok(());
        };
        part.flush()?;
        drop(part);

        if let Some(vertex) = self.header.elements.get_mut("vertex") {
            vertex.count = self.count;
        }

        let mut out = BufWriter::new(File::create(&self.path)?);
        Writer::<DefaultElement>::new().write_header(&mut out, &self.header)?;
        std::io::copy(&mut BufReader::new(File::open(&self.part_path)?), &mut out)?;
        out.flush()?;

        remove_file(&self.part_path)?;

        log::debug!("wrote {} vertices to {:?}", self.count, self.path);

        Ok(())
    }
}

/// plyファイルの頂点座標を読み込みます。
pub fn read_ply_positions(path: &Path) -> Result<Vec<f64>> {
    let mut buf_reader = BufReader::new(File::open(path)?);

    let vertex_parser = Parser::<Vertex>::new();
    let header = vertex_parser.read_header(&mut buf_reader)?;

    let mut rows = Vec::new();
    for (_, element) in header.elements.iter() {
        // vertex以外の要素も順に読み飛ばす必要がある
        let vertices = vertex_parser.read_payload_for_element(&mut buf_reader, element, &header)?;
        if element.name == "vertex" {
            vertices.into_iter().for_each(|Vertex { x, y, z }| rows.extend([x, y, z]));
        }
    }

    Ok(rows)
}
