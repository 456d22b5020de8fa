use std::borrow::Cow;

use num::cast::AsPrimitive;

use crate::error::{Result, TilerError};

/// 点の各列が表す意味です。
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldRole {
    X,
    Y,
    Z,
    Red,
    Green,
    Blue,
    Intensity,
    Semantic,
    Instance,
    Change,
}

/// 各列の保存時の数値型です。
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    F32,
    U8,
    U16,
    U32,
}

impl ScalarKind {
    /// 値をこの型に変換した結果を返します。
    /// 整数型では小数部が切り捨てられ、範囲外の値は飽和します。
    pub fn quantize(self, value: f64) -> f64 {
        match self {
            ScalarKind::F32 => AsPrimitive::<f32>::as_(value) as f64,
            ScalarKind::U8 => AsPrimitive::<u8>::as_(value) as f64,
            ScalarKind::U16 => AsPrimitive::<u16>::as_(value) as f64,
            ScalarKind::U32 => AsPrimitive::<u32>::as_(value) as f64,
        }
    }

    /// 1値あたりのバイト数です。
    pub fn size_of(self) -> usize {
        match self {
            ScalarKind::U8 => 1,
            ScalarKind::U16 => 2,
            ScalarKind::F32 | ScalarKind::U32 => 4,
        }
    }
}

/// 点群の1列を表す構造体です。
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PointField {
    pub name: &'static str,
    pub role: FieldRole,
    pub kind: ScalarKind,
}

pub const X: PointField = PointField { name: "X", role: FieldRole::X, kind: ScalarKind::F32 };
pub const Y: PointField = PointField { name: "Y", role: FieldRole::Y, kind: ScalarKind::F32 };
pub const Z: PointField = PointField { name: "Z", role: FieldRole::Z, kind: ScalarKind::F32 };
pub const RED: PointField = PointField { name: "red", role: FieldRole::Red, kind: ScalarKind::U8 };
pub const GREEN: PointField = PointField { name: "green", role: FieldRole::Green, kind: ScalarKind::U8 };
pub const BLUE: PointField = PointField { name: "blue", role: FieldRole::Blue, kind: ScalarKind::U8 };
pub const INTENSITY: PointField = PointField { name: "intensity", role: FieldRole::Intensity, kind: ScalarKind::U32 };
pub const CHANGE: PointField = PointField { name: "change", role: FieldRole::Change, kind: ScalarKind::U8 };
pub const SEMANTIC: PointField = PointField { name: "semantic", role: FieldRole::Semantic, kind: ScalarKind::U8 };
pub const INSTANCE: PointField = PointField { name: "instance", role: FieldRole::Instance, kind: ScalarKind::U16 };

/// 点の列構成を表す構造体です。
///
/// 先頭の3列は必ず`X`,`Y`,`Z`の順に並びます。
/// 列の順序はバッファ内の並びと出力時の並びの両方を決定します。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointFormat {
    fields: Cow<'static, [PointField]>,
}

pub const FORMAT_XYZ: PointFormat = PointFormat::from_static(&[X, Y, Z]);
pub const FORMAT_XYZI: PointFormat = PointFormat::from_static(&[X, Y, Z, INTENSITY]);
pub const FORMAT_XYZC: PointFormat = PointFormat::from_static(&[X, Y, Z, CHANGE]);
pub const FORMAT_XYZRGB: PointFormat = PointFormat::from_static(&[X, Y, Z, RED, GREEN, BLUE]);
pub const FORMAT_XYZRGBC: PointFormat = PointFormat::from_static(&[X, Y, Z, RED, GREEN, BLUE, CHANGE]);
pub const FORMAT_XYZRGBS: PointFormat = PointFormat::from_static(&[X, Y, Z, RED, GREEN, BLUE, SEMANTIC]);
pub const FORMAT_XYZRGBSC: PointFormat = PointFormat::from_static(&[X, Y, Z, RED, GREEN, BLUE, SEMANTIC, CHANGE]);
pub const FORMAT_XYZRGBSIC: PointFormat = PointFormat::from_static(&[X, Y, Z, RED, GREEN, BLUE, SEMANTIC, INSTANCE, CHANGE]);

impl PointFormat {
    // 定義済みの書式専用。検証は単体テストで行う。
    const fn from_static(fields: &'static [PointField]) -> Self {
        Self { fields: Cow::Borrowed(fields) }
    }

    /// 列のリストから書式を生成します。
    ///
    /// # Errors
    ///
    /// + 先頭の3列が`X`,`Y`,`Z`でない場合
    /// + 同じ役割の列が複数ある場合
    pub fn new(fields: Vec<PointField>) -> Result<Self> {
        let roles = fields.iter().map(|f| f.role).collect::<Vec<_>>();

        if roles.len() < 3 || roles[..3] != [FieldRole::X, FieldRole::Y, FieldRole::Z] {
            return Err(TilerError::Configuration(
                "point format must start with the X, Y and Z fields".to_string(),
            ));
        }

        if roles.iter().enumerate().any(|(i, role)| roles[..i].contains(role)) {
            return Err(TilerError::Configuration(
                "point format contains the same field twice".to_string(),
            ));
        }

        Ok(Self { fields: Cow::Owned(fields) })
    }

    pub fn fields(&self) -> &[PointField] {
        &self.fields
    }

    /// 1点あたりの列数です。
    pub fn width(&self) -> usize {
        self.fields.len()
    }

    pub fn index_of(&self, role: FieldRole) -> Option<usize> {
        self.fields.iter().position(|f| f.role == role)
    }

    pub fn contains(&self, role: FieldRole) -> bool {
        self.index_of(role).is_some()
    }

    /// テキスト出力用のヘッダー行(列名のカンマ区切り)を返します。
    pub fn txt_header(&self) -> String {
        self.fields.iter().map(|f| f.name).collect::<Vec<_>>().join(",")
    }
}
