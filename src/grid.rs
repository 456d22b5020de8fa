use vec_x::VecX;

use crate::error::{Result, TilerError};

/// 地表面上の2次元座標です。
pub type Point2D = VecX<f64, 2>;

/// タイルの格子上の位置`(x, y)`です。
pub type TileIdx = VecX<usize, 2>;

/// 地表面上の矩形範囲です。
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: Point2D,
    pub max: Point2D,
}

impl BoundingBox {
    pub fn new(min: [f64; 2], max: [f64; 2]) -> Self {
        Self { min: Point2D::new(min), max: Point2D::new(max) }
    }

    /// 軌跡などの座標列を包む範囲を計算します。
    /// 有限でない座標は無視します。
    pub fn from_points<I: IntoIterator<Item = [f64; 2]>>(points: I) -> Option<Self> {
        points.into_iter()
            .filter(|p| p.iter().all(|v| v.is_finite()))
            .fold(None, |bbox: Option<Self>, [x, y]| {
                Some(match bbox {
                    Some(b) => Self::new([b.min[0].min(x), b.min[1].min(y)], [b.max[0].max(x), b.max[1].max(y)]),
                    None => Self::new([x, y], [x, y]),
                })
            })
    }

    pub fn extent(&self) -> Point2D {
        Point2D::new([self.max[0] - self.min[0], self.max[1] - self.min[1]])
    }
}

/// タイル分割の指定方法です。
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Tiling {
    /// タイルの一辺の長さ(軸ごと)からタイル数を決定します。
    TileSize(Point2D),
    /// 軸ごとのタイル数からタイルの大きさを決定します。
    NumTiles(TileIdx),
}

/// 境界とタイル分割の指定から計算された格子です。
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TileGrid {
    num_tiles: TileIdx,
    tile_size: Point2D,
    bbox: BoundingBox,
}

impl TileGrid {
    /// 格子を計算します。
    /// `padding`を指定すると、各辺にその数だけタイルを追加し、境界を広げます。
    ///
    /// # Errors
    ///
    /// 境界が1点に縮退している場合や、タイルの大きさが正の有限値にならない場合は
    /// [`TilerError::Configuration`]を返します。
    pub fn new(bbox: BoundingBox, tiling: Tiling, padding: usize) -> Result<Self> {
        let extent = bbox.extent();

        if !(0..2).all(|a| bbox.min[a].is_finite() && bbox.max[a].is_finite()) {
            return Err(config_error(format!("bounding box must be finite: {:?}", bbox)));
        }
        if (0..2).any(|a| extent[a] < 0.) {
            return Err(config_error(format!("bounding box minimum exceeds maximum: {:?}", bbox)));
        }
        if (0..2).all(|a| extent[a] == 0.) {
            return Err(config_error(format!("bounding box is a single point: {:?}", bbox)));
        }

        let (num_tiles, tile_size) = match tiling {
            Tiling::TileSize(tile_size) => {
                if !(0..2).all(|a| tile_size[a].is_finite() && tile_size[a] > 0.) {
                    return Err(config_error(format!("tile size must be positive: {:?}", tile_size)));
                }

                let counts = [0, 1].map(|a| (extent[a] / tile_size[a]).ceil());
                if counts.iter().any(|&n| !(n.is_finite() && n < usize::MAX as f64)) {
                    return Err(config_error(format!("too many tiles for tile size {:?} over {:?}", tile_size, bbox)));
                }

                // 幅0の軸でも1タイルは確保する
                let num_tiles = TileIdx::new(counts.map(|n| (n as usize).max(1)));

                (num_tiles, tile_size)
            }
            Tiling::NumTiles(num_tiles) => {
                if (0..2).any(|a| num_tiles[a] == 0) {
                    return Err(config_error(format!("tile count must be at least one: {:?}", num_tiles)));
                }

                let tile_size = Point2D::new([0, 1].map(|a| extent[a] / num_tiles[a] as f64));

                if (0..2).any(|a| tile_size[a] <= 0.) {
                    return Err(config_error(format!("bounding box has no extent along an axis: {:?}", bbox)));
                }

                (num_tiles, tile_size)
            }
        };

        let padded = [0, 1].map(|a| padding.checked_mul(2).and_then(|p| num_tiles[a].checked_add(p)));
        let num_tiles = match padded {
            [Some(nx), Some(ny)] if nx.checked_mul(ny).is_some() => TileIdx::new([nx, ny]),
            _ => return Err(config_error(format!("tile count overflows: {:?} tiles with padding {}", num_tiles, padding))),
        };
        let bbox = BoundingBox::new(
            [0, 1].map(|a| bbox.min[a] - tile_size[a] * padding as f64),
            [0, 1].map(|a| bbox.max[a] + tile_size[a] * padding as f64),
        );

        Ok(Self { num_tiles, tile_size, bbox })
    }

    pub fn num_tiles(&self) -> TileIdx {
        self.num_tiles
    }

    pub fn tile_size(&self) -> Point2D {
        self.tile_size
    }

    /// パディングを含めた境界です。
    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// 格子に含まれるタイルの総数です。
    pub fn len(&self) -> usize {
        self.num_tiles[0] * self.num_tiles[1]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 座標が属するタイルを返します。
    ///
    /// 境界の外にある点は最も近い端のタイルに割り当てられます。
    /// タイルの境目上の点は、その境目を下端とするタイルに属します。
    /// 座標が有限でない場合は`None`を返します。
    pub fn tile_index(&self, x: f64, y: f64) -> Option<TileIdx> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }

        let idx = [x, y];
        Some(TileIdx::new([0, 1].map(|a| {
            let i = ((idx[a] - self.bbox.min[a]) / self.tile_size[a]).floor();
            // 負の値は0に飽和する
            (i as usize).min(self.num_tiles[a] - 1)
        })))
    }

    /// タイルの位置を`Vec`上の添字に変換します。
    pub fn flat_index(&self, tile_idx: TileIdx) -> usize {
        tile_idx[0] * self.num_tiles[1] + tile_idx[1]
    }

    /// 全タイルの位置を、[`TileGrid::flat_index`]の順に返します。
    pub fn tiles(&self) -> impl Iterator<Item = TileIdx> + '_ {
        (0..self.num_tiles[0]).flat_map(move |x| (0..self.num_tiles[1]).map(move |y| TileIdx::new([x, y])))
    }
}

fn config_error(message: String) -> TilerError {
    TilerError::Configuration(message)
}
