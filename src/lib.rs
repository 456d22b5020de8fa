#[cfg(not(target_env = "msvc"))]
#[cfg(feature = "jamalloc")]
use tikv_jemallocator::Jemalloc;
pub use vec_x;

#[cfg(not(target_env = "msvc"))]
#[cfg(feature = "jamalloc")]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

pub mod error;
pub mod format;
pub mod grid;
pub mod io;
pub mod params;
pub mod processing;
pub mod tile_buffer;
pub mod tiler;
pub mod txt;
#[cfg(feature = "ply")]
pub mod ply;
#[cfg(feature = "las")]
pub mod las;

pub use error::{Result, TilerError};
pub use format::{PointField, PointFormat};
pub use grid::{BoundingBox, TileGrid, Tiling};
pub use io::{read_and_merge_point_clouds, read_point_cloud, write_point_cloud, FileFormat, HeaderParams, PointSink, ReadOptions};
pub use params::TileWriterBuilder;
pub use tiler::TileWriter;
