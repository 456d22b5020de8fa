use std::path::PathBuf;

use anyhow::{bail, Context};
use argh::FromArgs;

use point_tiler_core::format::{FORMAT_XYZ, FORMAT_XYZC};
use point_tiler_core::processing::remove_duplicate_positions;
use point_tiler_core::{read_and_merge_point_clouds, BoundingBox, FileFormat, ReadOptions, TileWriter};

#[derive(FromArgs)]
/// Split point cloud files into tiles on a regular ground grid
struct Args {
    /// input point cloud files (las, laz, ply, txt, xyz)
    #[argh(positional)]
    inputs: Vec<PathBuf>,

    /// output folder for the tiles
    #[argh(option, short = 'o', default = "PathBuf::from(\"tiles\")")]
    output: PathBuf,

    /// tile edge length; overrides --num-tiles when given
    #[argh(option, short = 's')]
    tile_size: Option<f64>,

    /// number of tiles on each axis (default: 4)
    #[argh(option, short = 'n', default = "4")]
    num_tiles: usize,

    /// extra tiles around the bounding box (default: 0)
    #[argh(option, short = 'p', default = "0")]
    padding: usize,

    /// output format: las, laz, ply, txt (default: laz when available)
    #[argh(option, short = 'f')]
    format: Option<String>,

    /// rows buffered per tile before writing (default: 100000)
    #[argh(option, default = "100_000")]
    flush_threshold: usize,

    /// rows passed to the writer per call (default: 50000)
    #[argh(option, default = "50_000")]
    batch: usize,

    /// drop points whose position repeats an earlier point
    #[argh(switch, short = 'd')]
    dedup: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args: Args = argh::from_env();

    if args.inputs.is_empty() {
        bail!("no input files given");
    }

    let file_format = match args.format.as_deref() {
        Some(name) => FileFormat::from_path(&PathBuf::from(format!("out.{}", name)))
            .with_context(|| format!("unknown output format: {}", name))?,
        None => FileFormat::default(),
    };

    let mut cloud = read_and_merge_point_clouds(&args.inputs, &ReadOptions::default())?;
    if args.dedup {
        let before = cloud.len();
        cloud.rows = remove_duplicate_positions(&cloud.rows, cloud.width);
        log::info!("removed {} points with duplicate positions", before - cloud.len());
    }
    let format = if cloud.width == 4 { FORMAT_XYZC } else { FORMAT_XYZ };

    let bbox = BoundingBox::from_points(cloud.rows.chunks_exact(cloud.width).map(|row| [row[0], row[1]]))
        .context("input contains no points")?;

    let min_z = cloud.rows.chunks_exact(cloud.width).map(|row| row[2]).fold(f64::INFINITY, f64::min);

    log::info!("read {} points from {} files", cloud.len(), args.inputs.len());

    let mut builder = TileWriter::builder(&args.output, format)
        .file_format(file_format)
        .bbox(bbox.min.data, bbox.max.data)
        // quantized coordinates must fit in i32 at the default precision
        .offsets([bbox.min[0], bbox.min[1], min_z])
        .num_tiles([args.num_tiles; 2])
        .padding(args.padding)
        .flush_threshold(args.flush_threshold);

    if let Some(tile_size) = args.tile_size {
        builder = builder.tile_size(tile_size);
    }

    let mut writer = builder.build()?;

    for batch in cloud.rows.chunks(args.batch.max(1) * cloud.width) {
        writer.add_points(batch)?;
    }
    writer.close()?;

    println!(
        "{} points written to {:?} ({} discarded)",
        writer.points_written(),
        args.output,
        writer.discarded_points()
    );

    Ok(())
}
