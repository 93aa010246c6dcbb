use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use log::{info, warn};

use dicom_watershed::{
    ImageSource, InMemoryLabelmaps, PointerEvent, SortBy, StrokeOutcome, ToolConfig,
    VolumeLoader, WatershedSession,
};

/// Run one watershed stroke on a DICOM series and save the label maps.
#[derive(Parser, Debug)]
#[command(name = "dicom-watershed")]
#[command(about = "Watershed segmentation brush for DICOM slice stacks")]
struct CliArgs {
    /// Folder containing the series as .dcm files
    #[arg(long)]
    dir: PathBuf,

    /// Slice under the brush, defaults to the middle of the series
    #[arg(long)]
    slice: Option<usize>,

    /// Brush center column
    #[arg(long)]
    x: f64,

    /// Brush center row
    #[arg(long)]
    y: f64,

    /// Brush radius in pixels
    #[arg(long)]
    radius: Option<i32>,

    /// JSON tool configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Segment a range of slices instead of a single image
    #[arg(long)]
    multi_image: bool,

    /// First slice of the range
    #[arg(long)]
    start: Option<usize>,

    /// Last slice of the range (inclusive)
    #[arg(long)]
    end: Option<usize>,

    /// Maximum number of labels per slice
    #[arg(long)]
    masks: Option<u16>,

    /// Slice ordering of the series
    #[arg(long, value_enum, default_value_t = SortArg::Position)]
    sort_by: SortArg,

    /// Output PNG; ranges get the slice index appended
    #[arg(long, default_value = "labels.png")]
    output: PathBuf,

    /// Also save the slice under the brush as an 8 bit PNG
    #[arg(long)]
    preview: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SortArg {
    Position,
    Table,
    Instance,
    None,
}

impl From<SortArg> for SortBy {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::Position => SortBy::ImagePositionPatient,
            SortArg::Table => SortBy::TablePosition,
            SortArg::Instance => SortBy::InstanceNumber,
            SortArg::None => SortBy::None,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = CliArgs::parse();

    let mut config = match &args.config {
        Some(path) => ToolConfig::from_json_file(path)?,
        None => ToolConfig::default(),
    };
    if let Some(radius) = args.radius {
        config.radius = radius.max(1);
    }
    if args.multi_image || args.start.is_some() || args.end.is_some() {
        let masks = args.masks.or(Some(config.masks_number));
        config.toggle(true, args.start, args.end, masks);
    } else if let Some(masks) = args.masks {
        config.masks_number = masks.max(1);
    }
    let multi_image = config.multi_image;

    let volume = VolumeLoader::load_from_directory(&args.dir, args.sort_by.into())?;
    let slice = args.slice.unwrap_or(volume.slice_count() / 2);
    info!(
        "loaded {} slices of series {:?}",
        volume.slice_count(),
        volume.series_uid()
    );

    let mut store = InMemoryLabelmaps::new();
    let mut session = WatershedSession::new(config, &mut store);
    let outcome = session
        .on_pointer_down(PointerEvent::new(args.x, args.y, slice), &volume, &mut store)
        .await?;

    let slices = match outcome {
        StrokeOutcome::Written { slices, .. } => slices,
        other => {
            warn!("stroke produced no label map: {other:?}");
            return Ok(());
        }
    };

    let (_, rows, columns) = volume.dim();
    for index in slices {
        let path = output_path(&args.output, index, multi_image);
        if store.save_slice(index, columns as u32, rows as u32, &path)? {
            info!("saved labels of slice {index} to {}", path.display());
        }
    }
    if let Some(path) = &args.preview {
        if let Some(image) = volume.slice_preview(slice) {
            image.save(path)?;
        }
    }
    Ok(())
}

fn output_path(base: &Path, index: usize, multi_image: bool) -> PathBuf {
    if !multi_image {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("labels");
    let extension = base
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("png");
    base.with_file_name(format!("{stem}-{index:03}.{extension}"))
}
