//! Native QC mosaics: tiled slices of a structural image with an optional
//! label overlay, written as PNG

use crate::error::{Result, ToolError};
use crate::traits::{MosaicParams, MosaicRenderer};
use async_trait::async_trait;
use hippmapper_common::CancelToken;
use hippmapper_volume::intensity::robust_range;
use hippmapper_volume::nifti::read_nifti;
use hippmapper_volume::region::{extract_region, nonzero_bbox, Region};
use hippmapper_volume::{reslice_like, Interpolation, Volume};
use image::{ImageFormat, Rgb, RgbImage};
use std::path::Path;
use tracing::debug;

/// Label range mapped across the colormap, matching ANTs `ConvertScalarImageToRGB 0 10`
const OVERLAY_MAX_LABEL: f32 = 10.0;

fn jet(t: f32) -> [f32; 3] {
    let t = t.clamp(0.0, 1.0);
    let channel = |offset: f32| (1.5 - (4.0 * t - offset).abs()).clamp(0.0, 1.0);
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Linear 2-98% stretch of the nonzero intensities onto [0, 255]
fn stretch(volume: &Volume) -> Volume {
    match robust_range(volume) {
        Some((low, high)) if high > low => {
            volume.map(|v| ((v - low) / (high - low) * 255.0).clamp(0.0, 255.0))
        }
        _ => volume.map(|_| 0.0),
    }
}

/// The axes shown within a tile for slicing `direction`, as `(x, y)`
fn tile_axes(direction: usize) -> (usize, usize) {
    match direction {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    }
}

fn slice_indices(extent: usize, params: &MosaicParams) -> Vec<usize> {
    let start = if params.min_slice < extent {
        params.min_slice
    } else {
        0
    };
    (start..extent)
        .step_by(params.gap.max(1))
        .take(params.tile[0] * params.tile[1])
        .collect()
}

/// Compose the mosaic image
///
/// With an overlay the structural image is first cropped to the overlay's
/// nonzero extent plus `params.roi` voxels, on the overlay's grid.
pub fn render_mosaic(
    structural: &Volume,
    overlay: Option<&Volume>,
    params: &MosaicParams,
) -> Result<RgbImage> {
    if params.direction > 2 || params.tile.iter().any(|n| *n == 0) {
        return Err(ToolError::Parse {
            tool: "mosaic".to_string(),
            detail: format!(
                "direction {} with tile {:?} is not a valid layout",
                params.direction, params.tile
            ),
        });
    }

    let (background, labels) = match overlay.and_then(|o| nonzero_bbox(o).map(|b| (o, b))) {
        Some((overlay, bbox)) => {
            let labels = extract_region(overlay, &Region::around(&bbox, [params.roi; 3]))?;
            let background = reslice_like(structural, &labels.grid(), Interpolation::Linear)?;
            (background, Some(labels))
        }
        None => (structural.clone(), None),
    };
    let background = stretch(&background);

    let shape = background.shape();
    let (x_axis, y_axis) = tile_axes(params.direction);
    let (width, height) = (shape[x_axis], shape[y_axis]);
    let slices = slice_indices(shape[params.direction], params);
    let [rows, columns] = params.tile;
    debug!(
        "Mosaic of {} slices along axis {} ({}x{} tiles of {}x{})",
        slices.len(),
        params.direction,
        rows,
        columns,
        width,
        height
    );

    let mut canvas = RgbImage::new((columns * width) as u32, (rows * height) as u32);
    for (tile, slice) in slices.iter().enumerate() {
        let (row, column) = (tile / columns, tile % columns);
        for y in 0..height {
            for x in 0..width {
                let vx = if params.flip[0] { width - 1 - x } else { x };
                let vy = if params.flip[1] { height - 1 - y } else { y };
                let mut index = [0usize; 3];
                index[params.direction] = *slice;
                index[x_axis] = vx;
                index[y_axis] = vy;

                let gray = background.data()[index];
                let mut rgb = [gray; 3];
                if let Some(labels) = &labels {
                    let label = labels.data()[index];
                    if label > 0.0 {
                        let color = jet(label / OVERLAY_MAX_LABEL);
                        for (channel, c) in rgb.iter_mut().zip(color) {
                            *channel = (1.0 - params.alpha) * *channel + params.alpha * c * 255.0;
                        }
                    }
                }
                canvas.put_pixel(
                    (column * width + x) as u32,
                    (row * height + y) as u32,
                    Rgb(rgb.map(|c| c.round().clamp(0.0, 255.0) as u8)),
                );
            }
        }
    }
    Ok(canvas)
}

/// PNG mosaics rendered in-process with the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeMosaic;

#[async_trait]
impl MosaicRenderer for NativeMosaic {
    fn name(&self) -> &str {
        "native mosaic"
    }

    async fn render(
        &self,
        structural: &Path,
        overlay: Option<&Path>,
        output: &Path,
        params: &MosaicParams,
        cancel: &CancelToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled {
                tool: self.name().to_string(),
            });
        }
        let structural = structural.to_path_buf();
        let overlay = overlay.map(Path::to_path_buf);
        let output = output.to_path_buf();
        let params = params.clone();
        tokio::task::spawn_blocking(move || {
            let background = read_nifti(&structural)?;
            let labels = overlay.as_deref().map(read_nifti).transpose()?;
            let image = render_mosaic(&background, labels.as_ref(), &params)?;
            image.save_with_format(&output, ImageFormat::Png)?;
            Ok(())
        })
        .await?
    }
}
