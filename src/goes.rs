//! Full disk imagery from the GOES-West satellite.
//!
//! NOAA/NESDIS/STAR - GOES-West - GeoColor Composite by CIRA/NOAA, see
//! <https://www.star.nesdis.noaa.gov/goes/index.php>

use std::io::Cursor;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tracing::debug;

use crate::client::Http;

pub(crate) const GOES_WEST: &str =
    "https://cdn.star.nesdis.noaa.gov/GOES17/ABI/FD/GEOCOLOR/5424x5424.jpg";

const LARGE_WIDTH: u32 = 1280;
const THUMBNAIL_WIDTH: u32 = 256;

/// Re-encoded JPEGs ready to upload.
pub(crate) struct Resized {
    pub large: Vec<u8>,
    pub thumbnail: Vec<u8>,
}

pub(crate) fn fetch(http: &Http, url: &str) -> Result<Resized> {
    let response = http
        .send(http.client().get(url))
        .with_context(|| format!("cannot fetch {url}"))?
        .error_for_status()
        .with_context(|| format!("cannot fetch {url}"))?;
    let bytes = response
        .bytes()
        .with_context(|| format!("cannot read image from {url}"))?;
    debug!(bytes = bytes.len(), "downloaded full disk image");
    resize(&bytes)
}

/// Shrinks a JPEG to the large and thumbnail widths, keeping its aspect ratio.
pub(crate) fn resize(jpeg: &[u8]) -> Result<Resized> {
    let img = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
        .context("image is not a valid jpeg")?;
    Ok(Resized {
        large: encode(&scale_to_width(&img, LARGE_WIDTH))?,
        thumbnail: encode(&scale_to_width(&img, THUMBNAIL_WIDTH))?,
    })
}

fn scale_to_width(img: &DynamicImage, width: u32) -> DynamicImage {
    let height = u64::from(img.height()) * u64::from(width) / u64::from(img.width().max(1));
    let height = u32::try_from(height).unwrap_or(u32::MAX).max(1);
    img.resize_exact(width, height, FilterType::Lanczos3)
}

fn encode(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.to_rgb8()
        .write_to(&mut buf, ImageFormat::Jpeg)
        .context("cannot encode jpeg")?;
    Ok(buf.into_inner())
}
