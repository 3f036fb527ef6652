//! Pixel-format conversion into the packed formats we save and infer on

use thiserror::Error;

use super::frame::{Frame, PixelFormat};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("cannot convert {from:?} to {to:?}")]
    UnsupportedFormat { from: PixelFormat, to: PixelFormat },
    #[error("jpeg decode failed: {0}")]
    Decode(String),
    #[error("frame buffer holds {actual} bytes, {expected} expected")]
    BufferSize { expected: usize, actual: usize },
}

/// A packed image ready for encoding or inference.
#[derive(Debug, Clone)]
pub struct PackedImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// Packed targets each source format can be converted into.
pub fn convertible_formats(source: PixelFormat) -> &'static [PixelFormat] {
    match source {
        PixelFormat::Rgb24
        | PixelFormat::Bgr24
        | PixelFormat::Yuyv4
        | PixelFormat::Mjpeg
        | PixelFormat::Mono8 => &[PixelFormat::Rgb24, PixelFormat::Bgr24, PixelFormat::Mono8],
        PixelFormat::Nv12 => &[],
    }
}

/// Convert a frame into `target`, which must be one of `Rgb24`, `Bgr24` or `Mono8`.
pub fn convert(frame: &Frame, target: PixelFormat) -> Result<PackedImage, ConvertError> {
    let meta = &frame.meta;
    if !convertible_formats(meta.format).contains(&target) {
        return Err(ConvertError::UnsupportedFormat {
            from: meta.format,
            to: target,
        });
    }

    if meta.format == PixelFormat::Mono8 && target == PixelFormat::Mono8 {
        let data = packed_rows(frame, 1)?;
        return Ok(PackedImage {
            width: meta.width,
            height: meta.height,
            format: target,
            data,
        });
    }

    let rgb = to_rgb(frame)?;
    let data = match target {
        PixelFormat::Rgb24 => rgb.data,
        PixelFormat::Bgr24 => {
            let mut data = rgb.data;
            for px in data.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            data
        }
        PixelFormat::Mono8 => rgb
            .data
            .chunks_exact(3)
            .map(|px| luma(px[0], px[1], px[2]))
            .collect(),
        _ => unreachable!("convertible_formats only yields packed targets"),
    };

    Ok(PackedImage {
        width: rgb.width,
        height: rgb.height,
        format: target,
        data,
    })
}

/// Decode any supported frame to tightly packed RGB24.
pub fn to_rgb(frame: &Frame) -> Result<PackedImage, ConvertError> {
    let meta = &frame.meta;
    let (width, height) = (meta.width, meta.height);

    let data = match meta.format {
        PixelFormat::Mjpeg => {
            let mut decoder = zune_jpeg::JpegDecoder::new(&frame.data[..]);
            let pixels = decoder
                .decode()
                .map_err(|e| ConvertError::Decode(format!("{:?}", e)))?;
            // The JPEG header is authoritative for compressed frames
            let (w, h) = decoder
                .dimensions()
                .map(|(w, h)| (w as u32, h as u32))
                .unwrap_or((width, height));
            return Ok(PackedImage {
                width: w,
                height: h,
                format: PixelFormat::Rgb24,
                data: pixels,
            });
        }
        PixelFormat::Rgb24 => packed_rows(frame, 3)?,
        PixelFormat::Bgr24 => {
            let mut data = packed_rows(frame, 3)?;
            for px in data.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            data
        }
        PixelFormat::Mono8 => packed_rows(frame, 1)?
            .into_iter()
            .flat_map(|y| [y, y, y])
            .collect(),
        PixelFormat::Yuyv4 => {
            let yuyv = packed_rows(frame, 2)?;
            let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);
            for chunk in yuyv.chunks_exact(4) {
                let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
                rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
                rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
            }
            rgb
        }
        PixelFormat::Nv12 => {
            return Err(ConvertError::UnsupportedFormat {
                from: PixelFormat::Nv12,
                to: PixelFormat::Rgb24,
            })
        }
    };

    Ok(PackedImage {
        width,
        height,
        format: PixelFormat::Rgb24,
        data,
    })
}

/// Copy rows out of a possibly padded buffer.
fn packed_rows(frame: &Frame, bytes_per_pixel: usize) -> Result<Vec<u8>, ConvertError> {
    let meta = &frame.meta;
    let row = meta.width as usize * bytes_per_pixel;
    let stride = (meta.stride as usize).max(row);
    let height = meta.height as usize;
    let expected = if height == 0 {
        0
    } else {
        stride * (height - 1) + row
    };

    if frame.data.len() < expected {
        return Err(ConvertError::BufferSize {
            expected,
            actual: frame.data.len(),
        });
    }

    if stride == row {
        return Ok(frame.data[..row * height].to_vec());
    }

    let mut out = Vec::with_capacity(row * height);
    for y in 0..height {
        let start = y * stride;
        out.extend_from_slice(&frame.data[start..start + row]);
    }
    Ok(out)
}

// BT.601 limited range
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}
