// Raster image XObjects to storable files: JPEG/JPEG2000 passthrough, PNG re-encoding otherwise
use super::lopdf_helper::{filters, get, get_u32, resolve, resolve_stream, stream_bytes};
use crate::types::Result;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Document, Object, Stream};
use std::io::Cursor;

/// An image ready to be written to the image store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    /// File extension without the dot.
    pub format: &'static str,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    /// Stream bytes as found in the file, for image types we cannot re-encode.
    pub fn raw(stream: &Stream, width: u32, height: u32) -> Self {
        Self { bytes: stream.content.clone(), format: "bin", width, height }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    Indexed { base_components: usize, palette: Vec<u8> },
}

impl ColorSpace {
    fn components(&self) -> usize {
        match self {
            ColorSpace::Gray | ColorSpace::Indexed { .. } => 1,
            ColorSpace::Rgb => 3,
            ColorSpace::Cmyk => 4,
        }
    }
}

/// Turn an image XObject into file bytes.
pub fn encode(document: &Document, stream: &Stream) -> Result<EncodedImage> {
    let width = get_u32(document, &stream.dict, b"Width").unwrap_or(0);
    let height = get_u32(document, &stream.dict, b"Height").unwrap_or(0);

    let filter_names = filters(document, stream);
    match filter_names.last().copied() {
        Some(b"DCTDecode") | Some(b"DCT") => {
            return Ok(EncodedImage { bytes: stream.content.clone(), format: "jpg", width, height });
        }
        Some(b"JPXDecode") => {
            return Ok(EncodedImage { bytes: stream.content.clone(), format: "jp2", width, height });
        }
        _ => {}
    }

    let Some(color_space) = color_space(document, get(document, &stream.dict, b"ColorSpace")) else {
        log::debug!("[reader] unsupported color space, keeping raw stream");
        return Ok(EncodedImage::raw(stream, width, height));
    };
    let bits = get_u32(document, &stream.dict, b"BitsPerComponent").unwrap_or(8);
    if width == 0 || height == 0 || !(bits == 8 || (bits == 1 && color_space == ColorSpace::Gray)) {
        log::debug!("[reader] unsupported raster {}x{} at {} bpc, keeping raw stream", width, height, bits);
        return Ok(EncodedImage::raw(stream, width, height));
    }

    let data = stream_bytes(stream)?;
    let Some(image) = to_dynamic_image(&data, width, height, bits, &color_space) else {
        log::debug!("[reader] raster data too short for {}x{}, keeping raw stream", width, height);
        return Ok(EncodedImage::raw(stream, width, height));
    };

    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(EncodedImage { bytes, format: "png", width, height })
}

fn color_space(document: &Document, object: Option<&Object>) -> Option<ColorSpace> {
    match object? {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Some(ColorSpace::Gray),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(ColorSpace::Rgb),
            b"DeviceCMYK" | b"CMYK" => Some(ColorSpace::Cmyk),
            _ => None,
        },
        Object::Array(parts) => {
            let family = match parts.first().map(|p| resolve(document, p)) {
                Some(Object::Name(name)) => name.as_slice(),
                _ => return None,
            };
            match family {
                b"ICCBased" => {
                    let profile = resolve_stream(document, parts.get(1)?)?;
                    match get_u32(document, &profile.dict, b"N")? {
                        1 => Some(ColorSpace::Gray),
                        3 => Some(ColorSpace::Rgb),
                        4 => Some(ColorSpace::Cmyk),
                        _ => None,
                    }
                }
                b"CalRGB" => Some(ColorSpace::Rgb),
                b"CalGray" => Some(ColorSpace::Gray),
                b"Indexed" | b"I" => {
                    let base = color_space(document, parts.get(1).map(|b| resolve(document, b)))?;
                    let palette = match resolve(document, parts.get(3)?) {
                        Object::String(bytes, _) => bytes.clone(),
                        Object::Stream(s) => stream_bytes(s).ok()?,
                        _ => return None,
                    };
                    match base {
                        ColorSpace::Gray | ColorSpace::Rgb => Some(ColorSpace::Indexed {
                            base_components: base.components(),
                            palette,
                        }),
                        _ => None,
                    }
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn to_dynamic_image(data: &[u8], width: u32, height: u32, bits: u32, color_space: &ColorSpace) -> Option<DynamicImage> {
    let (w, h) = (width as usize, height as usize);
    if bits == 1 {
        let row_bytes = (w + 7) / 8;
        if data.len() < row_bytes * h {
            return None;
        }
        let mut pixels = Vec::with_capacity(w * h);
        for row in data.chunks(row_bytes).take(h) {
            for x in 0..w {
                let bit = (row[x / 8] >> (7 - (x % 8))) & 1;
                pixels.push(if bit == 1 { 255 } else { 0 });
            }
        }
        return GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8);
    }

    let needed = w * h * color_space.components();
    if data.len() < needed {
        return None;
    }
    let data = &data[..needed];
    match color_space {
        ColorSpace::Gray => GrayImage::from_raw(width, height, data.to_vec()).map(DynamicImage::ImageLuma8),
        ColorSpace::Rgb => RgbImage::from_raw(width, height, data.to_vec()).map(DynamicImage::ImageRgb8),
        ColorSpace::Cmyk => {
            let rgb: Vec<u8> = data
                .chunks_exact(4)
                .flat_map(|px| {
                    let k = 255 - px[3] as u16;
                    [
                        ((255 - px[0] as u16) * k / 255) as u8,
                        ((255 - px[1] as u16) * k / 255) as u8,
                        ((255 - px[2] as u16) * k / 255) as u8,
                    ]
                })
                .collect();
            RgbImage::from_raw(width, height, rgb).map(DynamicImage::ImageRgb8)
        }
        ColorSpace::Indexed { base_components, palette } => {
            let mut out = Vec::with_capacity(w * h * base_components);
            for &index in data {
                let start = index as usize * base_components;
                match palette.get(start..start + base_components) {
                    Some(entry) => out.extend_from_slice(entry),
                    None => out.extend(std::iter::repeat(0).take(*base_components)),
                }
            }
            if *base_components == 1 {
                GrayImage::from_raw(width, height, out).map(DynamicImage::ImageLuma8)
            } else {
                RgbImage::from_raw(width, height, out).map(DynamicImage::ImageRgb8)
            }
        }
    }
}
