use crate::Error;
use flate2::{write::ZlibEncoder, Compression};
use lopdf::{dictionary, Object, ObjectId, Stream};
use std::io::{Read, Write};

/// Overlays beyond this size in either dimension are refused before decoding.
pub const MAX_OVERLAY_DIMENSION: usize = 10_000;

/// An image XObject built from a PNG, ready to be added to a document.
///
/// The colour samples and the alpha channel are kept apart: PDF wants the
/// alpha as a separate `SMask` image.
#[derive(Debug, Clone)]
pub struct ImageXObject {
    pub width: u32,
    pub height: u32,
    pub color_space: &'static str,
    pub samples: Vec<u8>,
    pub alpha: Option<Vec<u8>>,
    /// Set once the soft mask has been added to the document.
    pub s_mask: Option<ObjectId>,
}

impl ImageXObject {
    /// True when the image has an alpha channel and every pixel is fully
    /// transparent, i.e. nothing was drawn.
    pub fn is_blank(&self) -> bool {
        match &self.alpha {
            Some(alpha) => alpha.iter().all(|a| *a == 0),
            None => false,
        }
    }

    /// The soft mask image, if the PNG carried transparency.
    pub fn mask_stream(&self) -> Result<Option<Stream>, Error> {
        match &self.alpha {
            Some(alpha) => Ok(Some(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => self.width as i64,
                    "Height" => self.height as i64,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                    "Filter" => "FlateDecode",
                },
                deflate(alpha)?,
            ))),
            None => Ok(None),
        }
    }

    pub fn image_stream(&self) -> Result<Stream, Error> {
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => self.width as i64,
            "Height" => self.height as i64,
            "ColorSpace" => self.color_space,
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        };
        if let Some(s_mask) = self.s_mask {
            dict.set("SMask", Object::Reference(s_mask));
        }
        Ok(Stream::new(dict, deflate(&self.samples)?))
    }
}

impl<R: Read> TryFrom<png::Decoder<R>> for ImageXObject {
    type Error = Error;

    fn try_from(mut decoder: png::Decoder<R>) -> Result<Self, Self::Error> {
        // Palette and low bit depths expand to 8 bits, 16 bits strip down to 8.
        decoder.set_transformations(png::Transformations::normalize_to_color8());
        let mut reader = decoder.read_info()?;
        let mut buffer = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buffer)?;
        buffer.truncate(info.buffer_size());

        let (color_space, channels, has_alpha) = match info.color_type {
            png::ColorType::Grayscale => ("DeviceGray", 1, false),
            png::ColorType::GrayscaleAlpha => ("DeviceGray", 1, true),
            png::ColorType::Rgb => ("DeviceRGB", 3, false),
            png::ColorType::Rgba => ("DeviceRGB", 3, true),
            png::ColorType::Indexed => {
                return Err(Error::Other("Indexed PNG was not expanded.".to_owned()))
            }
        };

        let (samples, alpha) = if has_alpha {
            let stride = channels + 1;
            let pixels = buffer.len() / stride;
            let mut samples = Vec::with_capacity(pixels * channels);
            let mut alpha = Vec::with_capacity(pixels);
            for pixel in buffer.chunks_exact(stride) {
                samples.extend_from_slice(&pixel[..channels]);
                alpha.push(pixel[channels]);
            }
            (samples, Some(alpha))
        } else {
            (buffer, None)
        };

        Ok(ImageXObject {
            width: info.width,
            height: info.height,
            color_space,
            samples,
            alpha,
            s_mask: None,
        })
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
