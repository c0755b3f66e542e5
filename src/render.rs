//! Page rasterization with MuPDF.

use crate::Error;
use mupdf::{Colorspace, Document, Matrix};

#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 0-based page index.
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

/// Rasterize every page of `pdf` at `zoom` (1.0 = 72 dpi) to PNG.
pub fn render_pages(pdf: &[u8], zoom: f32) -> Result<Vec<RenderedPage>, Error> {
    let document = Document::from_bytes(pdf, "application/pdf")?;
    let page_count = document.page_count()?;
    let matrix = Matrix::new_scale(zoom, zoom);
    let colorspace = Colorspace::device_rgb();

    let mut pages = Vec::with_capacity(page_count.max(0) as usize);
    for index in 0..page_count {
        let page = document.load_page(index)?;
        let pixmap = page.to_pixmap(&matrix, &colorspace, false, true)?;
        let width = pixmap.width();
        let height = pixmap.height();
        let png = encode_png(width, height, pixmap.n() as usize, pixmap.samples())?;
        log::debug!("Rendered page {} at {}x{}", index + 1, width, height);
        pages.push(RenderedPage {
            index: index as usize,
            width,
            height,
            png,
        });
    }
    Ok(pages)
}

fn encode_png(width: u32, height: u32, components: usize, samples: &[u8]) -> Result<Vec<u8>, Error> {
    let color_type = match components {
        1 => png::ColorType::Grayscale,
        3 => png::ColorType::Rgb,
        4 => png::ColorType::Rgba,
        n => return Err(Error::Render(format!("unsupported pixmap with {} components", n))),
    };
    let expected = width as usize * height as usize * components;
    if samples.len() < expected {
        return Err(Error::Render(format!(
            "pixmap holds {} bytes, expected {}",
            samples.len(),
            expected
        )));
    }

    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(color_type);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::Fast);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&samples[..expected])?;
    }
    Ok(out)
}
