use crate::Error;
use qrcode::{Color, QrCode};

/// Pixels per QR module.
const BOX_SIZE: usize = 10;
/// Quiet zone around the code, in modules.
const BORDER: usize = 4;

/// Encode `text` as a black-on-white QR code PNG.
pub fn qr_png(text: &str) -> Result<Vec<u8>, Error> {
    let code = QrCode::new(text.as_bytes())?;
    let modules = code.width();
    let colors = code.to_colors();

    let side = (modules + 2 * BORDER) * BOX_SIZE;
    let mut pixels = vec![255u8; side * side];
    for (i, color) in colors.iter().enumerate() {
        if *color != Color::Dark {
            continue;
        }
        let (mx, my) = (i % modules + BORDER, i / modules + BORDER);
        for y in my * BOX_SIZE..(my + 1) * BOX_SIZE {
            let row = y * side;
            pixels[row + mx * BOX_SIZE..row + (mx + 1) * BOX_SIZE].fill(0);
        }
    }

    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, side as u32, side as u32);
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&pixels)?;
    }
    Ok(out)
}
