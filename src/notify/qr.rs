use std::io::Cursor;

use image::{ImageFormat, Luma};
use qrcode::QrCode;

use crate::{
    error::{BoothError, BoothResult},
    utils::data_uri,
};

/// Smallest side of the rendered code, in pixels.
const MIN_SIDE: u32 = 300;

/// Render `text` as a QR code and return it as a PNG data URI.
pub fn qr_data_uri(text: &str) -> BoothResult<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(BoothError::missing("imageUrl"));
    }

    let code = QrCode::new(text.as_bytes())
        .map_err(|e| BoothError::validation("imageUrl", format!("cannot be encoded: {e}"), text))?;
    let rendered = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_SIDE, MIN_SIDE)
        .build();

    let mut png = Cursor::new(Vec::new());
    rendered.write_to(&mut png, ImageFormat::Png)?;
    Ok(data_uri("image/png", png.get_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::decode_image_payload;

    #[test]
    fn renders_a_png_data_uri() {
        let uri = qr_data_uri("http://localhost:5000/final-images/final_anon_1.jpg").unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));

        let png = decode_image_payload("qr", &uri).unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert!(img.width() >= MIN_SIDE && img.height() >= MIN_SIDE);
    }

    #[test]
    fn blank_url_is_rejected() {
        assert_eq!(qr_data_uri(" ").unwrap_err().category(), "validation");
    }
}
