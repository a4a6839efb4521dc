//! Test fixtures: encoded images and chunk/finalize forms.

use std::io::Cursor;

use axum_test::multipart::{MultipartForm, Part};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

/// A small PNG with a bright block where a number plate would be.
pub fn cart_png() -> Vec<u8> {
    let mut img = RgbImage::from_pixel(160, 120, Rgb([40, 40, 40]));
    for y in 20..60 {
        for x in 20..100 {
            img.put_pixel(x, y, Rgb([230, 230, 230]));
        }
    }
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .expect("Failed to encode PNG");
    buf.into_inner()
}

/// Split `data` into `n` nearly equal chunks.
pub fn split(data: &[u8], n: usize) -> Vec<Vec<u8>> {
    let size = data.len().div_ceil(n);
    data.chunks(size).map(|c| c.to_vec()).collect()
}

pub fn chunk_form(file_id: &str, index: usize, total: usize, bytes: Vec<u8>) -> MultipartForm {
    MultipartForm::new()
        .add_text("fileId", file_id)
        .add_text("chunkIndex", index.to_string())
        .add_text("totalChunks", total.to_string())
        .add_text("originalFilename", "carro.png")
        .add_part(
            "chunk",
            Part::bytes(bytes)
                .file_name("blob")
                .mime_type("application/octet-stream"),
        )
}

pub fn finalize_form(file_id: &str, filename: &str, total: usize) -> MultipartForm {
    MultipartForm::new()
        .add_text("fileId", file_id)
        .add_text("originalFilename", filename)
        .add_text("totalChunks", total.to_string())
        .add_text("evento", "ingreso")
        .add_text("tunel", "Túnel 1")
        .add_text("merma", "2.5")
}

/// Event metadata fields as sent with a single-request upload.
pub fn direct_form() -> MultipartForm {
    MultipartForm::new()
        .add_text("evento", "egreso")
        .add_text("tunel", "Túnel 2")
        .add_text("modelo_ladrillo", "H12")
}

pub fn image_part(filename: &str, bytes: Vec<u8>) -> Part {
    Part::bytes(bytes).file_name(filename).mime_type("image/png")
}
