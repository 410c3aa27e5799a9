//! Framing of the `multipart/x-mixed-replace` MJPEG stream.
//!
//! Every part is emitted as three chunks: [`part_header`], the raw JPEG
//! bytes and [`TERMINATOR`].

use actix_web::web::Bytes;

pub const BOUNDARY: &str = "frame";

pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

pub const PART_CONTENT_TYPE: &str = "image/jpeg";

/// Closes a part after its payload.
pub const TERMINATOR: &[u8] = b"\r\n";

pub fn part_header(content_length: usize) -> Bytes {
    Bytes::from(format!(
        "--{BOUNDARY}\r\nContent-Type: {PART_CONTENT_TYPE}\r\nContent-Length: {content_length}\r\n\r\n"
    ))
}

pub fn terminator() -> Bytes {
    Bytes::from_static(TERMINATOR)
}
