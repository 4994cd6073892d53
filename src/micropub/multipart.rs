//! Single-file `multipart/form-data` bodies for the media endpoint.
//!
//! Some media endpoints are picky about the exact layout, so the body is
//! written by hand with a fixed boundary rather than through a form builder.

pub const BOUNDARY: &str = "________ThIs_Is_tHe_bouNdaRY_$";

const FIELD_NAME: &str = "file";
const PART_CONTENT_TYPE: &str = "image/jpeg";

/// Content type header value matching [`encode`].
#[must_use]
pub fn content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

/// Encode one file under the `file` field.
///
/// The part is always declared as `image/jpeg`, whatever the bytes are.
#[must_use]
pub fn encode(data: &[u8], filename: &str) -> Vec<u8> {
    let filename = filename.replace(['"', '\r', '\n'], "_");
    let mut body = Vec::with_capacity(data.len() + 256);

    for line in [
        format!("--{BOUNDARY}"),
        format!(r#"Content-Disposition: form-data; name="{FIELD_NAME}"; filename="{filename}""#),
        format!("Content-Type: {PART_CONTENT_TYPE}"),
        String::new(),
    ] {
        body.extend_from_slice(line.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    body
}

/// File name for an uploaded image: the last path segment of its URL.
#[must_use]
pub fn filename_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "image.jpg".to_string())
}
