//! Binary PPM (P6) decoding to RGBA, the image format this host can decode itself.

/// Decoded RGBA8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rgba {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PpmError {
    #[error("not a binary PPM (P6) image")]
    BadMagic,
    #[error("malformed header")]
    BadHeader,
    #[error("unsupported maxval {0}, only 255 is handled")]
    UnsupportedMaxval(u32),
    #[error("pixel data truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
}

/// Decode a P6 image with maxval 255. Alpha is set to opaque.
pub fn decode(bytes: &[u8]) -> Result<Rgba, PpmError> {
    if !bytes.starts_with(b"P6") {
        return Err(PpmError::BadMagic);
    }
    let mut pos = 2;
    let width = next_number(bytes, &mut pos)?;
    let height = next_number(bytes, &mut pos)?;
    let maxval = next_number(bytes, &mut pos)?;
    if maxval != 255 {
        return Err(PpmError::UnsupportedMaxval(maxval));
    }
    // exactly one whitespace byte separates the header from the raster
    match bytes.get(pos) {
        Some(b) if b.is_ascii_whitespace() => pos += 1,
        _ => return Err(PpmError::BadHeader),
    }
    if width == 0 || height == 0 {
        return Err(PpmError::BadHeader);
    }
    let count = (width as usize)
        .checked_mul(height as usize)
        .ok_or(PpmError::BadHeader)?;
    let need = count.checked_mul(3).ok_or(PpmError::BadHeader)?;
    let rgba_len = count.checked_mul(4).ok_or(PpmError::BadHeader)?;
    let raster = &bytes[pos..];
    if raster.len() < need {
        return Err(PpmError::Truncated {
            need,
            have: raster.len(),
        });
    }
    let mut pixels = Vec::with_capacity(rgba_len);
    for rgb in raster[..need].chunks_exact(3) {
        pixels.extend_from_slice(rgb);
        pixels.push(0xff);
    }
    Ok(Rgba {
        width,
        height,
        pixels,
    })
}

/// Skip whitespace and `#` comments, then read an unsigned decimal.
fn next_number(bytes: &[u8], pos: &mut usize) -> Result<u32, PpmError> {
    loop {
        match bytes.get(*pos) {
            Some(b) if b.is_ascii_whitespace() => *pos += 1,
            Some(b'#') => {
                while let Some(&b) = bytes.get(*pos) {
                    *pos += 1;
                    if b == b'\n' {
                        break;
                    }
                }
            }
            Some(_) => break,
            None => return Err(PpmError::BadHeader),
        }
    }
    let start = *pos;
    while bytes.get(*pos).is_some_and(|b| b.is_ascii_digit()) {
        *pos += 1;
    }
    std::str::from_utf8(&bytes[start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(PpmError::BadHeader)
}

#[cfg(test)]
pub(crate) fn encode(width: u32, height: u32, rgb: &[u8]) -> Vec<u8> {
    let mut out = format!("P6\n{} {}\n255\n", width, height).into_bytes();
    out.extend_from_slice(rgb);
    out
}
