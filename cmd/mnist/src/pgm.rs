//! Binary PGM (`P5`) images.

use anyhow::{Context, bail};

/// An 8-bit grayscale image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

/// Parses a binary PGM with a maximum value below 256.
///
/// Header fields are separated by whitespace and may be interleaved with
/// `#` comments; exactly one whitespace byte precedes the raster.
pub fn parse(data: &[u8]) -> anyhow::Result<Image> {
    let mut pos = 0;
    let magic = token(data, &mut pos).context("pgm: missing magic")?;
    if magic != b"P5" {
        bail!("pgm: unsupported magic {:?}", String::from_utf8_lossy(magic));
    }
    let width = number(data, &mut pos, "width")?;
    let height = number(data, &mut pos, "height")?;
    let max = number(data, &mut pos, "max value")?;
    if max == 0 || max > 255 {
        bail!("pgm: unsupported max value {max}");
    }
    // Single whitespace byte after the header.
    pos += 1;

    let need = width * height;
    let raster = data.get(pos..).unwrap_or_default();
    if raster.len() < need {
        bail!("pgm: expected {need} pixels, got {}", raster.len());
    }
    Ok(Image {
        width,
        height,
        pixels: raster[..need].to_vec(),
    })
}

fn token<'a>(data: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    loop {
        while *pos < data.len() && data[*pos].is_ascii_whitespace() {
            *pos += 1;
        }
        if *pos < data.len() && data[*pos] == b'#' {
            while *pos < data.len() && data[*pos] != b'\n' {
                *pos += 1;
            }
            continue;
        }
        break;
    }
    let start = *pos;
    while *pos < data.len() && !data[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    (*pos > start).then(|| &data[start..*pos])
}

fn number(data: &[u8], pos: &mut usize, what: &str) -> anyhow::Result<usize> {
    let tok = token(data, pos).with_context(|| format!("pgm: missing {what}"))?;
    std::str::from_utf8(tok)
        .ok()
        .and_then(|s| s.parse().ok())
        .with_context(|| format!("pgm: invalid {what} {:?}", String::from_utf8_lossy(tok)))
}
