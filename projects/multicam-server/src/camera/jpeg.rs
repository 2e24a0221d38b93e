use image::{RgbImage, codecs::jpeg::JpegEncoder, imageops::FilterType};

pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const MAX_BUFFER_BYTES: usize = 8 * 1024 * 1024;

/// Splits an MJPEG byte pipe into whole JPEG images, keeping only the newest one per chunk.
pub struct JpegFrameAccumulator {
    buffer: Vec<u8>,
}

impl JpegFrameAccumulator {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() > MAX_BUFFER_BYTES {
            let overflow = self.buffer.len() - MAX_BUFFER_BYTES;
            self.buffer.drain(0..overflow);
        }

        let mut newest = None;
        while let Some(start) = find_marker(&self.buffer, &JPEG_SOI) {
            let Some(end_rel) = find_marker(&self.buffer[start + 2..], &JPEG_EOI) else {
                self.buffer.drain(0..start);
                return newest;
            };
            let end = start + 2 + end_rel + 2;
            newest = Some(self.buffer[start..end].to_vec());
            self.buffer.drain(0..end);
        }

        // No start marker left: nothing in the buffer can begin a frame, except a
        // trailing 0xFF that may pair with the next chunk.
        let keep_tail = self.buffer.last() == Some(&JPEG_SOI[0]);
        self.buffer.clear();
        if keep_tail {
            self.buffer.push(JPEG_SOI[0]);
        }
        newest
    }
}

fn find_marker(buffer: &[u8], marker: &[u8; 2]) -> Option<usize> {
    buffer.windows(2).position(|w| w == marker)
}

pub fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.starts_with(&JPEG_SOI)
}

/// Scales the image to exactly `width`x`height` when the device delivered another size.
pub fn fit_to(image: RgbImage, width: u32, height: u32) -> RgbImage {
    if image.width() == width && image.height() == height {
        return image;
    }
    image::imageops::resize(&image, width, height, FilterType::Triangle)
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(image)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::{JpegFrameAccumulator, encode_jpeg, fit_to, is_jpeg};

    fn fake_jpeg(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend_from_slice(payload);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    #[test]
    fn extracts_frame_across_multiple_chunks() {
        let mut acc = JpegFrameAccumulator::new();
        let frame = fake_jpeg(b"hello-world");
        let (first, second) = frame.split_at(5);

        assert!(acc.push_chunk(first).is_none());
        let out = acc
            .push_chunk(second)
            .expect("frame should be reconstructed");
        assert_eq!(out, frame);
    }

    #[test]
    fn start_marker_split_between_chunks_is_not_lost() {
        let mut acc = JpegFrameAccumulator::new();
        let frame = fake_jpeg(b"split-soi");
        let mut first = b"noise".to_vec();
        first.push(frame[0]);

        assert!(acc.push_chunk(&first).is_none());
        let out = acc.push_chunk(&frame[1..]).expect("frame should be found");
        assert_eq!(out, frame);
    }

    #[test]
    fn keeps_newest_frame_when_pipe_runs_ahead() {
        let mut acc = JpegFrameAccumulator::new();
        let mut chunk = fake_jpeg(b"111");
        chunk.extend_from_slice(&fake_jpeg(b"222"));
        chunk.extend_from_slice(b"\xFF\xD8partial");

        let out = acc.push_chunk(&chunk).expect("frame should be found");
        assert_eq!(out, fake_jpeg(b"222"));
        let rest = acc.push_chunk(b"\xFF\xD9").expect("partial frame completes");
        assert_eq!(rest, fake_jpeg(b"partial"));
    }

    #[test]
    fn encoded_frames_start_with_soi_marker() {
        let image = RgbImage::from_pixel(64, 48, Rgb([10, 200, 30]));
        let jpeg = encode_jpeg(&image, 85).expect("encode should succeed");
        assert!(is_jpeg(&jpeg));

        let decoded = image::load_from_memory(&jpeg).expect("encoded frame should decode");
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn fit_to_resizes_only_mismatched_frames() {
        let image = RgbImage::new(32, 24);
        let same = fit_to(image.clone(), 32, 24);
        assert_eq!(same.dimensions(), (32, 24));

        let scaled = fit_to(image, 64, 36);
        assert_eq!(scaled.dimensions(), (64, 36));
    }
}
