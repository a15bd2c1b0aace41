use crate::frame::RgbImage;

/// Mean of all RGB channel values across the image, in `[0, 255]`. Callers
/// that maintain a downscaled ring image should score that image rather than
/// the full-resolution capture, both for cost and so every consumer of the
/// score (day/night controller, `X-Dark-Score` header) agrees on the same
/// number.
pub fn score(image: &RgbImage) -> f64 {
    if image.data.is_empty() {
        return 0.0;
    }
    let sum: u64 = image.data.iter().map(|&b| b as u64).sum();
    sum as f64 / image.data.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn black_image_scores_zero() {
        let image = RgbImage::black(8, 8);
        assert_eq!(score(&image), 0.0);
    }

    #[test]
    fn uniform_image_scores_its_value() {
        let image = RgbImage::new(2, 2, vec![200u8; 12]);
        assert_eq!(score(&image), 200.0);
    }

    #[test]
    fn mixed_image_scores_the_mean() {
        // Two pixels: (0,0,0) and (255,255,255) -> mean 127.5
        let image = RgbImage::new(2, 1, vec![0, 0, 0, 255, 255, 255]);
        assert_eq!(score(&image), 127.5);
    }
}
