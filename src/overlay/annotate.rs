use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

const DAY_COLOR: Rgb<u8> = Rgb([255, 214, 64]);
const NIGHT_COLOR: Rgb<u8> = Rgb([64, 140, 255]);
const WATERMARK_COLOR: Rgb<u8> = Rgb([200, 200, 200]);

/// Draws the overlay HUD directly onto `image`: a top-left frame id/timestamp
/// readout, a top-right day/night disc, a brightness bar below it, and a
/// bottom-left watermark bar. Color depends on the night flag.
///
/// Text rendering is deliberately geometric (bars and ticks via imageproc's
/// primitive drawing ops) rather than font-based, so the overlay proxy
/// carries no vendored font asset.
pub fn annotate(image: &mut RgbImage, frame_id: u64, timestamp: f64, dark_score: f64, night: bool) {
    let accent = if night { NIGHT_COLOR } else { DAY_COLOR };
    let width = image.width();
    let height = image.height();

    // Top-left HUD: a readout bar whose length encodes frame_id mod 64, plus
    // a thin timestamp tick row beneath it.
    draw_hollow_rect_mut(image, Rect::at(6, 6).of_size(80, 14), accent);
    let fill_width = ((frame_id % 64) + 1).min(78) as u32;
    draw_filled_rect_mut(image, Rect::at(7, 7).of_size(fill_width, 12), accent);
    let tick = ((timestamp.fract() * 78.0) as u32).min(78);
    draw_filled_rect_mut(image, Rect::at(7, 22).of_size(tick.max(1), 3), accent);

    // Top-right day/night disc.
    let disc_center = (width as i32 - 20, 20);
    draw_filled_circle_mut(image, disc_center, 10, accent);
    if night {
        draw_hollow_rect_mut(image, Rect::at(width as i32 - 30, 10).of_size(20, 20), Rgb([255, 255, 255]));
    }

    // Brightness bar below the disc: length proportional to dark_score/255.
    let bar_len = ((dark_score.clamp(0.0, 255.0) / 255.0) * 40.0) as u32;
    draw_filled_rect_mut(
        image,
        Rect::at(width as i32 - 46, 36).of_size(bar_len.max(1), 6),
        accent,
    );

    // Bottom-left watermark bar.
    let wm_y = height as i32 - 12;
    if wm_y >= 0 {
        draw_filled_rect_mut(image, Rect::at(6, wm_y).of_size(24, 4), WATERMARK_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotate_does_not_panic_and_preserves_geometry() {
        let mut image = RgbImage::new(64, 48);
        annotate(&mut image, 5, 1_700_000_000.25, 42.0, false);
        assert_eq!(image.width(), 64);
        assert_eq!(image.height(), 48);
        annotate(&mut image, 6, 1_700_000_001.75, 12.0, true);
        assert_eq!(image.width(), 64);
        assert_eq!(image.height(), 48);
    }

    #[test]
    fn day_and_night_use_different_accent_colors() {
        let mut day = RgbImage::new(32, 32);
        annotate(&mut day, 0, 0.0, 0.0, false);
        let mut night = RgbImage::new(32, 32);
        annotate(&mut night, 0, 0.0, 0.0, true);
        let disc_px_day = *day.get_pixel(12, 20);
        let disc_px_night = *night.get_pixel(12, 20);
        assert_ne!(disc_px_day, disc_px_night);
    }
}
