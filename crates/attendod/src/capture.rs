//! Face capture files and frame annotation.

use attendo_core::FaceLocation;
use image::imageops::{self, FilterType};
use image::{ImageResult, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};

const HIGHLIGHT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const HIGHLIGHT_THICKNESS: u32 = 2;

/// `<dir>/<identity>.jpg`, with path separators in the identity neutralized.
pub fn face_image_path(dir: &Path, identity: &str) -> PathBuf {
    let name: String = identity
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    dir.join(format!("{name}.jpg"))
}

/// Write the frame as JPEG, replacing any previous capture.
pub fn save_frame(frame: &RgbImage, path: &Path) -> ImageResult<()> {
    frame.save(path)
}

/// Read a saved capture back and scale it to `size`×`size`.
pub fn load_face(path: &Path, size: u32) -> ImageResult<RgbImage> {
    let image = image::open(path)?.to_rgb8();
    Ok(resize_face(&image, size))
}

pub fn resize_face(image: &RgbImage, size: u32) -> RgbImage {
    imageops::resize(image, size, size, FilterType::Triangle)
}

/// Outline a face in green. `location` is in full-frame coordinates and is
/// clipped to the image.
pub fn draw_highlight(image: &mut RgbImage, location: &FaceLocation) {
    let right = location.right.min(image.width());
    let bottom = location.bottom.min(image.height());
    for inset in 0..HIGHLIGHT_THICKNESS {
        let left = location.left + inset;
        let top = location.top + inset;
        let (Some(w), Some(h)) = (
            right.checked_sub(left + inset).filter(|w| *w > 0),
            bottom.checked_sub(top + inset).filter(|h| *h > 0),
        ) else {
            break;
        };
        let rect = Rect::at(left as i32, top as i32).of_size(w, h);
        draw_hollow_rect_mut(image, rect, HIGHLIGHT_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_image_path() {
        let dir = Path::new("/tmp/captures");
        assert_eq!(face_image_path(dir, "852741"), PathBuf::from("/tmp/captures/852741.jpg"));
        assert_eq!(face_image_path(dir, "../etc"), PathBuf::from("/tmp/captures/.._etc.jpg"));
    }

    #[test]
    fn test_highlight_draws_border_only() {
        let mut image = RgbImage::new(40, 40);
        draw_highlight(&mut image, &FaceLocation::new(10, 30, 30, 10));

        assert_eq!(*image.get_pixel(10, 10), HIGHLIGHT_COLOR);
        assert_eq!(*image.get_pixel(11, 20), HIGHLIGHT_COLOR);
        assert_eq!(*image.get_pixel(29, 29), HIGHLIGHT_COLOR);
        assert_eq!(*image.get_pixel(20, 20), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(5, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_highlight_clips_to_frame() {
        let mut image = RgbImage::new(20, 20);
        draw_highlight(&mut image, &FaceLocation::new(15, 60, 60, 15));
        assert_eq!(*image.get_pixel(15, 15), HIGHLIGHT_COLOR);
        assert_eq!(*image.get_pixel(19, 17), HIGHLIGHT_COLOR);
    }

    #[test]
    fn test_highlight_degenerate_box_is_noop() {
        let mut image = RgbImage::new(20, 20);
        draw_highlight(&mut image, &FaceLocation::new(5, 5, 5, 5));
        assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_save_and_load_face() {
        let dir = tempfile::tempdir().unwrap();
        let path = face_image_path(dir.path(), "E1");
        let frame = RgbImage::from_pixel(64, 48, Rgb([200, 120, 40]));

        save_frame(&frame, &path).unwrap();
        let face = load_face(&path, 216).unwrap();
        assert_eq!(face.dimensions(), (216, 216));
    }

    #[test]
    fn test_load_missing_face_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_face(&dir.path().join("nope.jpg"), 216).is_err());
    }
}
