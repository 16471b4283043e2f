//! Alignment engine - reduce two images to a common comparable region

use tracing::info;

use crate::error::{HarnessError, HarnessResult};
use crate::imaging::ImageBuffer;

/// Center-crop both images to their shared extent.
///
/// Images of identical size are returned untouched. This assumes the only
/// discrepancy is symmetric border truncation; it does no registration.
pub fn align(a: ImageBuffer, b: ImageBuffer) -> HarnessResult<(ImageBuffer, ImageBuffer)> {
    if a.channels() != b.channels() {
        return Err(HarnessError::AlignmentImpossible(format!(
            "channel counts differ: {} vs {}",
            a.channels(),
            b.channels()
        )));
    }

    if a.width() == b.width() && a.height() == b.height() {
        return Ok((a, b));
    }

    let target_h = a.height().min(b.height());
    let target_w = a.width().min(b.width());
    if target_h == 0 || target_w == 0 {
        return Err(HarnessError::AlignmentImpossible(
            "images share no common region".to_string(),
        ));
    }

    info!(
        "Dimensions differ: {}x{} vs {}x{}. Cropping to center intersection {}x{}.",
        a.width(),
        a.height(),
        b.width(),
        b.height(),
        target_w,
        target_h
    );

    Ok((
        crop_center(&a, target_w, target_h)?,
        crop_center(&b, target_w, target_h)?,
    ))
}

fn crop_center(img: &ImageBuffer, w: u32, h: u32) -> HarnessResult<ImageBuffer> {
    let x = (img.width() - w) / 2;
    let y = (img.height() - h) / 2;
    img.crop(x, y, w, h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::BitDepth;
    use test_case::test_case;

    /// Gray image whose sample at (x, y) is `y * 256 + x`
    fn ramp(w: u32, h: u32) -> ImageBuffer {
        let data = (0..h).flat_map(|y| (0..w).map(move |x| (y * 256 + x) as u16)).collect();
        ImageBuffer::new(w, h, 1, BitDepth::Sixteen, data).unwrap()
    }

    #[test]
    fn test_identical_sizes_are_untouched() {
        let img = ramp(5, 4);
        let (a, b) = align(img.clone(), img.clone()).unwrap();
        assert_eq!(a, img);
        assert_eq!(b, img);
    }

    #[test_case(100, 100, 102, 98 ; "border mismatch")]
    #[test_case(7, 3, 4, 9 ; "crossed extents")]
    #[test_case(1, 1, 10, 10 ; "single pixel")]
    #[test_case(33, 20, 32, 20 ; "odd width difference")]
    fn test_aligned_dimensions_are_minimum(w1: u32, h1: u32, w2: u32, h2: u32) {
        let (a, b) = align(ramp(w1, h1), ramp(w2, h2)).unwrap();
        assert_eq!((a.width(), a.height()), (w1.min(w2), h1.min(h2)));
        assert_eq!((b.width(), b.height()), (w1.min(w2), h1.min(h2)));
    }

    #[test]
    fn test_crop_is_centered() {
        // 102 wide, 98 tall against 100x100: x offset 1 on the first, y offset 1 on the second
        let (a, b) = align(ramp(102, 98), ramp(100, 100)).unwrap();
        assert_eq!(a.data()[0], 1);
        assert_eq!(b.data()[0], 256);
    }

    #[test]
    fn test_channel_mismatch_is_alignment_impossible() {
        let rgb = ImageBuffer::new(1, 1, 3, BitDepth::Eight, vec![1, 2, 3]).unwrap();
        let err = align(ramp(1, 1), rgb).unwrap_err();
        assert!(matches!(err, HarnessError::AlignmentImpossible(_)));
    }
}
