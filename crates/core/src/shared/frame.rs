use image::imageops::FilterType;
use image::RgbImage;
use ndarray::ArrayView3;

/// A single decoded video frame: contiguous RGB bytes in row-major order.
///
/// `index` is the frame's sequence number within its session. Frames are
/// ephemeral; they live only for the duration of one processing step.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    /// Wraps an already-decoded RGB image.
    pub fn from_rgb_image(image: RgbImage, index: usize) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, 3, index)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// True when the pixel buffer is non-empty RGB and agrees with the
    /// declared dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.channels == 3
            && self.data.len() == self.expected_len()
    }

    pub fn as_ndarray(&self) -> Option<ArrayView3<'_, u8>> {
        ArrayView3::from_shape(self.shape(), &self.data).ok()
    }

    /// Scales both linear dimensions by `ratio`, never below one pixel.
    ///
    /// Returns `None` for malformed frames.
    pub fn downscale(&self, ratio: f64) -> Option<Frame> {
        let image = RgbImage::from_raw(self.width, self.height, self.data.clone())?;
        let w = ((self.width as f64 * ratio).round() as u32).max(1);
        let h = ((self.height as f64 * ratio).round() as u32).max(1);
        let resized = image::imageops::resize(&image, w, h, FilterType::Triangle);
        Some(Frame::from_rgb_image(resized, self.index))
    }

    fn expected_len(&self) -> usize {
        (self.width as usize) * (self.height as usize) * (self.channels as usize)
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_and_accessors() {
        let data = vec![0u8; 12]; // 2x2x3
        let frame = Frame::new(data.clone(), 2, 2, 3, 5);
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.index(), 5);
        assert_eq!(frame.data(), &data[..]);
    }

    #[test]
    #[should_panic(expected = "data length must equal width * height * channels")]
    fn test_mismatched_data_length_panics_in_debug() {
        Frame::new(vec![0u8; 10], 2, 2, 3, 0);
    }

    #[test]
    fn test_from_rgb_image_keeps_pixels() {
        let mut img = RgbImage::new(3, 2);
        img.put_pixel(1, 0, image::Rgb([10, 20, 30]));
        let frame = Frame::from_rgb_image(img, 7);
        assert_eq!(frame.width(), 3);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.index(), 7);
        assert_eq!(&frame.data()[3..6], &[10, 20, 30]);
    }

    #[test]
    fn test_zero_sized_frame_is_not_well_formed() {
        let frame = Frame::new(Vec::new(), 0, 0, 3, 0);
        assert!(!frame.is_well_formed());
    }

    #[test]
    fn test_rgb_frame_is_well_formed() {
        let frame = Frame::new(vec![0u8; 12], 2, 2, 3, 0);
        assert!(frame.is_well_formed());
    }

    #[test]
    fn test_as_ndarray_shape() {
        let frame = Frame::new(vec![0u8; 24], 4, 2, 3, 0);
        let arr = frame.as_ndarray().unwrap();
        assert_eq!(arr.shape(), &[2, 4, 3]);
    }

    #[test]
    fn test_downscale_halves_dimensions() {
        let frame = Frame::new(vec![100u8; 40 * 20 * 3], 40, 20, 3, 3);
        let small = frame.downscale(0.5).unwrap();
        assert_eq!(small.width(), 20);
        assert_eq!(small.height(), 10);
        assert_eq!(small.index(), 3);
        assert!(small.is_well_formed());
    }

    #[test]
    fn test_downscale_never_reaches_zero() {
        let frame = Frame::new(vec![0u8; 3], 1, 1, 3, 0);
        let small = frame.downscale(0.1).unwrap();
        assert_eq!((small.width(), small.height()), (1, 1));
    }
}
