use std::ops::{Index, IndexMut};

/// Row-major 2D buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer2<T> {
    pixels: Vec<T>,
    width: usize,
    height: usize,
}

impl<T> Buffer2<T> {
    pub fn new(width: usize, height: usize, pixels: Vec<T>) -> Self {
        assert_eq!(
            pixels.len(),
            width * height,
            "pixels length must equal width * height"
        );
        Self {
            pixels,
            width,
            height,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        debug_assert!(x < self.width && y < self.height);
        &self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.pixels
    }

    #[inline]
    pub fn into_pixels(self) -> Vec<T> {
        self.pixels
    }

    /// Row `y` as a slice.
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        &self.pixels[y * self.width..(y + 1) * self.width]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        let width = self.width;
        &mut self.pixels[y * width..(y + 1) * width]
    }

    /// Applies `f` to every pixel, producing a buffer of the same shape.
    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Buffer2<U> {
        Buffer2 {
            pixels: self.pixels.iter().map(f).collect(),
            width: self.width,
            height: self.height,
        }
    }
}

impl<T: Copy> Buffer2<T> {
    /// Copies the `width` x `height` region starting at (`x`, `y`) into a new buffer.
    ///
    /// # Panics
    ///
    /// Panics if the region does not lie inside the buffer.
    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> Self {
        assert!(
            x + width <= self.width && y + height <= self.height,
            "crop region {width}x{height} at ({x}, {y}) exceeds {}x{} buffer",
            self.width,
            self.height
        );
        let mut pixels = Vec::with_capacity(width * height);
        for row in y..y + height {
            let start = row * self.width + x;
            pixels.extend_from_slice(&self.pixels[start..start + width]);
        }
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Writes `src` into this buffer with its top-left corner at (`x`, `y`).
    ///
    /// # Panics
    ///
    /// Panics if `src` does not fit.
    pub fn paste(&mut self, x: usize, y: usize, src: &Self) {
        assert!(
            x + src.width <= self.width && y + src.height <= self.height,
            "paste of {}x{} at ({x}, {y}) exceeds {}x{} buffer",
            src.width,
            src.height,
            self.width,
            self.height
        );
        for row in 0..src.height {
            let dst = (y + row) * self.width + x;
            self.pixels[dst..dst + src.width].copy_from_slice(src.row(row));
        }
    }
}

impl<T: Clone> Buffer2<T> {
    pub fn new_filled(width: usize, height: usize, value: T) -> Self {
        Self {
            pixels: vec![value; width * height],
            width,
            height,
        }
    }
}

impl<T> Index<(usize, usize)> for Buffer2<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        &self.pixels[y * self.width + x]
    }
}

impl<T> IndexMut<(usize, usize)> for Buffer2<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Self::Output {
        &mut self.pixels[y * self.width + x]
    }
}

impl<T> Index<usize> for Buffer2<T> {
    type Output = T;

    #[inline]
    fn index(&self, idx: usize) -> &Self::Output {
        &self.pixels[idx]
    }
}

impl<T> IndexMut<usize> for Buffer2<T> {
    #[inline]
    fn index_mut(&mut self, idx: usize) -> &mut Self::Output {
        &mut self.pixels[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize) -> Buffer2<u32> {
        Buffer2::new(width, height, (0..(width * height) as u32).collect())
    }

    #[test]
    fn test_crop_copies_region() {
        let buf = ramp(4, 3);
        let crop = buf.crop(1, 1, 2, 2);
        assert_eq!(crop.width(), 2);
        assert_eq!(crop.pixels(), &[5, 6, 9, 10]);
    }

    #[test]
    fn test_paste_writes_region() {
        let mut buf = Buffer2::new_filled(4, 3, 0u32);
        let patch = Buffer2::new(2, 1, vec![7, 8]);
        buf.paste(2, 2, &patch);
        assert_eq!(buf[(2, 2)], 7);
        assert_eq!(buf[(3, 2)], 8);
        assert_eq!(buf.pixels().iter().filter(|&&v| v != 0).count(), 2);
    }

    #[test]
    fn test_crop_then_paste_restores() {
        let buf = ramp(5, 5);
        let crop = buf.crop(0, 2, 5, 3);
        let mut out = Buffer2::new_filled(5, 5, 0u32);
        out.paste(0, 2, &crop);
        assert_eq!(out.row(3), buf.row(3));
        assert_eq!(out.row(0), &[0, 0, 0, 0, 0]);
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn test_crop_out_of_bounds_panics() {
        ramp(3, 3).crop(2, 2, 2, 2);
    }

    #[test]
    fn test_map_keeps_shape() {
        let buf = ramp(3, 2).map(|&v| v as f64 * 0.5);
        assert_eq!(buf.width(), 3);
        assert_eq!(buf.height(), 2);
        assert_eq!(buf[(2, 1)], 2.5);
    }
}
