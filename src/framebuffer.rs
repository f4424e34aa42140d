use crate::texture::pack_rgb;

/// CPU color buffer the compositors draw into, row-major `0xAARRGGBB`.
#[derive(Clone, Debug, PartialEq)]
pub struct Framebuffer {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u32>,
    pub background: u32,
}

impl Framebuffer {
    pub fn new(width: usize, height: usize) -> Self {
        let background = pack_rgb(0, 0, 0);
        Self {
            width,
            height,
            pixels: vec![background; width * height],
            background,
        }
    }

    /// Reallocates for a new size; contents are reset to the background.
    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels.resize(width * height, self.background);
    }

    #[inline]
    pub fn set_pixel(&mut self, x: usize, y: usize, color: u32) {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x] = color;
        }
    }

    #[inline]
    pub fn get_pixel(&self, x: usize, y: usize) -> u32 {
        if x < self.width && y < self.height {
            return self.pixels[y * self.width + x];
        }
        self.background
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [u32] {
        let w = self.width;
        &mut self.pixels[y * w..(y + 1) * w]
    }

    /// Copies a full-frame image of the same size over the buffer.
    pub fn copy_from(&mut self, image: &[u32]) {
        if image.len() == self.pixels.len() {
            self.pixels.copy_from_slice(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_writes_are_ignored() {
        let mut fb = Framebuffer::new(4, 3);
        fb.set_pixel(4, 0, 1);
        fb.set_pixel(0, 3, 1);
        assert!(fb.pixels.iter().all(|&p| p == fb.background));
        fb.set_pixel(3, 2, 9);
        assert_eq!(fb.get_pixel(3, 2), 9);
        assert_eq!(fb.get_pixel(10, 10), fb.background);
    }
}
