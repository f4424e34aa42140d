//! Upscaling the internal framebuffer onto the window surface.

use rayon::{
    iter::{IndexedParallelIterator, ParallelIterator},
    slice::ParallelSliceMut,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    Nearest,
    Bilinear,
}

/// Source taps for one destination axis. Weights are 8.8 fixed point.
#[derive(Clone, Debug, Default)]
struct Axis {
    near: Vec<usize>,
    far: Vec<usize>,
    weight: Vec<u32>,
}

impl Axis {
    fn build(dst: usize, src: usize, filter: Filter) -> Self {
        let mut axis = Axis {
            near: Vec::with_capacity(dst),
            far: Vec::with_capacity(dst),
            weight: Vec::with_capacity(dst),
        };
        if src == 0 {
            return axis;
        }
        let step = src as f32 / dst as f32;
        let last = src - 1;
        for i in 0..dst {
            match filter {
                Filter::Nearest => {
                    let s = (((i as f32 + 0.5) * step) as usize).min(last);
                    axis.near.push(s);
                    axis.far.push(s);
                    axis.weight.push(0);
                }
                Filter::Bilinear => {
                    let f = ((i as f32 + 0.5) * step - 0.5).max(0.0);
                    let s = (f as usize).min(last);
                    axis.near.push(s);
                    axis.far.push((s + 1).min(last));
                    axis.weight.push(((f - s as f32) * 256.0).round().clamp(0.0, 256.0) as u32);
                }
            }
        }
        axis
    }
}

/// Surfaces take `0RGB`: the top byte must be clear.
const RGB_MASK: u32 = 0x00FF_FFFF;

/// Per-channel mix of two colors, `w` in `0..=256`. Alpha is dropped.
#[inline]
fn mix(a: u32, b: u32, w: u32) -> u32 {
    let inv = 256 - w;
    let rb = (((a & 0x00FF_00FF) * inv + (b & 0x00FF_00FF) * w) >> 8) & 0x00FF_00FF;
    let g = (((a & 0x0000_FF00) * inv + (b & 0x0000_FF00) * w) >> 8) & 0x0000_FF00;
    rb | g
}

/// Stretches a source image to the window size. Lookup tables are kept
/// until either size changes.
#[derive(Clone, Debug, Default)]
pub struct Presenter {
    filter: Filter,
    src: (usize, usize),
    dst: (usize, usize),
    xs: Axis,
    ys: Axis,
}

impl Presenter {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: Filter) {
        if filter != self.filter {
            self.filter = filter;
            self.src = (0, 0);
        }
    }

    fn prepare(&mut self, src: (usize, usize), dst: (usize, usize)) {
        if self.src == src && self.dst == dst {
            return;
        }
        self.xs = Axis::build(dst.0, src.0, self.filter);
        self.ys = Axis::build(dst.1, src.1, self.filter);
        self.src = src;
        self.dst = dst;
    }

    /// Writes `src` (`sw`×`sh`) into `dst` (`dw` wide) as `0RGB`, one row
    /// per task.
    pub fn blit(&mut self, src: &[u32], sw: usize, sh: usize, dst: &mut [u32], dw: usize) {
        if dw == 0 || sw == 0 || sh == 0 || src.len() < sw * sh {
            return;
        }
        let dh = dst.len() / dw;
        self.prepare((sw, sh), (dw, dh));
        let (xs, ys) = (&self.xs, &self.ys);
        let bilinear = self.filter == Filter::Bilinear;

        dst.par_chunks_mut(dw).enumerate().for_each(|(y, row)| {
            let top = &src[ys.near[y] * sw..][..sw];
            if !bilinear {
                for (px, &sx) in row.iter_mut().zip(&xs.near) {
                    *px = top[sx] & RGB_MASK;
                }
                return;
            }
            let bottom = &src[ys.far[y] * sw..][..sw];
            let wy = ys.weight[y];
            for (x, px) in row.iter_mut().enumerate() {
                let (a, b, wx) = (xs.near[x], xs.far[x], xs.weight[x]);
                let upper = mix(top[a], top[b], wx);
                let lower = mix(bottom[a], bottom[b], wx);
                *px = mix(upper, lower, wy);
            }
        });
    }
}
