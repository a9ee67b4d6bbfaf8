use crate::frame::{Frame, BYTES_PER_PIXEL};

// 5x5 Gaussian with sigma derived from the kernel size: [1 4 6 4 1] / 16 per axis.
const KERNEL: [u32; 5] = [1, 4, 6, 4, 1];

/// Single-channel 8-bit image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn sum(&self) -> u64 {
        self.data.iter().map(|&v| v as u64).sum()
    }

    fn at(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width as usize + x]
    }
}

/// Per-channel absolute difference of two equally sized frames.
pub fn absdiff(first: &Frame, second: &Frame) -> Vec<u8> {
    first
        .pixels()
        .iter()
        .zip(second.pixels())
        .map(|(&a, &b)| a.abs_diff(b))
        .collect()
}

/// RGB24 to luma with the usual 0.299/0.587/0.114 weights (14-bit fixed point).
pub fn to_grayscale(rgb: &[u8], width: u32, height: u32) -> GrayImage {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    let data = rgb
        .chunks_exact(BYTES_PER_PIXEL)
        .map(|px| {
            let luma = px[0] as u32 * R + px[1] as u32 * G + px[2] as u32 * B;
            ((luma + (1 << 13)) >> 14) as u8
        })
        .collect();
    GrayImage {
        width,
        height,
        data,
    }
}

/// Separable 5x5 Gaussian blur with reflect-101 borders.
pub fn blur_5x5(src: &GrayImage) -> GrayImage {
    let (w, h) = (src.width as usize, src.height as usize);
    if w == 0 || h == 0 {
        return src.clone();
    }

    let mut horizontal = vec![0u32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0u32;
            for (k, weight) in KERNEL.iter().enumerate() {
                let sx = reflect_101(x as isize + k as isize - 2, w);
                acc += weight * src.at(sx, y) as u32;
            }
            horizontal[y * w + x] = acc;
        }
    }

    let mut data = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0u32;
            for (k, weight) in KERNEL.iter().enumerate() {
                let sy = reflect_101(y as isize + k as isize - 2, h);
                acc += weight * horizontal[sy * w + x];
            }
            data[y * w + x] = ((acc + 128) >> 8) as u8;
        }
    }

    GrayImage {
        width: src.width,
        height: src.height,
        data,
    }
}

/// Pixels strictly above `cutoff` become 255, everything else 0.
pub fn binary_threshold(src: &GrayImage, cutoff: u8) -> GrayImage {
    GrayImage {
        width: src.width,
        height: src.height,
        data: src
            .data
            .iter()
            .map(|&v| if v > cutoff { super::THRESHOLD_HIGH } else { 0 })
            .collect(),
    }
}

fn reflect_101(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let last = len as isize - 1;
    let mut i = i;
    // Kernel radius is 2, so at most one reflection per side for len >= 3.
    while i < 0 || i > last {
        if i < 0 {
            i = -i;
        }
        if i > last {
            i = 2 * last - i;
        }
    }
    i as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32, data: Vec<u8>) -> GrayImage {
        GrayImage {
            width,
            height,
            data,
        }
    }

    #[test]
    fn absdiff_is_symmetric() {
        let a = Frame::filled(2, 1, [10, 200, 30]);
        let b = Frame::filled(2, 1, [50, 100, 30]);
        assert_eq!(absdiff(&a, &b), vec![40, 100, 0, 40, 100, 0]);
        assert_eq!(absdiff(&a, &b), absdiff(&b, &a));
    }

    #[test]
    fn grayscale_weights() {
        let img = to_grayscale(&[255, 255, 255, 255, 0, 0, 0, 255, 0, 0, 0, 255], 4, 1);
        assert_eq!(img.data, vec![255, 76, 150, 29]);
    }

    #[test]
    fn blur_preserves_uniform_image() {
        let img = gray(7, 5, vec![90; 35]);
        assert_eq!(blur_5x5(&img), img);
    }

    #[test]
    fn blur_spreads_single_point() {
        let mut data = vec![0u8; 81];
        data[4 * 9 + 4] = 255;
        let out = blur_5x5(&gray(9, 9, data));
        // Centre weight 36/256, direct neighbour 24/256, two away 6/256.
        assert_eq!(out.at(4, 4), 36);
        assert_eq!(out.at(5, 4), 24);
        assert_eq!(out.at(6, 4), 6);
        assert_eq!(out.at(7, 4), 0);
    }

    #[test]
    fn reflect_101_mirrors_without_repeating_edge() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(-2, 5), 2);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(6, 5), 2);
        assert_eq!(reflect_101(-2, 2), 0);
        assert_eq!(reflect_101(3, 1), 0);
    }

    #[test]
    fn threshold_is_strict() {
        let img = gray(3, 1, vec![20, 21, 255]);
        assert_eq!(binary_threshold(&img, 20).data, vec![0, 255, 255]);
    }
}
