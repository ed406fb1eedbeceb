use bitvec::prelude::*;

/// One pixel of a region of interest, as stored in an NWB PlaneSegmentation pixel_mask
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelMaskEntry {
    pub x: u32,
    pub y: u32,
    pub weight: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PixelMask {
    pub pixels: Vec<PixelMaskEntry>,
}

/// A line segment in image coordinates (x, y), where pixel (x, y) spans [x, x+1) x [y, y+1)
pub type Segment = [(f32, f32); 2];

/// Build a pixel mask from the linear pixel indices of the processed data.
///
/// The index is split with the number of lines per frame: `row = pi / lines`, `col = pi % lines`
/// and stored as (x = col, y = row) with unit weight.
pub fn pixel_mask_from_list(pixel_list: &[f64], lines_per_frame: usize) -> PixelMask {
    if lines_per_frame == 0 {
        return PixelMask::default();
    }
    let pixels = pixel_list
        .iter()
        .filter(|pi| pi.is_finite() && **pi >= 0.0)
        .map(|pi| {
            let pi = *pi as usize;
            PixelMaskEntry {
                x: (pi % lines_per_frame) as u32,
                y: (pi / lines_per_frame) as u32,
                weight: 1.0,
            }
        })
        .collect();
    PixelMask { pixels }
}

impl PixelMask {
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Rasterise into a row-major (height x width) bit matrix. Pixels outside the frame are dropped
    pub fn to_matrix(&self, height: usize, width: usize) -> MaskMatrix {
        let mut bits = bitvec![0; height * width];
        for px in self.pixels.iter() {
            let (x, y) = (px.x as usize, px.y as usize);
            if x < width && y < height && px.weight > 0.0 {
                bits.set(y * width + x, true);
            }
        }
        MaskMatrix {
            bits,
            height,
            width,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaskMatrix {
    bits: BitVec,
    height: usize,
    width: usize,
}

impl MaskMatrix {
    pub fn get(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return false;
        }
        self.bits[y as usize * self.width + x as usize]
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    /// The edges separating mask pixels from non-mask pixels
    pub fn compute_outline(&self) -> Vec<Segment> {
        let mut segments = Vec::new();
        for idx in self.bits.iter_ones() {
            let (x, y) = ((idx % self.width) as i64, (idx / self.width) as i64);
            let (fx, fy) = (x as f32, y as f32);
            if !self.get(x, y - 1) {
                segments.push([(fx, fy), (fx + 1.0, fy)]);
            }
            if !self.get(x, y + 1) {
                segments.push([(fx, fy + 1.0), (fx + 1.0, fy + 1.0)]);
            }
            if !self.get(x - 1, y) {
                segments.push([(fx, fy), (fx, fy + 1.0)]);
            }
            if !self.get(x + 1, y) {
                segments.push([(fx + 1.0, fy), (fx + 1.0, fy + 1.0)]);
            }
        }
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_mask_arithmetic() {
        let mask = pixel_mask_from_list(&[0.0, 5.0, 6.0, 13.0], 4);
        let coords: Vec<(u32, u32)> = mask.pixels.iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(coords, vec![(0, 0), (1, 1), (2, 1), (1, 3)]);
        assert!(mask.pixels.iter().all(|p| p.weight == 1.0));
    }

    #[test]
    fn test_pixel_mask_skips_invalid() {
        let mask = pixel_mask_from_list(&[f64::NAN, -1.0, 2.0], 4);
        assert_eq!(mask.len(), 1);
        assert!(pixel_mask_from_list(&[1.0], 0).is_empty());
    }

    #[test]
    fn test_outline_of_square() {
        let mask = pixel_mask_from_list(&[5.0, 6.0, 9.0, 10.0], 4);
        let matrix = mask.to_matrix(4, 4);
        assert_eq!(matrix.count(), 4);
        // A 2x2 block has 8 unit boundary edges
        assert_eq!(matrix.compute_outline().len(), 8);
    }

    #[test]
    fn test_outline_drops_out_of_frame() {
        let mask = PixelMask {
            pixels: vec![PixelMaskEntry {
                x: 10,
                y: 0,
                weight: 1.0,
            }],
        };
        let matrix = mask.to_matrix(2, 2);
        assert_eq!(matrix.count(), 0);
        assert!(matrix.compute_outline().is_empty());
    }
}
