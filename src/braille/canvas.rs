/// Dot bit for `(x % 2, y % 4)` inside one Braille cell (U+2800 block).
const DOT_BITS: [[u8; 4]; 2] = [[0x01, 0x02, 0x04, 0x40], [0x08, 0x10, 0x20, 0x80]];

/// Terminal canvas where each character cell holds a 2×4 grid of dots.
#[derive(Debug, Clone)]
pub struct BrailleCanvas {
    /// Size in characters
    width: usize,
    height: usize,
    cells: Vec<u8>,
}

impl BrailleCanvas {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![0; width * height],
        }
    }

    /// Resolution in dots.
    pub fn dot_size(&self) -> (usize, usize) {
        (self.width * 2, self.height * 4)
    }

    #[inline(always)]
    pub fn set_dot(&mut self, x: i32, y: i32) {
        if x < 0 || y < 0 {
            return;
        }
        let (x, y) = (x as usize, y as usize);
        let (cx, cy) = (x / 2, y / 4);
        if cx >= self.width || cy >= self.height {
            return;
        }
        self.cells[cy * self.width + cx] |= DOT_BITS[x % 2][y % 4];
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|&c| c == 0)
    }

    /// Characters of one row. Empty cells come out as U+2800.
    pub fn row(&self, row: usize) -> impl Iterator<Item = char> + '_ {
        let cells = if row < self.height {
            &self.cells[row * self.width..(row + 1) * self.width]
        } else {
            &[][..]
        };
        cells
            .iter()
            .map(|&bits| char::from_u32(0x2800 + u32::from(bits)).unwrap_or(' '))
    }

    pub fn height(&self) -> usize {
        self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(canvas: &BrailleCanvas) -> String {
        (0..canvas.height())
            .map(|r| canvas.row(r).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_single_dot() {
        let mut canvas = BrailleCanvas::new(1, 1);
        canvas.set_dot(0, 0);
        assert_eq!(text(&canvas), "⠁");
    }

    #[test]
    fn test_full_cell() {
        let mut canvas = BrailleCanvas::new(1, 1);
        for x in 0..2 {
            for y in 0..4 {
                canvas.set_dot(x, y);
            }
        }
        assert_eq!(text(&canvas), "⣿");
    }

    #[test]
    fn test_out_of_bounds_ignored() {
        let mut canvas = BrailleCanvas::new(2, 1);
        canvas.set_dot(-1, 0);
        canvas.set_dot(4, 0);
        canvas.set_dot(0, 4);
        assert!(canvas.is_blank());
        canvas.set_dot(3, 3);
        assert_eq!(text(&canvas), "⠀⢀");
        assert_eq!(canvas.dot_size(), (4, 4));
    }
}
