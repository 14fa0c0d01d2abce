use glam::DVec2;

use crate::braille::BrailleCanvas;

/// Bresenham line between two dots.
pub fn draw_line(canvas: &mut BrailleCanvas, x0: i32, y0: i32, x1: i32, y1: i32) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (x0, y0);

    loop {
        canvas.set_dot(x, y);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Draw a segment given in fractional screen pixels. Segments far outside the canvas or longer
/// than the canvas diagonal are dropped, which also hides lines wrapping across the screen.
pub fn draw_segment(canvas: &mut BrailleCanvas, a: DVec2, b: DVec2) {
    let (w, h) = canvas.dot_size();
    let (w, h) = (w as f64, h as f64);
    if (a - b).length_squared() > w * w + h * h {
        return;
    }
    let outside = |p: DVec2| p.x < -w || p.x > 2.0 * w || p.y < -h || p.y > 2.0 * h;
    if outside(a) || outside(b) {
        return;
    }
    if (a.x < 0.0 && b.x < 0.0) || (a.y < 0.0 && b.y < 0.0) || (a.x >= w && b.x >= w) || (a.y >= h && b.y >= h) {
        return;
    }
    draw_line(
        canvas,
        a.x.floor() as i32,
        a.y.floor() as i32,
        b.x.floor() as i32,
        b.y.floor() as i32,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dots(canvas: &BrailleCanvas) -> usize {
        (0..canvas.height())
            .flat_map(|r| canvas.row(r).collect::<Vec<_>>())
            .map(|c| (c as u32 - 0x2800).count_ones() as usize)
            .sum()
    }

    #[test]
    fn test_horizontal_line() {
        let mut canvas = BrailleCanvas::new(5, 1);
        draw_line(&mut canvas, 0, 0, 9, 0);
        assert_eq!(dots(&canvas), 10);
    }

    #[test]
    fn test_diagonal_line() {
        let mut canvas = BrailleCanvas::new(2, 1);
        draw_line(&mut canvas, 0, 0, 3, 3);
        assert_eq!(canvas.row(0).collect::<String>(), "⠑⢄");
    }

    #[test]
    fn test_segment_culling() {
        let mut canvas = BrailleCanvas::new(4, 2);
        draw_segment(&mut canvas, DVec2::new(-5.0, -5.0), DVec2::new(-1.0, -1.0));
        draw_segment(&mut canvas, DVec2::new(0.0, 0.0), DVec2::new(500.0, 0.0));
        assert!(canvas.is_blank());
        draw_segment(&mut canvas, DVec2::new(0.5, 2.5), DVec2::new(7.9, 2.5));
        assert_eq!(dots(&canvas), 8);
    }
}
