//! Grid rendering into a `0x00RRGGBB` pixel buffer, and the inverse hit test
//!
//! Geometry follows integer division: with `n` cells across a client area of
//! width `w`, each cell is `w / n` pixels wide and line `i` sits at `i * (w / n)`.
//! Any leftover pixels on the right and bottom edges belong to no cell.

use crate::grid::{CellMark, GridSize, GridState};

/// Distance between a cell boundary and the mark drawn inside it
pub const MARK_INSET: i32 = 5;

/// Mutable view over a pixel buffer. Drawing outside the bounds is clipped.
pub struct Canvas<'a> {
    pixels: &'a mut [u32],
    width: u32,
    height: u32,
}

impl<'a> Canvas<'a> {
    /// `pixels` must hold at least `width * height` entries
    pub fn new(pixels: &'a mut [u32], width: u32, height: u32) -> Self {
        debug_assert!(pixels.len() >= (width as usize) * (height as usize));
        Self {
            pixels,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fill(&mut self, color: u32) {
        let len = (self.width as usize) * (self.height as usize);
        self.pixels[..len].fill(color);
    }

    fn plot(&mut self, x: i32, y: i32, color: u32) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let idx = y as usize * self.width as usize + x as usize;
        self.pixels[idx] = color;
    }

    /// Bresenham line, both endpoints included
    pub fn line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: u32) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x0, y0);

        loop {
            self.plot(x, y, color);
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

    /// Outline of the ellipse inscribed in `[left, right) x [top, bottom)`
    pub fn ellipse(&mut self, left: i32, top: i32, right: i32, bottom: i32, color: u32) {
        if right <= left || bottom <= top {
            return;
        }
        let cx = (left + right) as f32 / 2.0;
        let cy = (top + bottom) as f32 / 2.0;
        let rx = (right - left) as f32 / 2.0;
        let ry = (bottom - top) as f32 / 2.0;

        // Scan both axes so steep and flat parts of the outline have no gaps
        for x in left..right {
            let t = (x as f32 + 0.5 - cx) / rx;
            if t.abs() <= 1.0 {
                let dy = ry * (1.0 - t * t).sqrt();
                self.plot(x, (cy - dy).round() as i32, color);
                self.plot(x, (cy + dy).round() as i32 - 1, color);
            }
        }
        for y in top..bottom {
            let t = (y as f32 + 0.5 - cy) / ry;
            if t.abs() <= 1.0 {
                let dx = rx * (1.0 - t * t).sqrt();
                self.plot((cx - dx).round() as i32, y, color);
                self.plot((cx + dx).round() as i32 - 1, y, color);
            }
        }
    }
}

/// Pixel size of one cell, or `None` when the client area is too small to
/// give every cell at least one pixel
pub fn cell_extent(client_width: u32, client_height: u32, size: GridSize) -> Option<(u32, u32)> {
    let n = size.get() as u32;
    let (cw, ch) = (client_width / n, client_height / n);
    if cw == 0 || ch == 0 {
        None
    } else {
        Some((cw, ch))
    }
}

/// Cell under the pointer as `(row, col)`.
///
/// Positions in the leftover strip past the last cell, or outside the client
/// area, hit nothing.
pub fn cell_at(
    x: f64,
    y: f64,
    client_width: u32,
    client_height: u32,
    size: GridSize,
) -> Option<(usize, usize)> {
    if x < 0.0 || y < 0.0 {
        return None;
    }
    let (cw, ch) = cell_extent(client_width, client_height, size)?;
    let col = (x as u32 / cw) as usize;
    let row = (y as u32 / ch) as usize;
    if row >= size.get() || col >= size.get() {
        return None;
    }
    Some((row, col))
}

/// Draw the whole grid view for `state`
pub fn render(canvas: &mut Canvas<'_>, state: &GridState) {
    canvas.fill(state.background.to_pixel());

    let size = state.grid.size();
    let Some((cw, ch)) = cell_extent(canvas.width(), canvas.height(), size) else {
        return;
    };
    let (cw, ch) = (cw as i32, ch as i32);
    let (w, h) = (canvas.width() as i32, canvas.height() as i32);
    let pen = state.grid_color.to_pixel();

    for i in 0..=size.get() as i32 {
        canvas.line(i * cw, 0, i * cw, h - 1, pen);
        canvas.line(0, i * ch, w - 1, i * ch, pen);
    }

    for (row, col, mark) in state.grid.marks() {
        let x0 = col as i32 * cw;
        let y0 = row as i32 * ch;
        let (left, top) = (x0 + MARK_INSET, y0 + MARK_INSET);
        let (right, bottom) = (x0 + cw - MARK_INSET, y0 + ch - MARK_INSET);
        if right <= left || bottom <= top {
            continue;
        }

        match mark {
            CellMark::Circle => canvas.ellipse(left, top, right, bottom, pen),
            CellMark::Cross => {
                canvas.line(left, top, right, bottom, pen);
                canvas.line(left, bottom, right, top, pen);
            }
            CellMark::Empty => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;
    use crate::grid::GridStore;

    const BG: Rgb = Rgb::new(0, 0, 255);
    const PEN: Rgb = Rgb::new(255, 0, 0);

    fn state(size: i64) -> GridState {
        GridState::new(GridSize::new(size).unwrap(), BG, PEN)
    }

    fn draw(state: &GridState, w: u32, h: u32) -> Vec<u32> {
        let mut pixels = vec![0u32; (w * h) as usize];
        render(&mut Canvas::new(&mut pixels, w, h), state);
        pixels
    }

    fn at(pixels: &[u32], w: u32, x: u32, y: u32) -> u32 {
        pixels[(y * w + x) as usize]
    }

    #[test]
    fn test_cell_center_maps_back_to_cell() {
        for n in 1..=10 {
            let size = GridSize::new(n).unwrap();
            for (w, h) in [(320, 240), (301, 199), (100, 100)] {
                let (cw, ch) = cell_extent(w, h, size).unwrap();
                for row in 0..n as usize {
                    for col in 0..n as usize {
                        let x = col as f64 * cw as f64 + cw as f64 / 2.0;
                        let y = row as f64 * ch as f64 + ch as f64 / 2.0;
                        assert_eq!(cell_at(x, y, w, h, size), Some((row, col)));
                    }
                }
            }
        }
    }

    #[test]
    fn test_edge_strip_is_rejected() {
        let size = GridSize::new(3).unwrap();
        // 100 / 3 = 33, so x in 99..100 is past the last cell
        assert_eq!(cell_at(99.0, 10.0, 100, 100, size), None);
        assert_eq!(cell_at(98.0, 98.0, 100, 100, size), Some((2, 2)));
        assert_eq!(cell_at(-1.0, 10.0, 100, 100, size), None);
    }

    #[test]
    fn test_tiny_client_hits_nothing() {
        let size = GridSize::new(10).unwrap();
        assert_eq!(cell_at(3.0, 3.0, 9, 9, size), None);
    }

    #[test]
    fn test_grid_lines_and_background() {
        let pixels = draw(&state(3), 90, 90);
        let (bg, pen) = (BG.to_pixel(), PEN.to_pixel());

        for i in 0..90 {
            assert_eq!(at(&pixels, 90, 0, i), pen);
            assert_eq!(at(&pixels, 90, 30, i), pen);
            assert_eq!(at(&pixels, 90, 60, i), pen);
            assert_eq!(at(&pixels, 90, i, 0), pen);
            assert_eq!(at(&pixels, 90, i, 60), pen);
        }
        assert_eq!(at(&pixels, 90, 15, 15), bg);
        assert_eq!(at(&pixels, 90, 75, 45), bg);
    }

    #[test]
    fn test_cross_passes_through_cell_center() {
        let mut s = state(3);
        s.grid.set(1, 1, CellMark::Cross).unwrap();
        let pixels = draw(&s, 90, 90);
        let pen = PEN.to_pixel();

        assert_eq!(at(&pixels, 90, 45, 45), pen);
        assert_eq!(at(&pixels, 90, 35, 35), pen);
        assert_eq!(at(&pixels, 90, 35, 55), pen);
        // Inset keeps the mark off the cell corners
        assert_eq!(at(&pixels, 90, 32, 32), BG.to_pixel());
    }

    #[test]
    fn test_circle_is_an_outline() {
        let mut s = state(3);
        s.grid.set(0, 0, CellMark::Circle).unwrap();
        let pixels = draw(&s, 90, 90);
        let pen = PEN.to_pixel();

        // Center stays background, outline crosses the vertical midline near the top
        assert_eq!(at(&pixels, 90, 15, 15), BG.to_pixel());
        assert!((4..=6).any(|y| at(&pixels, 90, 15, y) == pen));
        assert!((24..=26).any(|y| at(&pixels, 90, 15, y) == pen));
        assert!((4..=6).any(|x| at(&pixels, 90, x, 15) == pen));
    }

    #[test]
    fn test_marks_outside_active_grid_ignored() {
        let mut s = state(3);
        s.grid.set(2, 2, CellMark::Cross).unwrap();
        // Slot 8 is beyond a 2x2 grid's four cells
        s.grid = GridStore::from_raw(GridSize::new(2).unwrap(), *s.grid.raw_cells());
        let pixels = draw(&s, 60, 60);
        assert_eq!(at(&pixels, 60, 45, 45), BG.to_pixel());
    }

    #[test]
    fn test_small_cells_skip_marks() {
        let mut s = state(10);
        s.grid.set(0, 0, CellMark::Cross).unwrap();
        // 8 px cells leave no room inside a 5 px inset
        let pixels = draw(&s, 80, 80);
        assert_eq!(at(&pixels, 80, 4, 4), BG.to_pixel());
    }
}
