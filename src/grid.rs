//! Grid model: validated grid size, cell marks, and the fixed-capacity cell store

use crate::color::Rgb;
use crate::error::{GridError, Result};

/// Number of cell slots in the shared segment
pub const CELL_CAPACITY: usize = 100;
/// Largest grid whose cells fit in `CELL_CAPACITY`
pub const MAX_GRID_SIZE: usize = 10;
pub const DEFAULT_GRID_SIZE: usize = 3;

/// Side length of the grid, guaranteed to satisfy `size * size <= CELL_CAPACITY`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridSize(usize);

impl GridSize {
    pub fn new(size: i64) -> Result<Self> {
        if size < 1 || size > MAX_GRID_SIZE as i64 {
            return Err(GridError::InvalidGridSize {
                requested: size,
                max: MAX_GRID_SIZE,
            });
        }
        Ok(GridSize(size as usize))
    }

    /// Force an untrusted value into range (used for values read back from shared memory)
    pub fn clamped(size: i64) -> Self {
        GridSize(size.clamp(1, MAX_GRID_SIZE as i64) as usize)
    }

    pub fn get(self) -> usize {
        self.0
    }

    pub fn cell_count(self) -> usize {
        self.0 * self.0
    }
}

impl Default for GridSize {
    fn default() -> Self {
        GridSize(DEFAULT_GRID_SIZE)
    }
}

impl std::fmt::Display for GridSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a single cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellMark {
    #[default]
    Empty,
    /// Drawn as a circle (left click)
    Circle,
    /// Drawn as a cross (right click)
    Cross,
}

impl CellMark {
    pub const fn tag(self) -> i32 {
        match self {
            CellMark::Empty => 0,
            CellMark::Circle => 1,
            CellMark::Cross => 2,
        }
    }

    pub const fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(CellMark::Empty),
            1 => Some(CellMark::Circle),
            2 => Some(CellMark::Cross),
            _ => None,
        }
    }
}

/// Fixed-capacity grid of cell marks, indexed `row * size + col`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridStore {
    size: GridSize,
    cells: [CellMark; CELL_CAPACITY],
}

impl GridStore {
    pub fn new(size: GridSize) -> Self {
        Self {
            size,
            cells: [CellMark::Empty; CELL_CAPACITY],
        }
    }

    pub(crate) fn from_raw(size: GridSize, cells: [CellMark; CELL_CAPACITY]) -> Self {
        Self { size, cells }
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    /// Change the grid dimension. Clears all marks since their indices shift.
    pub fn resize(&mut self, size: GridSize) {
        self.size = size;
        self.clear();
    }

    pub fn clear(&mut self) {
        self.cells = [CellMark::Empty; CELL_CAPACITY];
    }

    fn index(&self, row: usize, col: usize) -> Result<usize> {
        let size = self.size.get();
        if row >= size || col >= size {
            return Err(GridError::CellOutOfRange { row, col, size });
        }
        Ok(row * size + col)
    }

    pub fn get(&self, row: usize, col: usize) -> Result<CellMark> {
        Ok(self.cells[self.index(row, col)?])
    }

    pub fn set(&mut self, row: usize, col: usize, mark: CellMark) -> Result<()> {
        let idx = self.index(row, col)?;
        self.cells[idx] = mark;
        Ok(())
    }

    /// All slots, including the ones beyond the active grid
    pub fn raw_cells(&self) -> &[CellMark; CELL_CAPACITY] {
        &self.cells
    }

    /// Non-empty cells of the active grid as `(row, col, mark)`
    pub fn marks(&self) -> impl Iterator<Item = (usize, usize, CellMark)> + '_ {
        let size = self.size.get();
        self.cells[..self.size.cell_count()]
            .iter()
            .enumerate()
            .filter(|(_, mark)| **mark != CellMark::Empty)
            .map(move |(i, mark)| (i / size, i % size, *mark))
    }
}

/// Complete shared state: grid dimension, colors and marks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridState {
    pub grid: GridStore,
    pub background: Rgb,
    pub grid_color: Rgb,
}

impl GridState {
    pub fn new(size: GridSize, background: Rgb, grid_color: Rgb) -> Self {
        Self {
            grid: GridStore::new(size),
            background,
            grid_color,
        }
    }
}

impl Default for GridState {
    fn default() -> Self {
        Self::new(GridSize::default(), Rgb::BLUE, Rgb::RED)
    }
}
