//! IPC Grid Library
//!
//! An N x N grid of circle and cross marks shared by every running instance.
//! The state lives in named shared memory; each write is followed by a
//! broadcast so all windows repaint from it.

pub mod app;
pub mod broadcast;
pub mod color;
pub mod config;
pub mod error;
pub mod grid;
pub mod launcher;
pub mod render;
pub mod shared;

pub use error::{GridError, Result};
pub use grid::{CellMark, GridSize, GridState};
pub use shared::SharedRegion;
