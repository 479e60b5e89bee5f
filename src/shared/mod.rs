//! Cross-process shared grid state
//!
//! One fixed-layout block of named shared memory holds the grid size, both
//! colors and the cell tags. The first process to open it seeds it; every
//! later process attaches to the same block.
//!
//! Writes go through [`SharedRegion::write`], which holds a named
//! cross-process lock for the whole load-mutate-store. Reads are lock-free
//! snapshots of atomic fields and may trail a concurrent writer; a broadcast
//! follows every write, so readers catch up on the next repaint.

use crate::color::Rgb;
use crate::error::{GridError, Result};
use crate::grid::{CellMark, GridSize, GridState, GridStore, CELL_CAPACITY};
use std::io;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use tracing::{debug, info, warn};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix::Segment;

#[cfg(windows)]
mod win32;
#[cfg(windows)]
use win32::Segment;

/// Well-known segment name shared by all instances
pub const SHARED_MEM_NAME: &str = "GridSharedMemory";

const MAGIC: u32 = 0x4752_4944; // "GRID"
const LAYOUT_VERSION: u32 = 2;
/// Attempts before giving up on a name that keeps being released under us
const MAX_OPEN_ATTEMPTS: usize = 8;

/// In-memory layout of the segment. All fields are atomics so that
/// unsynchronized snapshot reads are well-defined across processes.
#[repr(C)]
struct SharedLayout {
    magic: AtomicU32,
    version: AtomicU32,
    attached: AtomicU32,
    /// Bit `n` set while some instance holds placement slot `n`
    slots: AtomicU32,
    generation: AtomicU64,
    grid_size: AtomicI32,
    /// `0x00BBGGRR`
    background: AtomicU32,
    /// `0x00BBGGRR`
    grid_color: AtomicU32,
    cells: [AtomicI32; CELL_CAPACITY],
}

/// Handle to the shared grid state of this process
pub struct SharedRegion {
    segment: Segment,
    name: String,
    created: bool,
    slot: u32,
}

impl SharedRegion {
    /// Open the named region, creating and seeding it if no other process has.
    ///
    /// Failing to create or map the segment is fatal for the caller.
    pub fn create_or_attach(name: &str, seed: &GridState) -> Result<Self> {
        for _ in 0..MAX_OPEN_ATTEMPTS {
            let segment = Segment::open(name, std::mem::size_of::<SharedLayout>())?;
            if let Some(region) = Self::attach(segment, name, seed)? {
                return Ok(region);
            }
            debug!("Shared region `{}` was released while opening, retrying", name);
        }

        Err(GridError::shm(
            "attach",
            name,
            io::Error::new(io::ErrorKind::Other, "region keeps being released"),
        ))
    }

    /// Join an opened segment. `None` when the last instance released the
    /// name between our open and our lock; the caller must open it again.
    fn attach(segment: Segment, name: &str, seed: &GridState) -> Result<Option<Self>> {
        let (created, slot) = {
            let _guard = segment.lock()?;
            if !segment.is_current()? {
                return Ok(None);
            }

            // SAFETY: the mapping is at least size_of::<SharedLayout>() bytes,
            // page aligned, and every bit pattern is a valid atomic integer.
            let layout = unsafe { &*(segment.as_ptr() as *const SharedLayout) };

            // No attached instance means the previous group is gone, even if
            // its release did not reach the name
            let created = if layout.magic.load(Ordering::Acquire) != MAGIC
                || layout.attached.load(Ordering::Acquire) == 0
            {
                store_state(layout, seed);
                layout.generation.store(0, Ordering::Relaxed);
                layout.attached.store(0, Ordering::Relaxed);
                layout.slots.store(0, Ordering::Relaxed);
                layout.version.store(LAYOUT_VERSION, Ordering::Relaxed);
                layout.magic.store(MAGIC, Ordering::Release);
                true
            } else {
                let version = layout.version.load(Ordering::Acquire);
                if version != LAYOUT_VERSION {
                    return Err(GridError::shm(
                        "attach",
                        name,
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("layout version {} (expected {})", version, LAYOUT_VERSION),
                        ),
                    ));
                }
                false
            };

            let previous = layout.attached.fetch_add(1, Ordering::AcqRel);
            (created, claim_slot(layout, previous))
        };

        if created {
            info!("Created shared region `{}`", name);
        } else {
            info!("Attached to shared region `{}` in slot {}", name, slot);
        }

        Ok(Some(Self {
            segment,
            name: name.to_string(),
            created,
            slot,
        }))
    }

    fn layout(&self) -> &SharedLayout {
        // SAFETY: see create_or_attach; the mapping lives as long as `self.segment`.
        unsafe { &*(self.segment.as_ptr() as *const SharedLayout) }
    }

    /// Whether this handle initialized the region
    pub fn created(&self) -> bool {
        self.created
    }

    /// Lowest placement slot that was free when this process attached
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Number of completed writes since the region was seeded
    pub fn generation(&self) -> u64 {
        self.layout().generation.load(Ordering::Acquire)
    }

    /// Unsynchronized snapshot for rendering
    pub fn read(&self) -> GridState {
        load_state(self.layout())
    }

    /// Apply `mutator` atomically with respect to writers in other processes.
    ///
    /// The state is stored back only if the mutator succeeds.
    pub fn write<R>(&self, mutator: impl FnOnce(&mut GridState) -> Result<R>) -> Result<R> {
        let _guard = self.segment.lock()?;
        let layout = self.layout();

        let mut state = load_state(layout);
        let out = mutator(&mut state)?;
        store_state(layout, &state);
        layout.generation.fetch_add(1, Ordering::AcqRel);

        Ok(out)
    }

    pub fn set_cell(&self, row: usize, col: usize, mark: CellMark) -> Result<()> {
        self.write(|state| state.grid.set(row, col, mark))
    }

    pub fn set_background(&self, color: Rgb) -> Result<()> {
        self.write(|state| {
            state.background = color;
            Ok(())
        })
    }

    pub fn set_grid_color(&self, color: Rgb) -> Result<()> {
        self.write(|state| {
            state.grid_color = color;
            Ok(())
        })
    }

    /// Change the shared grid dimension; clears every mark
    pub fn resize_grid(&self, size: i64) -> Result<()> {
        let size = GridSize::new(size)?;
        self.write(|state| {
            state.grid.resize(size);
            Ok(())
        })
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        match self.segment.lock() {
            Ok(_guard) => {
                let layout = self.layout();
                if self.slot < u32::BITS {
                    layout.slots.fetch_and(!(1 << self.slot), Ordering::AcqRel);
                }
                let previous = layout.attached.fetch_sub(1, Ordering::AcqRel);
                if previous <= 1 {
                    debug!("Last instance detached from `{}`", self.name);
                    self.segment.release_name();
                }
            }
            Err(e) => warn!("Failed to detach from shared region: {}", e),
        }
    }
}

/// Take the lowest free slot; with every bit taken, fall back to the attach count
fn claim_slot(layout: &SharedLayout, attached: u32) -> u32 {
    let taken = layout.slots.load(Ordering::Acquire);
    let slot = taken.trailing_ones();
    if slot < u32::BITS {
        layout.slots.fetch_or(1 << slot, Ordering::AcqRel);
        slot
    } else {
        attached.max(u32::BITS)
    }
}

fn load_state(layout: &SharedLayout) -> GridState {
    let size = GridSize::clamped(layout.grid_size.load(Ordering::Acquire) as i64);

    let mut cells = [CellMark::Empty; CELL_CAPACITY];
    for (cell, raw) in cells.iter_mut().zip(layout.cells.iter()) {
        *cell = CellMark::from_tag(raw.load(Ordering::Relaxed)).unwrap_or_default();
    }

    GridState {
        grid: GridStore::from_raw(size, cells),
        background: Rgb::from_colorref(layout.background.load(Ordering::Relaxed)),
        grid_color: Rgb::from_colorref(layout.grid_color.load(Ordering::Relaxed)),
    }
}

fn store_state(layout: &SharedLayout, state: &GridState) {
    for (raw, cell) in layout.cells.iter().zip(state.grid.raw_cells().iter()) {
        raw.store(cell.tag(), Ordering::Relaxed);
    }
    layout
        .background
        .store(state.background.to_colorref(), Ordering::Relaxed);
    layout
        .grid_color
        .store(state.grid_color.to_colorref(), Ordering::Relaxed);
    layout
        .grid_size
        .store(state.grid.size().get() as i32, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

    /// Short unique segment name (macOS caps shm names at 31 bytes)
    fn unique_name() -> String {
        format!(
            "t{}-{}",
            std::process::id(),
            NEXT_ID.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn test_first_open_seeds_defaults() {
        let name = unique_name();
        let region = SharedRegion::create_or_attach(&name, &GridState::default()).unwrap();

        assert!(region.created());
        assert_eq!(region.slot(), 0);
        assert_eq!(region.generation(), 0);

        let state = region.read();
        assert_eq!(state.grid.size().get(), 3);
        assert_eq!(state.background, Rgb::BLUE);
        assert_eq!(state.grid_color, Rgb::RED);
        assert_eq!(state.grid.marks().count(), 0);
    }

    #[test]
    fn test_second_open_attaches_without_reseeding() {
        let name = unique_name();
        let first = SharedRegion::create_or_attach(&name, &GridState::default()).unwrap();
        first.set_cell(0, 0, CellMark::Circle).unwrap();

        let other_seed = GridState::new(GridSize::new(5).unwrap(), Rgb::new(1, 2, 3), Rgb::RED);
        let second = SharedRegion::create_or_attach(&name, &other_seed).unwrap();

        assert!(!second.created());
        assert_eq!(second.slot(), 1);
        let state = second.read();
        assert_eq!(state.grid.size().get(), 3);
        assert_eq!(state.background, Rgb::BLUE);
        assert_eq!(state.grid.get(0, 0).unwrap(), CellMark::Circle);
    }

    #[test]
    fn test_cell_writes_land_at_expected_index() {
        let name = unique_name();
        let region = SharedRegion::create_or_attach(&name, &GridState::default()).unwrap();

        region.set_cell(0, 0, CellMark::Circle).unwrap();
        region.set_cell(1, 1, CellMark::Cross).unwrap();

        let state = region.read();
        let cells = state.grid.raw_cells();
        assert_eq!(cells[0].tag(), 1);
        assert_eq!(cells[4].tag(), 2);
        for (i, cell) in cells.iter().enumerate() {
            if i != 0 && i != 4 {
                assert_eq!(cell.tag(), 0, "cell {} should be empty", i);
            }
        }
        assert_eq!(region.generation(), 2);
    }

    #[test]
    fn test_out_of_range_cell_is_not_written() {
        let name = unique_name();
        let region = SharedRegion::create_or_attach(&name, &GridState::default()).unwrap();

        assert!(region.set_cell(3, 0, CellMark::Cross).is_err());
        assert_eq!(region.generation(), 0);
        assert_eq!(region.read().grid.marks().count(), 0);
    }

    #[test]
    fn test_oversized_grid_rejected() {
        let name = unique_name();
        let region = SharedRegion::create_or_attach(&name, &GridState::default()).unwrap();
        region.set_cell(2, 2, CellMark::Circle).unwrap();

        let err = region.resize_grid(15).unwrap_err();
        assert!(matches!(err, GridError::InvalidGridSize { requested: 15, .. }));

        let state = region.read();
        assert_eq!(state.grid.size().get(), 3);
        assert_eq!(state.grid.get(2, 2).unwrap(), CellMark::Circle);
    }

    #[test]
    fn test_resize_grid_clears_marks() {
        let name = unique_name();
        let region = SharedRegion::create_or_attach(&name, &GridState::default()).unwrap();
        region.set_cell(1, 2, CellMark::Cross).unwrap();

        region.resize_grid(10).unwrap();
        let state = region.read();
        assert_eq!(state.grid.size().get(), 10);
        assert_eq!(state.grid.marks().count(), 0);
    }

    #[test]
    fn test_colors_are_shared() {
        let name = unique_name();
        let a = SharedRegion::create_or_attach(&name, &GridState::default()).unwrap();
        let b = SharedRegion::create_or_attach(&name, &GridState::default()).unwrap();

        a.set_background(Rgb::new(10, 20, 30)).unwrap();
        b.set_grid_color(Rgb::new(0, 255, 0)).unwrap();

        for region in [&a, &b] {
            let state = region.read();
            assert_eq!(state.background, Rgb::new(10, 20, 30));
            assert_eq!(state.grid_color, Rgb::new(0, 255, 0));
        }
    }

    #[test]
    fn test_concurrent_writers_lose_no_updates() {
        const ROUNDS: u8 = 100;

        let name = unique_name();
        let keeper = SharedRegion::create_or_attach(
            &name,
            &GridState::new(GridSize::default(), Rgb::new(0, 0, 0), Rgb::RED),
        )
        .unwrap();

        let writers: Vec<_> = [(0usize, CellMark::Circle), (2usize, CellMark::Cross)]
            .into_iter()
            .map(|(row, mark)| {
                let name = name.clone();
                thread::spawn(move || {
                    let region =
                        SharedRegion::create_or_attach(&name, &GridState::default()).unwrap();
                    for _ in 0..ROUNDS {
                        region
                            .write(|state| {
                                state.background.r = state.background.r.wrapping_add(1);
                                Ok(())
                            })
                            .unwrap();
                    }
                    region.set_cell(row, row, mark).unwrap();
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }

        let state = keeper.read();
        assert_eq!(state.background.r, 2 * ROUNDS);
        assert_eq!(state.grid.get(0, 0).unwrap(), CellMark::Circle);
        assert_eq!(state.grid.get(2, 2).unwrap(), CellMark::Cross);
        assert_eq!(keeper.generation(), 2 * (ROUNDS as u64 + 1));
    }

    #[test]
    fn test_open_during_last_detach_joins_the_live_region() {
        let name = unique_name();
        let seed = GridState::default();
        let first = SharedRegion::create_or_attach(&name, &seed).unwrap();
        first.set_cell(0, 0, CellMark::Circle).unwrap();

        // Opened before the last instance detaches, locked only afterwards
        let early = Segment::open(&name, std::mem::size_of::<SharedLayout>()).unwrap();
        drop(first);

        let joined = SharedRegion::attach(early, &name, &seed).unwrap();
        #[cfg(unix)]
        assert!(joined.is_none(), "unlinked segment must not be joined");
        let late = match joined {
            Some(region) => region,
            None => SharedRegion::create_or_attach(&name, &seed).unwrap(),
        };
        let next = SharedRegion::create_or_attach(&name, &seed).unwrap();

        assert!(late.created());
        assert!(!next.created());
        assert_eq!(late.read().grid.get(0, 0).unwrap(), CellMark::Empty);

        late.set_cell(1, 1, CellMark::Cross).unwrap();
        assert_eq!(next.read().grid.get(1, 1).unwrap(), CellMark::Cross);
    }

    #[test]
    fn test_slots_are_reused_after_detach() {
        let name = unique_name();
        let seed = GridState::default();
        let a = SharedRegion::create_or_attach(&name, &seed).unwrap();
        let b = SharedRegion::create_or_attach(&name, &seed).unwrap();
        assert_eq!((a.slot(), b.slot()), (0, 1));

        drop(a);
        let c = SharedRegion::create_or_attach(&name, &seed).unwrap();
        let d = SharedRegion::create_or_attach(&name, &seed).unwrap();
        assert!(!c.created());
        assert_eq!(c.slot(), 0);
        assert_eq!(d.slot(), 2);
        drop(b);
    }

    #[test]
    fn test_last_detach_releases_region() {
        let name = unique_name();
        {
            let region = SharedRegion::create_or_attach(&name, &GridState::default()).unwrap();
            region.set_cell(0, 1, CellMark::Cross).unwrap();
        }

        let region = SharedRegion::create_or_attach(&name, &GridState::default()).unwrap();
        assert!(region.created());
        assert_eq!(region.read().grid.marks().count(), 0);
    }
}
