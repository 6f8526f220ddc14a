//! Grid arithmetic for virtual desktop placement
//!
//! Desktops are laid out row-major over `rows` rows; the column count is
//! derived from the desktop count. All functions here are pure so the
//! management interface can apply their results and broadcast only the
//! positions that actually changed.

/// A `(row, column)` grid coordinate
pub type Cell = (u32, u32);

/// `ceil(desktops / rows)`, zero when there are no desktops
pub fn column_count(desktops: usize, rows: u32) -> u32 {
    if rows == 0 {
        return 0;
    }
    let desktops = desktops as u32;
    desktops.div_ceil(rows)
}

/// Cell of the `index`-th slot in a grid `columns` wide
pub fn cell_at(index: u32, columns: u32) -> Cell {
    let columns = columns.max(1);
    (index / columns, index % columns)
}

/// Where a desktop created while `count` desktops exist lands by default
pub fn default_cell(count: usize, columns: u32) -> Cell {
    cell_at(count as u32, columns)
}

/// Sequential cells for `count` desktops already sorted by position.
///
/// When `hole` would be produced, that slot is skipped once so an explicitly
/// positioned desktop can take it afterwards.
pub fn renumber(count: usize, columns: u32, hole: Option<Cell>) -> Vec<Cell> {
    let mut cells = Vec::with_capacity(count);
    let mut index = 0u32;
    for _ in 0..count {
        let mut cell = cell_at(index, columns);
        if Some(cell) == hole {
            index += 1;
            cell = cell_at(index, columns);
        }
        cells.push(cell);
        index += 1;
    }
    cells
}
