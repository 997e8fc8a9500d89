//! Fixed-width locus rows.
//!
//! Every per-sample row stored in the database has the same width. Both the
//! count projector and the sequence filler place their data through these two
//! functions so that a column means the same alignment column everywhere.

/// A row placed into a fixed width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FittedRow<T> {
    pub row: Vec<T>,
    /// Columns the data would occupy without a width limit.
    pub logical_len: usize,
    /// Columns dropped off the end to fit the width.
    pub overflow: usize,
}

/// Copies `data` into a row of exactly `width` cells, padding with `fill`.
pub fn fit_row<T: Copy>(data: &[T], fill: T, width: usize) -> FittedRow<T> {
    let keep = data.len().min(width);
    let mut row = Vec::with_capacity(width);
    row.extend_from_slice(&data[..keep]);
    row.resize(width, fill);
    FittedRow {
        row,
        logical_len: data.len(),
        overflow: data.len() - keep,
    }
}

/// Inserts a `fill` cell at every column flagged in `gaps`, shifting the
/// following data right, then fits the result to `width`.
///
/// The logical length is the data length plus every flagged column, which
/// equals the aligned block length when `gaps` came from that sample's
/// aligned record.
pub fn insert_gap_rows<T: Copy>(data: &[T], gaps: &[bool], fill: T, width: usize) -> FittedRow<T> {
    let ngaps = gaps.iter().filter(|x| **x).count();
    let mut expanded = Vec::with_capacity(data.len() + ngaps);
    let mut source = data.iter();
    let mut col = 0;
    loop {
        if gaps.get(col).copied().unwrap_or(false) {
            expanded.push(fill);
        } else {
            match source.next() {
                Some(&value) => expanded.push(value),
                None => break,
            }
        }
        col += 1;
    }
    let logical_len = data.len() + ngaps;
    let mut fitted = fit_row(&expanded, fill, width);
    fitted.logical_len = logical_len;
    fitted.overflow = logical_len.saturating_sub(width);
    fitted
}
