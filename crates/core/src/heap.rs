//! The heap
//!
//! One `Heap` owns every series node, the symbol interner, and the
//! allocation bookkeeping the collector steers by:
//!
//! - **byte accounting**: segment and content bytes in and out, with a
//!   high-water mark;
//! - **ballast**: a countdown debited by every allocation and expansion;
//!   when it goes non-positive the next safe point runs a collection;
//! - **manuals list**: series not yet under GC control. They are freed
//!   explicitly, promoted via `manage`, or reclaimed wholesale when an
//!   unwind abandons everything above a watermark;
//! - **root cells**: values the host has pinned.
//!
//! The collector itself lives upstream (it needs frames and actions);
//! the heap only provides the traversal and sweep surface.

use crate::cell::Cell;
use crate::pool::Pool;
use crate::series::{Series, SeriesFlags, SeriesId};
use crate::symbol::{SymId, SymbolTable};

/// Ballast granted after each collection, scaled by startup size.
const BALLAST_UNIT: isize = 64 * 1024;

pub struct Heap {
    series: Pool<Series>,
    pub symbols: SymbolTable,
    /// Out-of-line content bytes plus pool segment bytes.
    bytes_allocated: usize,
    bytes_peak: usize,
    ballast: isize,
    ballast_grant: isize,
    /// Series owned manually (stack discipline; unwind frees above a mark).
    manuals: Vec<SeriesId>,
    /// Host-pinned values.
    roots: Vec<Cell>,
}

impl Heap {
    /// `scale` multiplies the GC ballast; 1 is the plain interpreter.
    pub fn new(scale: usize) -> Heap {
        let grant = BALLAST_UNIT * scale.max(1) as isize;
        Heap {
            series: Pool::new(),
            symbols: SymbolTable::new(),
            bytes_allocated: 0,
            bytes_peak: 0,
            ballast: grant,
            ballast_grant: grant,
            manuals: Vec::new(),
            roots: Vec::new(),
        }
    }

    // -- symbols ---------------------------------------------------------

    pub fn intern(&mut self, spelling: &str) -> SymId {
        self.symbols.intern(spelling)
    }

    pub fn spelling(&self, id: SymId) -> &str {
        self.symbols.spelling(id)
    }

    // -- allocation ------------------------------------------------------

    /// Install a series node. It starts on the manuals list; `manage`
    /// hands it to the collector.
    pub fn alloc(&mut self, series: Series) -> SeriesId {
        let content = series.content_bytes();
        let pool_before = self.series.bytes();
        let id = SeriesId(self.series.alloc(series));
        let segment_growth = self.series.bytes() - pool_before;
        self.account_alloc(content + segment_growth);
        self.manuals.push(id);
        id
    }

    pub fn get(&self, id: SeriesId) -> &Series {
        self.series.get(id.0)
    }

    pub fn get_mut(&mut self, id: SeriesId) -> &mut Series {
        self.series.get_mut(id.0)
    }

    pub fn is_live(&self, id: SeriesId) -> bool {
        self.series.is_live(id.0)
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    fn account_alloc(&mut self, bytes: usize) {
        self.bytes_allocated += bytes;
        self.bytes_peak = self.bytes_peak.max(self.bytes_allocated);
        self.ballast -= bytes as isize;
    }

    fn account_free(&mut self, bytes: usize) {
        self.bytes_allocated -= bytes;
    }

    /// Run a content mutation under byte accounting. Expansion debits the
    /// ballast, which is what eventually signals a collection.
    pub fn mutate<R>(&mut self, id: SeriesId, op: impl FnOnce(&mut Series) -> R) -> R {
        let series = self.series.get_mut(id.0);
        let before = series.content_bytes();
        let result = op(series);
        let after = series.content_bytes();
        if after > before {
            self.account_alloc(after - before);
        } else {
            self.account_free(before - after);
        }
        result
    }

    // -- manual lifetime -------------------------------------------------

    /// Watermark for later `free_above`.
    pub fn manuals_mark(&self) -> usize {
        self.manuals.len()
    }

    /// Transfer a manual series to GC control.
    pub fn manage(&mut self, id: SeriesId) {
        let series = self.series.get_mut(id.0);
        if series.flags.contains(SeriesFlags::MANAGED) {
            return;
        }
        series.flags.insert(SeriesFlags::MANAGED);
        // Promotion is almost always of a just-made series, so scan from
        // the tail.
        let pos = self
            .manuals
            .iter()
            .rposition(|&m| m == id)
            .expect("heap: managing a series not on the manuals list");
        self.manuals.remove(pos);
    }

    /// Explicitly free a manual series.
    pub fn free_manual(&mut self, id: SeriesId) {
        let pos = self
            .manuals
            .iter()
            .rposition(|&m| m == id)
            .expect("heap: manual free of a series not on the manuals list");
        self.manuals.remove(pos);
        self.release(id);
    }

    /// Unwind support: free every manual series created after `mark`.
    pub fn free_manuals_above(&mut self, mark: usize) {
        while self.manuals.len() > mark {
            let id = self.manuals.pop().expect("mark below list length");
            self.release(id);
        }
    }

    /// Free a node outright (sweeper and manual paths).
    pub fn release(&mut self, id: SeriesId) {
        let series = self.series.free(id.0);
        self.account_free(series.content_bytes());
    }

    /// The manuals list doubles as a GC root set: an unreferenced manual
    /// is still owned by whoever allocated it.
    pub fn manuals(&self) -> &[SeriesId] {
        &self.manuals
    }

    // -- roots -----------------------------------------------------------

    pub fn push_root(&mut self, cell: Cell) {
        self.roots.push(cell);
    }

    pub fn pop_root(&mut self) -> Option<Cell> {
        self.roots.pop()
    }

    pub fn roots(&self) -> &[Cell] {
        &self.roots
    }

    // -- collector surface ----------------------------------------------

    /// True once the ballast is spent; the evaluator collects at the next
    /// safe point.
    pub fn gc_pending(&self) -> bool {
        self.ballast <= 0
    }

    /// Force the next safe point to collect.
    pub fn request_gc(&mut self) {
        self.ballast = 0;
    }

    pub fn reset_ballast(&mut self) {
        self.ballast = self.ballast_grant;
    }

    /// Sweep every managed, unmarked series; clear marks on survivors.
    /// Returns the number freed.
    pub fn sweep(&mut self) -> usize {
        let mut doomed: Vec<SeriesId> = Vec::new();
        self.series.for_each(|handle, series| {
            if series.flags.contains(SeriesFlags::MARKED) {
                return;
            }
            if series.flags.contains(SeriesFlags::MANAGED) {
                doomed.push(SeriesId(handle));
            }
        });
        for &id in &doomed {
            self.release(id);
        }
        self.series.for_each_mut(|_, series| {
            series.flags.remove(SeriesFlags::MARKED);
        });
        self.reset_ballast();
        doomed.len()
    }

    pub fn for_each_series(&self, mut visit: impl FnMut(SeriesId, &Series)) {
        self.series.for_each(|handle, series| visit(SeriesId(handle), series));
    }

    // -- stats -----------------------------------------------------------

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn bytes_peak(&self) -> usize {
        self.bytes_peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{Flavor, SeriesFlags};

    fn small_array() -> Series {
        Series::new_array(Flavor::Array, 4, SeriesFlags::POW2)
    }

    #[test]
    fn test_alloc_accounts_bytes() {
        let mut heap = Heap::new(1);
        let before = heap.bytes_allocated();
        let id = heap.alloc(small_array());
        assert!(heap.bytes_allocated() > before);
        heap.free_manual(id);
        // Pool segments stay; content bytes are returned.
        assert!(heap.bytes_allocated() < heap.bytes_peak());
    }

    #[test]
    fn test_expansion_debits_ballast() {
        let mut heap = Heap::new(1);
        let id = heap.alloc(small_array());
        assert!(!heap.gc_pending());
        for i in 0..50_000 {
            heap.mutate(id, |s| s.arr_push(Cell::integer(i)));
            if heap.gc_pending() {
                break;
            }
        }
        assert!(heap.gc_pending());
        heap.reset_ballast();
        assert!(!heap.gc_pending());
    }

    #[test]
    fn test_manuals_unwind() {
        let mut heap = Heap::new(1);
        let keep = heap.alloc(small_array());
        let mark = heap.manuals_mark();
        let dropped1 = heap.alloc(small_array());
        let dropped2 = heap.alloc(small_array());
        heap.free_manuals_above(mark);
        assert!(heap.is_live(keep));
        assert!(!heap.is_live(dropped1));
        assert!(!heap.is_live(dropped2));
    }

    #[test]
    fn test_manage_removes_from_manuals() {
        let mut heap = Heap::new(1);
        let mark = heap.manuals_mark();
        let id = heap.alloc(small_array());
        heap.manage(id);
        // Managed series survive an unwind above the mark.
        heap.free_manuals_above(mark);
        assert!(heap.is_live(id));
    }

    #[test]
    fn test_sweep_frees_unmarked_managed() {
        let mut heap = Heap::new(1);
        let managed = heap.alloc(small_array());
        heap.manage(managed);
        let manual = heap.alloc(small_array());
        let marked = heap.alloc(small_array());
        heap.manage(marked);
        heap.get_mut(marked).flags.insert(SeriesFlags::MARKED);

        let freed = heap.sweep();
        assert_eq!(freed, 1);
        assert!(!heap.is_live(managed));
        assert!(heap.is_live(manual));
        assert!(heap.is_live(marked));
        // Survivor marks are cleared for the next cycle.
        assert!(!heap.get(marked).flags.contains(SeriesFlags::MARKED));
    }
}
