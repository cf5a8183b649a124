/// A point-in-time view of an instance's usage counters.
///
/// Each field is read with an independent atomic load: the snapshot is exact
/// per field, not transactional across them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stat {
    /// Pages currently live as allocation targets.
    pub phys_pages: usize,
    /// Pages in the reserved virtual range; fixed at construction.
    pub virt_pages: usize,
    /// Outstanding allocations.
    pub allocated: usize,
}

impl Stat {
    pub fn assert_clean(&self) {
        assert_eq!(
            self.allocated, 0,
            "{} allocation(s) is(are) probably leaked",
            self.allocated
        );
    }
}
