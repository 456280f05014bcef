//! # Virtual regions and segments.
//!
//! A [VmArea] is a contiguous segment of a virtual address space. Its free list keeps
//! [VmRegion]s that were carved out of the segment but are not in use, and serves
//! allocations first-fit before the segment has to grow.

use std::collections::VecDeque;
use utils::range::RangeExt;

use crate::paging::SpaceId;

/// A `[start, end)` byte range of virtual addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmRegion {
    pub start: usize,
    pub end: usize,
}

impl VmRegion {
    pub const fn create_region(start: usize, end: usize) -> VmRegion {
        VmRegion { start, end }
    }

    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    #[inline(always)]
    fn range(&self) -> core::ops::Range<usize> {
        self.start..self.end
    }
}

/// A segment of an address space.
#[derive(Debug)]
pub struct VmArea {
    pub id: usize,
    pub start: usize,
    pub end: usize,
    /// Boundary between carved and never-used space.
    pub sbrk: usize,
    /// Owning address space.
    pub owner: SpaceId,
    free_list: VecDeque<VmRegion>,
}

impl VmArea {
    /// An empty segment `[start, start)` owned by `owner`.
    pub fn new(id: usize, start: usize, owner: SpaceId) -> VmArea {
        VmArea {
            id,
            start,
            end: start,
            sbrk: start,
            owner,
            free_list: VecDeque::new(),
        }
    }

    pub fn range(&self) -> core::ops::Range<usize> {
        self.start..self.end
    }

    /// Prepend `region` to the free list as is.
    pub fn push_region(&mut self, region: VmRegion) {
        self.free_list.push_front(region);
    }

    /// First free region of at least `size` bytes.
    ///
    /// The request is carved from the front of the region; what remains stays in place on
    /// the list. Empty regions never satisfy a request.
    pub fn get_free_region(&mut self, size: usize) -> Option<VmRegion> {
        if size == 0 {
            return None;
        }
        let index = self
            .free_list
            .iter()
            .position(|region| !region.is_empty() && region.len() >= size)?;
        let region = self.free_list[index];
        let found = VmRegion::create_region(region.start, region.start + size);
        match region.range().sub(&found.range()) {
            [Some(rest), _] => {
                self.free_list[index] = VmRegion::create_region(rest.start, rest.end);
            }
            _ => {
                self.free_list.remove(index);
            }
        }
        Some(found)
    }

    /// Give `region` back to the free list, merging every free region it touches.
    pub fn release_region(&mut self, region: VmRegion) {
        if region.is_empty() {
            return;
        }
        let mut merged = region.range();
        self.free_list.retain(|free| {
            if free.is_empty() {
                return true;
            }
            match merged.merge(&free.range()) {
                Some(union) => {
                    merged = union;
                    false
                }
                None => true,
            }
        });
        self.push_region(VmRegion::create_region(merged.start, merged.end));
    }

    /// Free regions, head of the list first.
    pub fn free_regions(&self) -> impl Iterator<Item = &VmRegion> {
        self.free_list.iter()
    }

    /// Whether `region` lies inside this segment.
    pub fn contains(&self, region: &VmRegion) -> bool {
        self.start <= region.start && region.end <= self.end
    }

    /// Whether `range` overlaps this segment.
    pub fn overlaps(&self, range: &core::ops::Range<usize>) -> bool {
        self.range().overlap(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions(area: &VmArea) -> Vec<(usize, usize)> {
        area.free_regions().map(|r| (r.start, r.end)).collect()
    }

    #[test]
    fn test_push_region_prepends() {
        let mut area = VmArea::new(1, 0, 1);
        area.push_region(VmRegion::create_region(0, 0));
        area.push_region(VmRegion::create_region(10, 20));
        assert_eq!(regions(&area), vec![(10, 20), (0, 0)]);
    }

    #[test]
    fn test_first_fit_splits() {
        let mut area = VmArea::new(1, 0, 1);
        area.push_region(VmRegion::create_region(0, 0));
        area.push_region(VmRegion::create_region(100, 164));
        area.push_region(VmRegion::create_region(10, 20));

        assert_eq!(
            area.get_free_region(16),
            Some(VmRegion::create_region(100, 116))
        );
        assert_eq!(regions(&area), vec![(10, 20), (116, 164), (0, 0)]);
        assert_eq!(
            area.get_free_region(10),
            Some(VmRegion::create_region(10, 20))
        );
        assert_eq!(regions(&area), vec![(116, 164), (0, 0)]);
        assert_eq!(area.get_free_region(100), None);
        assert_eq!(area.get_free_region(0), None);
    }

    #[test]
    fn test_release_merges_neighbours() {
        let mut area = VmArea::new(1, 0, 1);
        area.push_region(VmRegion::create_region(0, 8));
        area.push_region(VmRegion::create_region(16, 24));
        area.push_region(VmRegion::create_region(40, 48));

        area.release_region(VmRegion::create_region(8, 16));
        let mut got = regions(&area);
        got.sort();
        assert_eq!(got, vec![(0, 24), (40, 48)]);
        assert_eq!(regions(&area)[0], (0, 24));
    }

    #[test]
    fn test_release_empty_is_ignored() {
        let mut area = VmArea::new(1, 0, 1);
        area.release_region(VmRegion::create_region(5, 5));
        assert!(regions(&area).is_empty());
    }
}
