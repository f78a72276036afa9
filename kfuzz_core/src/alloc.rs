//! Address allocation for pointer and vma values, no memory is actually allocated.

use crate::{HashSet, RngType};
use rand::{prelude::SliceRandom, Rng};

pub type MemAddress = u64;
pub type MemSize = u64;

pub const ALLOC_GRANULE: u64 = 64; // in bytes
pub const DEFAULT_MEM_SIZE: u64 = 16 << 20;

/// First-fit allocator over the data area, one bit per granule.
///
/// When the area is exhausted, everything is freed and allocation starts over.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Allocator {
    size: MemSize,
    granules: u64,
    bitmap: Vec<u64>,
}

impl Default for Allocator {
    fn default() -> Self {
        Allocator::new(DEFAULT_MEM_SIZE)
    }
}

impl Allocator {
    pub fn new(sz: MemSize) -> Self {
        let granules = (sz + ALLOC_GRANULE - 1) / ALLOC_GRANULE;
        Self {
            size: granules * ALLOC_GRANULE,
            granules,
            bitmap: vec![0; ((granules + 63) / 64) as usize],
        }
    }

    #[inline(always)]
    pub fn size(&self) -> MemSize {
        self.size
    }

    pub fn restore(&mut self) {
        self.bitmap.iter_mut().for_each(|b| *b = 0);
    }

    /// Allocate `sz` bytes aligned to `align`, returns the offset in the data area.
    pub fn alloc(&mut self, sz: MemSize, align: u64) -> MemAddress {
        let need = std::cmp::max((sz + ALLOC_GRANULE - 1) / ALLOC_GRANULE, 1);
        assert!(need <= self.granules, "allocation of {} bytes is too large", sz);
        let step = std::cmp::max(align, ALLOC_GRANULE) / ALLOC_GRANULE;

        if let Some(start) = self.find_free(need, step) {
            self.mark(start, need);
            return start * ALLOC_GRANULE;
        }
        // restart
        self.restore();
        self.mark(0, need);
        0
    }

    fn find_free(&self, need: u64, step: u64) -> Option<u64> {
        let mut start = 0;
        while start + need <= self.granules {
            match (start..start + need).find(|&g| self.is_used(g)) {
                Some(used) => {
                    start = (used + 1 + step - 1) / step * step;
                }
                None => return Some(start),
            }
        }
        None
    }

    /// Mark `[addr, addr + sz)` as used, returns false if it's out of the data area.
    pub fn note_alloc(&mut self, addr: MemAddress, sz: MemSize) -> bool {
        if addr + sz > self.size {
            return false;
        }
        let start = addr / ALLOC_GRANULE;
        let end = (addr + sz + ALLOC_GRANULE - 1) / ALLOC_GRANULE;
        self.mark(start, std::cmp::max(end - start, 1));
        true
    }

    #[inline]
    fn is_used(&self, g: u64) -> bool {
        self.bitmap[(g / 64) as usize] & (1 << (g % 64)) != 0
    }

    fn mark(&mut self, start: u64, n: u64) {
        for g in start..std::cmp::min(start + n, self.granules) {
            self.bitmap[(g / 64) as usize] |= 1 << (g % 64);
        }
    }
}

/// Allocator of whole pages, prefers the ends of the area and pages used before.
#[derive(Debug, Clone)]
pub struct VmaAllocator {
    page_num: u64,
    used: Vec<u64>,
    used_set: HashSet<u64>,
}

impl VmaAllocator {
    pub fn new(page_num: u64) -> Self {
        Self {
            page_num,
            used: Vec::new(),
            used_set: HashSet::default(),
        }
    }

    /// Allocate `num` consecutive pages, returns the index of the first one.
    pub fn alloc(&mut self, rng: &mut RngType, num: u64) -> u64 {
        assert!(num <= self.page_num, "too many pages: {}", num);
        let page = if self.used.is_empty() || rng.gen_ratio(1, 5) {
            let page = rng.gen_range(0..4);
            if !rng.gen_ratio(1, 100) {
                self.page_num.saturating_sub(page + num)
            } else {
                page
            }
        } else if rng.gen_ratio(1, 5) {
            rng.gen_range(0..=self.page_num - num)
        } else {
            let mut page = *self.used.choose(rng).unwrap_or(&0);
            if num > 1 && rng.gen() {
                let off = std::cmp::min(rng.gen_range(0..num), page);
                page -= off;
            }
            std::cmp::min(page, self.page_num - num)
        };
        self.note_alloc(page, num);
        page
    }

    pub fn note_alloc(&mut self, page_idx: u64, num: u64) {
        for page in page_idx..page_idx + num {
            if self.used_set.insert(page) {
                self.used.push(page);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn allocator_alloc() {
        let mut allocator = Allocator::new(1024);
        let addr = allocator.alloc(127, 1);
        assert_eq!(addr, 0);
        let addr = allocator.alloc(32, 256);
        assert_eq!(addr, 256);
        let addr = allocator.alloc(64, 1);
        assert_eq!(addr, 128);
        // no room left for 768 bytes, start over
        let addr = allocator.alloc(768, 1);
        assert_eq!(addr, 0);
    }

    #[test]
    fn allocator_note_alloc() {
        let mut allocator = Allocator::new(1024);
        assert!(!allocator.note_alloc(1024, 128));
        assert!(allocator.note_alloc(0, 512));
        assert_eq!(allocator.alloc(64, 1), 512);
        assert!(allocator.note_alloc(896, 128));
        assert_eq!(allocator.alloc(128, 1), 576);
    }

    #[test]
    fn vma_alloc_in_range() {
        let mut rng = RngType::seed_from_u64(1);
        let mut va = VmaAllocator::new(64);
        for _ in 0..1024 {
            let num = rng.gen_range(1..=8);
            let page = va.alloc(&mut rng, num);
            assert!(page + num <= 64);
        }
    }
}
