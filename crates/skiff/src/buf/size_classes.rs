// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Size class table mapping request sizes to discrete allocation classes.
//!
//! Classes follow groups of four within each power-of-two band: for band
//! exponent `g` and delta index `d in 1..=4`, `size = (1<<g) + d*(1<<(g-2))`.
//! The first group (`g = LOG2_QUANTUM`) is special with `d in 0..=3`.
//!
//! Three lookup tables are emitted at construction:
//! - `size_idx -> size` for every class,
//! - `page_idx -> size` for classes that are multiples of the page size,
//! - `size -> size_idx` direct table for sizes up to [`LOOKUP_MAX_SIZE`],
//!   stepped by the 16 B quantum.
//!
//! Larger requests are resolved arithmetically with a leading-zero count.

/// log2 of the allocation quantum (16 B).
pub const LOG2_QUANTUM: u32 = 4;

/// log2 of the group width (4 classes per power-of-two band).
pub const LOG2_SIZE_CLASS_GROUP: u32 = 2;

/// Requests at or below this size resolve through the direct lookup table.
pub const LOOKUP_MAX_SIZE: usize = 4096;

const QUANTUM: usize = 1 << LOG2_QUANTUM;
const GROUP: usize = 1 << LOG2_SIZE_CLASS_GROUP;

/// One emitted size class.
#[derive(Debug, Clone, Copy)]
struct SizeClass {
    size: usize,
    log2_delta: u32,
    multi_page: bool,
    subpage: bool,
}

/// Immutable size class table, built once per allocator from
/// `(page_size, chunk_size)`.
pub struct SizeClasses {
    page_size: usize,
    page_shifts: u32,
    chunk_size: usize,

    classes: Vec<SizeClass>,
    /// size_idx -> normalized size.
    size_idx_to_size: Vec<usize>,
    /// page_idx -> run size (multiples of page_size).
    page_idx_to_size: Vec<usize>,
    /// (size-1) >> LOG2_QUANTUM -> size_idx, for size <= LOOKUP_MAX_SIZE.
    size_to_idx_tab: Vec<usize>,

    n_subpages: usize,
    small_max_size: usize,
}

impl SizeClasses {
    /// Build the table. `page_size` must be a power of two and `chunk_size`
    /// a `page_size << order` multiple; both are validated by the arena.
    pub fn new(page_size: usize, chunk_size: usize) -> Self {
        debug_assert!(page_size.is_power_of_two());
        debug_assert!(chunk_size % page_size == 0);

        let page_shifts = page_size.trailing_zeros();
        let mut classes: Vec<SizeClass> = Vec::new();

        let mut log2_group = LOG2_QUANTUM;
        let mut log2_delta = LOG2_QUANTUM;

        // First group: nDelta 0..=3 (sizes 16, 32, 48, 64 for quantum 16).
        for n_delta in 0..GROUP {
            classes.push(Self::make_class(
                log2_group, log2_delta, n_delta, page_size,
            ));
        }
        log2_group += LOG2_SIZE_CLASS_GROUP;

        // Remaining groups: nDelta 1..=4, doubling the band each round.
        'outer: loop {
            for n_delta in 1..=GROUP {
                let class = Self::make_class(log2_group, log2_delta, n_delta, page_size);
                if class.size > chunk_size {
                    break 'outer;
                }
                classes.push(class);
                if class.size == chunk_size {
                    break 'outer;
                }
            }
            log2_group += 1;
            log2_delta += 1;
        }

        let size_idx_to_size: Vec<usize> = classes.iter().map(|c| c.size).collect();
        let page_idx_to_size: Vec<usize> = classes
            .iter()
            .filter(|c| c.multi_page)
            .map(|c| c.size)
            .collect();

        let n_subpages = classes.iter().filter(|c| c.subpage).count();
        let small_max_size = classes
            .iter()
            .filter(|c| c.subpage)
            .map(|c| c.size)
            .max()
            .unwrap_or(0);

        // Direct table: one entry per 16 B step up to LOOKUP_MAX_SIZE. Each
        // class with delta >= quantum covers (delta / quantum) steps.
        let mut size_to_idx_tab = Vec::with_capacity(LOOKUP_MAX_SIZE >> LOG2_QUANTUM);
        for (idx, class) in classes.iter().enumerate() {
            if class.size > LOOKUP_MAX_SIZE {
                break;
            }
            let times = 1usize << (class.log2_delta - LOG2_QUANTUM);
            for _ in 0..times {
                size_to_idx_tab.push(idx);
            }
        }
        debug_assert_eq!(size_to_idx_tab.len(), LOOKUP_MAX_SIZE >> LOG2_QUANTUM);

        Self {
            page_size,
            page_shifts,
            chunk_size,
            classes,
            size_idx_to_size,
            page_idx_to_size,
            size_to_idx_tab,
            n_subpages,
            small_max_size,
        }
    }

    fn make_class(log2_group: u32, log2_delta: u32, n_delta: usize, page_size: usize) -> SizeClass {
        let size = (1usize << log2_group) + (n_delta << log2_delta);
        SizeClass {
            size,
            log2_delta,
            multi_page: size % page_size == 0,
            subpage: size < (page_size << LOG2_SIZE_CLASS_GROUP),
        }
    }

    /// Number of size classes.
    #[inline]
    pub fn n_sizes(&self) -> usize {
        self.classes.len()
    }

    /// Number of run (page-multiple) classes.
    #[inline]
    pub fn n_psizes(&self) -> usize {
        self.page_idx_to_size.len()
    }

    /// Number of subpage classes.
    #[inline]
    pub fn n_subpages(&self) -> usize {
        self.n_subpages
    }

    /// Largest size served from subpages.
    #[inline]
    pub fn small_max_size(&self) -> usize {
        self.small_max_size
    }

    /// Configured page size.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// log2 of the page size.
    #[inline]
    pub fn page_shifts(&self) -> u32 {
        self.page_shifts
    }

    /// Configured chunk size.
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// True if `size_idx` is served from a subpage.
    #[inline]
    pub fn is_subpage(&self, size_idx: usize) -> bool {
        self.classes[size_idx].subpage
    }

    /// Normalized size for a class index.
    #[inline]
    pub fn idx_to_size(&self, size_idx: usize) -> usize {
        self.size_idx_to_size[size_idx]
    }

    /// Run size for a page-class index.
    #[inline]
    pub fn page_idx_to_size(&self, page_idx: usize) -> usize {
        self.page_idx_to_size[page_idx]
    }

    /// Map a request size to its class index.
    ///
    /// Returns `n_sizes()` for requests larger than the chunk size (the
    /// arena routes those to a one-shot huge allocation).
    pub fn size_to_idx(&self, size: usize) -> usize {
        if size == 0 {
            return 0;
        }
        if size > self.chunk_size {
            return self.n_sizes();
        }
        if size <= LOOKUP_MAX_SIZE {
            return self.size_to_idx_tab[(size - 1) >> LOG2_QUANTUM];
        }

        // x = ceil(log2(size)) + 1 band selector via lzcnt.
        let x = usize::BITS - ((size << 1) - 1).leading_zeros() - 1;
        let shift = if x < LOG2_SIZE_CLASS_GROUP + LOG2_QUANTUM + 1 {
            0
        } else {
            x - (LOG2_SIZE_CLASS_GROUP + LOG2_QUANTUM)
        };
        let group = (shift as usize) << LOG2_SIZE_CLASS_GROUP;
        let log2_delta = if x < LOG2_SIZE_CLASS_GROUP + LOG2_QUANTUM + 1 {
            LOG2_QUANTUM
        } else {
            x - LOG2_SIZE_CLASS_GROUP - 1
        };
        let modulo = ((size - 1) >> log2_delta) & (GROUP - 1);
        group + modulo
    }

    /// Round a request up to its class size. Requests beyond the chunk size
    /// round to the next page multiple (huge allocations are page-granular).
    pub fn normalize(&self, size: usize) -> usize {
        let idx = self.size_to_idx(size);
        if idx < self.n_sizes() {
            self.size_idx_to_size[idx]
        } else {
            (size + self.page_size - 1) & !(self.page_size - 1)
        }
    }

    /// Map a page count to the first page-class index whose run is >= the
    /// request. Returns `n_psizes()` when the request exceeds the chunk.
    pub fn pages_to_page_idx(&self, pages: usize) -> usize {
        self.pages_to_page_idx_inner(pages, false)
    }

    /// Like [`Self::pages_to_page_idx`] but rounds *down* to the nearest run
    /// class; used when classifying the remainder of a split run.
    pub fn pages_to_page_idx_floor(&self, pages: usize) -> usize {
        self.pages_to_page_idx_inner(pages, true)
    }

    fn pages_to_page_idx_inner(&self, pages: usize, floor: bool) -> usize {
        let run_size = pages << self.page_shifts;
        if run_size > self.chunk_size {
            return self.n_psizes();
        }

        let x = usize::BITS - ((run_size << 1) - 1).leading_zeros() - 1;
        let shift = if x < LOG2_SIZE_CLASS_GROUP + self.page_shifts {
            0
        } else {
            x - (LOG2_SIZE_CLASS_GROUP + self.page_shifts)
        };
        let group = (shift as usize) << LOG2_SIZE_CLASS_GROUP;
        let log2_delta = if x < LOG2_SIZE_CLASS_GROUP + self.page_shifts + 1 {
            self.page_shifts
        } else {
            x - LOG2_SIZE_CLASS_GROUP - 1
        };
        let modulo = ((run_size - 1) >> log2_delta) & (GROUP - 1);
        let mut page_idx = group + modulo;

        if floor && self.page_idx_to_size[page_idx] > run_size {
            page_idx -= 1;
        }
        page_idx
    }
}
