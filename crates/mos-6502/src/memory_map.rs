//! Page-granularity address decoding for co-processor boards.
//!
//! The 64K address space is split into 256 pages, each with one read and
//! one write record. A record points either into the map's own memory
//! arena or at a board handler, so the CPU loop never has to branch on the
//! board's decoding logic.

/// Where accesses to one 256-byte page go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Page {
    /// Direct access into the memory arena; the value is the arena offset
    /// of the page's first byte.
    Memory(u32),
    /// Forwarded to the board with this handler id.
    Handler(u8),
    /// Reads return $FF, writes are dropped.
    #[default]
    Unmapped,
}

/// Read and write page tables plus the memory they point into.
#[derive(Debug, Clone)]
pub struct MemoryMap {
    read: [Page; 256],
    write: [Page; 256],
    memory: Vec<u8>,
}

impl MemoryMap {
    /// An unmapped address space with an arena of `memory_size` bytes.
    #[must_use]
    pub fn new(memory_size: usize) -> Self {
        Self {
            read: [Page::Unmapped; 256],
            write: [Page::Unmapped; 256],
            memory: vec![0; memory_size],
        }
    }

    #[must_use]
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    #[must_use]
    pub fn read_page(&self, page: u8) -> Page {
        self.read[usize::from(page)]
    }

    #[must_use]
    pub fn write_page(&self, page: u8) -> Page {
        self.write[usize::from(page)]
    }

    /// Unmap every page.
    pub fn clear(&mut self) {
        self.read = [Page::Unmapped; 256];
        self.write = [Page::Unmapped; 256];
    }

    /// Map `count` read pages starting at `page` onto consecutive 256-byte
    /// runs of the arena starting at `offset`.
    pub fn set_read_memory(&mut self, page: u8, count: usize, offset: u32) {
        Self::fill_memory(&mut self.read, page, count, offset);
    }

    pub fn set_write_memory(&mut self, page: u8, count: usize, offset: u32) {
        Self::fill_memory(&mut self.write, page, count, offset);
    }

    /// Map pages as RAM: both reads and writes go to the arena.
    pub fn set_memory(&mut self, page: u8, count: usize, offset: u32) {
        self.set_read_memory(page, count, offset);
        self.set_write_memory(page, count, offset);
    }

    /// Route reads and writes of `count` pages to board handler `id`.
    pub fn set_handlers(&mut self, page: u8, count: usize, id: u8) {
        for p in Self::pages(page, count) {
            self.read[p] = Page::Handler(id);
            self.write[p] = Page::Handler(id);
        }
    }

    /// Copy page records forward from `src` to `dst`, one page at a time.
    ///
    /// Overlapping ranges repeat the source pattern, so mirroring a
    /// two-page footprint across fourteen pages is a single call.
    pub fn mirror(&mut self, dst: u8, count: usize, src: u8) {
        let src = usize::from(src);
        for (i, p) in Self::pages(dst, count).enumerate() {
            let s = (src + i) & 0xFF;
            self.read[p] = self.read[s];
            self.write[p] = self.write[s];
        }
    }

    fn fill_memory(table: &mut [Page; 256], page: u8, count: usize, offset: u32) {
        for (i, p) in Self::pages(page, count).enumerate() {
            table[p] = Page::Memory(offset + (i as u32) * 256);
        }
    }

    fn pages(page: u8, count: usize) -> impl Iterator<Item = usize> {
        let start = usize::from(page);
        start..(start + count).min(256)
    }

    /// Arena byte for `address` through a memory record.
    pub(crate) fn arena_read(&self, base: u32, address: u16) -> u8 {
        let index = base as usize + usize::from(address & 0xFF);
        self.memory.get(index).copied().unwrap_or(0xFF)
    }

    pub(crate) fn arena_write(&mut self, base: u32, address: u16, value: u8) {
        let index = base as usize + usize::from(address & 0xFF);
        if let Some(byte) = self.memory.get_mut(index) {
            *byte = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_map_is_unmapped() {
        let map = MemoryMap::new(0);
        assert_eq!(map.read_page(0x00), Page::Unmapped);
        assert_eq!(map.write_page(0xFF), Page::Unmapped);
    }

    #[test]
    fn read_only_memory_leaves_writes_unmapped() {
        let mut map = MemoryMap::new(0x1000);
        map.set_read_memory(0x10, 0x10, 0);
        assert_eq!(map.read_page(0x10), Page::Memory(0));
        assert_eq!(map.read_page(0x1F), Page::Memory(0x0F00));
        assert_eq!(map.write_page(0x10), Page::Unmapped);
    }

    #[test]
    fn mirror_repeats_overlapping_pattern() {
        let mut map = MemoryMap::new(0);
        map.set_handlers(0x00, 1, 2);
        map.set_handlers(0x01, 1, 1);
        map.mirror(0x02, 0x0E, 0x00);
        for page in 0x00..0x10u8 {
            let expected = if page & 1 == 0 { 2 } else { 1 };
            assert_eq!(map.read_page(page), Page::Handler(expected), "page {page:02X}");
        }
    }

    #[test]
    fn ranges_clip_at_top_of_address_space() {
        let mut map = MemoryMap::new(0x200);
        map.set_memory(0xFF, 4, 0x100);
        assert_eq!(map.read_page(0xFF), Page::Memory(0x100));
        assert_eq!(map.read_page(0x00), Page::Unmapped);
    }

    #[test]
    fn arena_access_out_of_range_is_open_bus() {
        let mut map = MemoryMap::new(0x10);
        map.arena_write(0x100, 0x0005, 0x42);
        assert_eq!(map.arena_read(0x100, 0x0005), 0xFF);
        map.arena_write(0, 0x0005, 0x42);
        assert_eq!(map.arena_read(0, 0x0005), 0x42);
    }
}
