//! Read-only volume reader.
//!
//! On-disk layout, in 4 KiB blocks:
//!
//! * block 0: `{num_dentries, num_inodes, num_data_blocks, 52 reserved}`
//!   followed by up to 63 64-byte dentries starting at offset 64;
//! * blocks 1 ..= num_inodes: inode blocks `{length, data_block_indices}`;
//! * the data blocks follow the inode region.
//!
//! Dentry names are 32 bytes and *not* NUL-terminated when exactly that
//! long, so every comparison and copy is bounded at 32.

use crate::error::{KernelError, KernelResult};

/// The file system is divided into 4 KiB blocks.
pub const BLOCK_SIZE: usize = 4096;
/// File names are at most 32 bytes, unterminated at full length.
pub const MAX_NAME_LEN: usize = 32;
/// Directory entries pack to 64 bytes.
pub const DENTRY_SIZE: usize = 64;
/// Block 0 holds at most 63 dentries after its 64-byte header.
pub const MAX_DENTRIES: u32 = 63;
/// An inode block indexes at most 1023 data blocks.
pub const MAX_BLOCKS_PER_INODE: usize = 1023;

/// Dentry type discriminants as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Rtc,
    Directory,
    Regular,
}

impl TryFrom<u32> for FileType {
    type Error = KernelError;

    fn try_from(raw: u32) -> KernelResult<Self> {
        match raw {
            0 => Ok(Self::Rtc),
            1 => Ok(Self::Directory),
            2 => Ok(Self::Regular),
            _ => Err(KernelError::Io),
        }
    }
}

/// One directory entry, copied out of the image.
#[derive(Debug, Clone, Copy)]
pub struct Dentry {
    pub name: [u8; MAX_NAME_LEN],
    pub ftype: FileType,
    pub inode: u32,
}

impl Dentry {
    /// Name bytes up to the first NUL, bounded at 32.
    pub fn name_bytes(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_NAME_LEN);
        &self.name[..end]
    }
}

/// A read-only view over a file system image.
pub struct Volume<'a> {
    image: &'a [u8],
}

impl<'a> Volume<'a> {
    /// Wrap an image; it must at least contain the boot block.
    pub fn new(image: &'a [u8]) -> KernelResult<Self> {
        if image.len() < BLOCK_SIZE {
            return Err(KernelError::Io);
        }
        Ok(Self { image })
    }

    fn word(&self, offset: usize) -> u32 {
        let bytes = match self.image.get(offset..offset + 4) {
            Some(b) => b,
            None => return 0,
        };
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Number of directory entries recorded in the boot block.
    pub fn dentry_count(&self) -> u32 {
        self.word(0).min(MAX_DENTRIES)
    }

    /// Number of inode blocks.
    pub fn inode_count(&self) -> u32 {
        self.word(4)
    }

    /// Number of data blocks.
    pub fn data_block_count(&self) -> u32 {
        self.word(8)
    }

    fn dentry_at(&self, index: u32) -> KernelResult<Dentry> {
        let base = DENTRY_SIZE + index as usize * DENTRY_SIZE;
        let raw = self
            .image
            .get(base..base + DENTRY_SIZE)
            .ok_or(KernelError::NotFound)?;
        let mut name = [0u8; MAX_NAME_LEN];
        name.copy_from_slice(&raw[..MAX_NAME_LEN]);
        let ftype = FileType::try_from(self.word(base + MAX_NAME_LEN))
            .map_err(|_| KernelError::NotFound)?;
        let inode = self.word(base + MAX_NAME_LEN + 4);
        Ok(Dentry { name, ftype, inode })
    }

    /// Resolve a name to its dentry. Names longer than 32 bytes cannot
    /// exist and are rejected outright; comparison is bounded at 32.
    pub fn read_dentry_by_name(&self, name: &[u8]) -> KernelResult<Dentry> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(KernelError::NotFound);
        }
        for index in 0..self.dentry_count() {
            let dentry = self.dentry_at(index)?;
            let stored = &dentry.name;
            let matches = stored[..name.len()] == *name
                && (name.len() == MAX_NAME_LEN || stored[name.len()] == 0);
            if matches {
                return Ok(dentry);
            }
        }
        Err(KernelError::NotFound)
    }

    /// The `index`-th dentry, or `NotFound` past the end.
    pub fn read_dentry_by_index(&self, index: u32) -> KernelResult<Dentry> {
        if index >= self.dentry_count() {
            return Err(KernelError::NotFound);
        }
        self.dentry_at(index)
    }

    fn inode_block(&self, inode: u32) -> Option<&[u8]> {
        if inode >= self.inode_count() {
            return None;
        }
        let base = (inode as usize + 1) * BLOCK_SIZE;
        self.image.get(base..base + BLOCK_SIZE)
    }

    fn data_block(&self, index: u32) -> Option<&[u8]> {
        if index >= self.data_block_count() {
            return None;
        }
        let base = (self.inode_count() as usize + 1 + index as usize) * BLOCK_SIZE;
        self.image.get(base..base + BLOCK_SIZE)
    }

    /// Length in bytes of the file behind `inode` (0 for a bad inode).
    pub fn inode_len(&self, inode: u32) -> u32 {
        match self.inode_block(inode) {
            Some(block) => u32::from_le_bytes([block[0], block[1], block[2], block[3]]),
            None => 0,
        }
    }

    /// Read file bytes starting at `offset` into `buf`.
    ///
    /// The read is clamped at end of file; the return value is the byte
    /// count actually copied. Any malformed data-block index makes the
    /// whole call return 0.
    pub fn read_bytes(&self, inode: u32, offset: u32, buf: &mut [u8]) -> usize {
        let block = match self.inode_block(inode) {
            Some(b) => b,
            None => return 0,
        };
        let file_len = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        if offset >= file_len {
            return 0;
        }
        let total = buf.len().min((file_len - offset) as usize);

        let mut copied = 0;
        while copied < total {
            let pos = offset as usize + copied;
            let slot = pos / BLOCK_SIZE;
            let within = pos % BLOCK_SIZE;
            if slot >= MAX_BLOCKS_PER_INODE {
                return 0;
            }
            let index = u32::from_le_bytes([
                block[4 + slot * 4],
                block[5 + slot * 4],
                block[6 + slot * 4],
                block[7 + slot * 4],
            ]);
            let data = match self.data_block(index) {
                Some(d) => d,
                None => return 0,
            };
            let chunk = (total - copied).min(BLOCK_SIZE - within);
            buf[copied..copied + chunk].copy_from_slice(&data[within..within + chunk]);
            copied += chunk;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;
    use std::vec::Vec;

    /// Build a synthetic image: given (name, type, contents) triples, lay
    /// out the boot block, one inode per file, and the data blocks.
    fn build_image(files: &[(&str, u32, &[u8])]) -> Vec<u8> {
        let inode_count = files.len();
        let blocks_per_file: Vec<usize> = files
            .iter()
            .map(|(_, _, data)| data.len().div_ceil(BLOCK_SIZE).max(1))
            .collect();
        let data_block_count: usize = blocks_per_file.iter().sum();
        let total_blocks = 1 + inode_count + data_block_count;
        let mut image = vec![0u8; total_blocks * BLOCK_SIZE];

        image[0..4].copy_from_slice(&(files.len() as u32).to_le_bytes());
        image[4..8].copy_from_slice(&(inode_count as u32).to_le_bytes());
        image[8..12].copy_from_slice(&(data_block_count as u32).to_le_bytes());

        let mut next_data_block = 0u32;
        for (i, (name, ftype, data)) in files.iter().enumerate() {
            let dentry = DENTRY_SIZE + i * DENTRY_SIZE;
            image[dentry..dentry + name.len()].copy_from_slice(name.as_bytes());
            image[dentry + 32..dentry + 36].copy_from_slice(&ftype.to_le_bytes());
            image[dentry + 36..dentry + 40].copy_from_slice(&(i as u32).to_le_bytes());

            let inode = (i + 1) * BLOCK_SIZE;
            image[inode..inode + 4].copy_from_slice(&(data.len() as u32).to_le_bytes());
            for chunk_no in 0..blocks_per_file[i] {
                let slot = inode + 4 + chunk_no * 4;
                image[slot..slot + 4].copy_from_slice(&next_data_block.to_le_bytes());
                let dst = (1 + inode_count + next_data_block as usize) * BLOCK_SIZE;
                let lo = chunk_no * BLOCK_SIZE;
                let hi = (lo + BLOCK_SIZE).min(data.len());
                image[dst..dst + (hi - lo)].copy_from_slice(&data[lo..hi]);
                next_data_block += 1;
            }
        }
        image
    }

    #[test]
    fn resolves_names_and_types() {
        let image = build_image(&[("frame0.txt", 2, b"fish"), (".", 1, b""), ("rtc", 0, b"")]);
        let vol = Volume::new(&image).unwrap();
        assert_eq!(vol.dentry_count(), 3);
        let d = vol.read_dentry_by_name(b"frame0.txt").unwrap();
        assert_eq!(d.ftype, FileType::Regular);
        assert_eq!(d.name_bytes(), b"frame0.txt");
        assert_eq!(vol.read_dentry_by_name(b"rtc").unwrap().ftype, FileType::Rtc);
        assert_eq!(
            vol.read_dentry_by_name(b"nonexistent").unwrap_err(),
            KernelError::NotFound
        );
    }

    #[test]
    fn name_comparison_is_bounded_at_32() {
        let long = "exactly_thirty_two_bytes_long_nm"; // 32 bytes
        assert_eq!(long.len(), 32);
        let image = build_image(&[(long, 2, b"x")]);
        let vol = Volume::new(&image).unwrap();
        assert!(vol.read_dentry_by_name(long.as_bytes()).is_ok());
        // 33 bytes can never match anything.
        assert!(vol
            .read_dentry_by_name(b"exactly_thirty_two_bytes_long_nmX")
            .is_err());
        // A proper prefix of a full-length name is a different name.
        assert!(vol
            .read_dentry_by_name(b"exactly_thirty_two_bytes_long_n")
            .is_err());
    }

    #[test]
    fn dentry_index_bounds() {
        let image = build_image(&[("a", 2, b"a"), ("b", 2, b"b")]);
        let vol = Volume::new(&image).unwrap();
        assert!(vol.read_dentry_by_index(0).is_ok());
        assert!(vol.read_dentry_by_index(1).is_ok());
        assert_eq!(
            vol.read_dentry_by_index(2).unwrap_err(),
            KernelError::NotFound
        );
    }

    #[test]
    fn reads_exact_ranges() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let image = build_image(&[("big", 2, &payload)]);
        let vol = Volume::new(&image).unwrap();
        let inode = vol.read_dentry_by_name(b"big").unwrap().inode;
        assert_eq!(vol.inode_len(inode), 10_000);

        // A read crossing two block boundaries.
        let mut buf = [0u8; 5000];
        assert_eq!(vol.read_bytes(inode, 3000, &mut buf), 5000);
        assert_eq!(&buf[..], &payload[3000..8000]);

        // Clamped at end of file.
        let mut tail = [0u8; 64];
        assert_eq!(vol.read_bytes(inode, 9_990, &mut tail), 10);
        assert_eq!(&tail[..10], &payload[9_990..]);
    }

    #[test]
    fn read_at_end_of_file_returns_zero() {
        let image = build_image(&[("f", 2, b"abc")]);
        let vol = Volume::new(&image).unwrap();
        let inode = vol.read_dentry_by_name(b"f").unwrap().inode;
        let mut buf = [0u8; 8];
        assert_eq!(vol.read_bytes(inode, 3, &mut buf), 0);
        assert_eq!(vol.read_bytes(inode, 100, &mut buf), 0);
    }

    #[test]
    fn malformed_data_block_index_reads_zero() {
        let mut image = build_image(&[("f", 2, b"abcdef")]);
        // Corrupt the inode's first data-block index to point past the end.
        let inode_base = BLOCK_SIZE;
        image[inode_base + 4..inode_base + 8].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        let vol = Volume::new(&image).unwrap();
        let mut buf = [0u8; 6];
        assert_eq!(vol.read_bytes(0, 0, &mut buf), 0);
    }

    #[test]
    fn bad_inode_reads_zero() {
        let image = build_image(&[("f", 2, b"abc")]);
        let vol = Volume::new(&image).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(vol.read_bytes(99, 0, &mut buf), 0);
        assert_eq!(vol.inode_len(99), 0);
    }
}
