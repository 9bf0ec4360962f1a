//! Record store: a thin abstraction over a file of fixed-width signed
//! 32-bit integer cells.
//!
//! The store owns no domain logic — it just lets the B-tree engine address
//! the backing file by cell index instead of by byte offset. `FileStore` is
//! the on-disk implementation used by [`crate::btree::Tree::open`];
//! `MemStore` is a plain in-memory stand-in used by tests and by
//! [`crate::btree::Tree::in_memory`], so the engine can be exercised without
//! touching a filesystem at all.

use crate::errors::{err, Error};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, trace};

/// A cell is one signed 32-bit integer. All offsets and counts below are in
/// cells, not bytes.
pub trait RecordStore {
    fn read(&mut self, offset: i64) -> Result<i32, Error>;
    fn read_many(&mut self, offset: i64, count: usize) -> Result<Vec<i32>, Error>;
    fn write(&mut self, offset: i64, value: i32) -> Result<(), Error>;
    fn append(&mut self, values: &[i32]) -> Result<(), Error>;
    fn truncate(&mut self, count: usize) -> Result<(), Error>;
    fn length(&self) -> i64;
}

/// File-backed record store. Each cell occupies 4 little-endian bytes.
pub struct FileStore {
    file: File,
    len: i64,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let byte_len = file.metadata()?.len();
        let len = (byte_len / 4) as i64;
        debug!(cells = len, "opened record store");
        Ok(FileStore { file, len })
    }
}

impl RecordStore for FileStore {
    fn read(&mut self, offset: i64) -> Result<i32, Error> {
        if offset < 0 || offset >= self.len {
            return Err(err!(
                OutOfRange,
                "read at cell {} exceeds length {}",
                offset,
                self.len
            ));
        }
        self.file.seek(SeekFrom::Start((offset * 4) as u64))?;
        let mut buf = [0u8; 4];
        self.file.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_many(&mut self, offset: i64, count: usize) -> Result<Vec<i32>, Error> {
        if offset < 0 || offset + count as i64 > self.len {
            return Err(err!(
                OutOfRange,
                "read_many at cell {} count {} exceeds length {}",
                offset,
                count,
                self.len
            ));
        }
        self.file.seek(SeekFrom::Start((offset * 4) as u64))?;
        let mut buf = vec![0u8; count * 4];
        self.file.read_exact(&mut buf)?;
        Ok(buf
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes(c.try_into().expect("chunk is 4 bytes")))
            .collect())
    }

    fn write(&mut self, offset: i64, value: i32) -> Result<(), Error> {
        if offset < 0 || offset >= self.len {
            return Err(err!(
                OutOfRange,
                "write at cell {} exceeds length {}",
                offset,
                self.len
            ));
        }
        self.file.seek(SeekFrom::Start((offset * 4) as u64))?;
        self.file.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn append(&mut self, values: &[i32]) -> Result<(), Error> {
        self.file.seek(SeekFrom::End(0))?;
        let mut buf = Vec::with_capacity(values.len() * 4);
        for v in values {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        self.file.write_all(&buf)?;
        self.len += values.len() as i64;
        trace!(appended = values.len(), new_len = self.len, "appended cells");
        Ok(())
    }

    fn truncate(&mut self, count: usize) -> Result<(), Error> {
        if count as i64 > self.len {
            return Err(err!(
                OutOfRange,
                "truncate {} exceeds length {}",
                count,
                self.len
            ));
        }
        self.len -= count as i64;
        self.file.set_len((self.len * 4) as u64)?;
        Ok(())
    }

    fn length(&self) -> i64 {
        self.len
    }
}

/// In-memory record store. Handy for tests and for embedding the engine
/// without a backing file at all; the cell semantics are identical to
/// `FileStore`.
#[derive(Debug, Default)]
pub struct MemStore {
    cells: Vec<i32>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore { cells: Vec::new() }
    }
}

impl RecordStore for MemStore {
    fn read(&mut self, offset: i64) -> Result<i32, Error> {
        self.cells
            .get(offset as usize)
            .copied()
            .ok_or_else(|| err!(OutOfRange, "read at cell {} exceeds length {}", offset, self.cells.len()))
    }

    fn read_many(&mut self, offset: i64, count: usize) -> Result<Vec<i32>, Error> {
        let start = offset as usize;
        let end = start + count;
        if offset < 0 || end > self.cells.len() {
            return Err(err!(
                OutOfRange,
                "read_many at cell {} count {} exceeds length {}",
                offset,
                count,
                self.cells.len()
            ));
        }
        Ok(self.cells[start..end].to_vec())
    }

    fn write(&mut self, offset: i64, value: i32) -> Result<(), Error> {
        if offset < 0 || offset as usize >= self.cells.len() {
            return Err(err!(
                OutOfRange,
                "write at cell {} exceeds length {}",
                offset,
                self.cells.len()
            ));
        }
        self.cells[offset as usize] = value;
        Ok(())
    }

    fn append(&mut self, values: &[i32]) -> Result<(), Error> {
        self.cells.extend_from_slice(values);
        Ok(())
    }

    fn truncate(&mut self, count: usize) -> Result<(), Error> {
        if count > self.cells.len() {
            return Err(err!(
                OutOfRange,
                "truncate {} exceeds length {}",
                count,
                self.cells.len()
            ));
        }
        let new_len = self.cells.len() - count;
        self.cells.truncate(new_len);
        Ok(())
    }

    fn length(&self) -> i64 {
        self.cells.len() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn mem_store_roundtrip() {
        let mut store = MemStore::new();
        store.append(&[1, 2, 3]).unwrap();
        assert_eq!(store.length(), 3);
        assert_eq!(store.read(1).unwrap(), 2);
        store.write(1, 20).unwrap();
        assert_eq!(store.read_many(0, 3).unwrap(), vec![1, 20, 3]);
        store.truncate(1).unwrap();
        assert_eq!(store.length(), 2);
        assert!(store.read(2).is_err());
    }

    #[test]
    fn mem_store_out_of_range() {
        let mut store = MemStore::new();
        assert!(store.read(0).is_err());
        assert!(store.truncate(1).is_err());
    }

    #[test]
    fn file_store_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let mut store = FileStore::open(file.path()).unwrap();
        store.append(&[10, 20, 30, 40]).unwrap();
        assert_eq!(store.length(), 4);
        assert_eq!(store.read(2).unwrap(), 30);
        store.write(0, 99).unwrap();
        assert_eq!(store.read_many(0, 2).unwrap(), vec![99, 20]);
        store.truncate(2).unwrap();
        assert_eq!(store.length(), 2);

        // Reopen and confirm durability.
        drop(store);
        let mut reopened = FileStore::open(file.path()).unwrap();
        assert_eq!(reopened.length(), 2);
        assert_eq!(reopened.read_many(0, 2).unwrap(), vec![99, 20]);
    }

    #[test]
    fn file_store_negative_offset_is_out_of_range() {
        let file = NamedTempFile::new().unwrap();
        let mut store = FileStore::open(file.path()).unwrap();
        store.append(&[1]).unwrap();
        assert!(store.read(-1).is_err());
    }
}
