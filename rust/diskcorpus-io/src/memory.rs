//! In-memory artifacts.

use std::{
    ops::Range,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;

use crate::{ReadAt, SealingWrite, clip_range};

impl ReadAt for Bytes {
    fn size(&self) -> std::io::Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_at(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        let range = clip_range(range, self.len() as u64)?;
        Ok(self.slice(range.start as usize..range.end as usize))
    }
}

impl SealingWrite for Vec<u8> {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.extend_from_slice(buf);
        Ok(())
    }

    fn seal(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Growable in-memory artifact whose content remains accessible through any
/// clone after the writer has been handed off and sealed.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    sealed: Arc<AtomicBool>,
}

impl SharedBuffer {
    pub fn new() -> SharedBuffer {
        Default::default()
    }

    /// Snapshot of everything written so far.
    pub fn contents(&self) -> Bytes {
        Bytes::from(self.data.lock().expect("lock").clone())
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }
}

impl SealingWrite for SharedBuffer {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        if self.is_sealed() {
            return Err(std::io::Error::other("write to a sealed buffer"));
        }
        self.data.lock().expect("lock").extend_from_slice(buf);
        Ok(())
    }

    fn seal(&mut self) -> std::io::Result<()> {
        self.sealed.store(true, Ordering::Release);
        Ok(())
    }
}
