//! Large objects.
//!
//! A [`LargeObject`] names one server-side large object by OID and, while
//! open, holds the descriptor the driver handed out for it. Descriptors only
//! live as long as the transaction they were opened in.

use std::fmt;
use std::io::SeekFrom;
use std::ops::BitOr;
use std::path::Path;
use std::sync::Weak;

use bytes::Bytes;
use parking_lot::Mutex;

use super::connection::ConnectionInner;
use super::driver::DriverConnection;
use super::types::Oid;
use crate::error::{Error, Result};

/// Descriptor of an open large object.
pub type LoFd = i32;

/// Access mode, as the server's `INV_READ` / `INV_WRITE` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoMode(i32);

impl LoMode {
    pub const READ: LoMode = LoMode(0x0004_0000);
    pub const WRITE: LoMode = LoMode(0x0002_0000);
    pub const READ_WRITE: LoMode = LoMode(0x0006_0000);

    /// Keep only the read and write bits of `bits`.
    pub fn from_bits(bits: i32) -> Self {
        LoMode(bits & Self::READ_WRITE.0)
    }

    pub fn bits(self) -> i32 {
        self.0
    }

    pub fn contains(self, other: LoMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for LoMode {
    type Output = LoMode;

    fn bitor(self, rhs: LoMode) -> LoMode {
        LoMode(self.0 | rhs.0)
    }
}

/// Handle to a large object of one connection.
///
/// Reading, writing and positioning need the object open; `export` and
/// `unlink` need it closed. After `unlink` the handle is invalid and every
/// operation fails.
pub struct LargeObject {
    conn: Weak<Mutex<ConnectionInner>>,
    /// `None` once unlinked
    oid: Option<Oid>,
    fd: Option<LoFd>,
}

impl LargeObject {
    pub(crate) fn new(conn: Weak<Mutex<ConnectionInner>>, oid: Oid) -> Self {
        Self {
            conn,
            oid: Some(oid),
            fd: None,
        }
    }

    pub fn oid(&self) -> Option<Oid> {
        self.oid
    }

    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    fn with_driver<T>(
        &self,
        op: impl FnOnce(&mut dyn DriverConnection) -> Result<T>,
    ) -> Result<T> {
        let conn = self.conn.upgrade().ok_or(Error::Closed("connection"))?;
        let mut inner = conn.lock();
        op(inner.driver()?)
    }

    fn valid_oid(&self) -> Result<Oid> {
        self.oid
            .ok_or_else(|| Error::LargeObject("object is not valid (null oid)".to_string()))
    }

    fn open_fd(&self) -> Result<LoFd> {
        self.valid_oid()?;
        self.fd
            .ok_or_else(|| Error::LargeObject("object is not opened".to_string()))
    }

    fn closed_oid(&self) -> Result<Oid> {
        let oid = self.valid_oid()?;
        match self.fd {
            Some(_) => Err(Error::LargeObject("object is already opened".to_string())),
            None => Ok(oid),
        }
    }

    pub fn open(&mut self, mode: LoMode) -> Result<()> {
        let oid = self.closed_oid()?;
        let mode = LoMode::from_bits(mode.bits());
        let fd = self.with_driver(|driver| driver.lo_open(oid, mode))?;
        tracing::trace!(oid = %oid, fd, "large object opened");
        self.fd = Some(fd);
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        let fd = self.open_fd()?;
        self.with_driver(|driver| driver.lo_close(fd))?;
        self.fd = None;
        Ok(())
    }

    /// Read up to `size` bytes; fewer at the end of the object.
    pub fn read(&mut self, size: usize) -> Result<Bytes> {
        let fd = self.open_fd()?;
        if size == 0 {
            return Err(Error::LargeObject("size must be positive".to_string()));
        }
        self.with_driver(|driver| driver.lo_read(fd, size))
    }

    /// Write all of `data`; a short write is an error.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let fd = self.open_fd()?;
        let written = self.with_driver(|driver| driver.lo_write(fd, data))?;
        if written < data.len() {
            return Err(Error::LargeObject(format!(
                "buffer truncated during write ({} of {} bytes)",
                written,
                data.len()
            )));
        }
        Ok(())
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let fd = self.open_fd()?;
        self.with_driver(|driver| driver.lo_seek(fd, pos))
    }

    pub fn tell(&self) -> Result<u64> {
        let fd = self.open_fd()?;
        self.with_driver(|driver| driver.lo_tell(fd))
    }

    /// Total size in bytes. The position is left where it was.
    pub fn size(&self) -> Result<u64> {
        let fd = self.open_fd()?;
        self.with_driver(|driver| {
            let start = driver.lo_tell(fd)?;
            let end = driver.lo_seek(fd, SeekFrom::End(0))?;
            driver.lo_seek(fd, SeekFrom::Start(start))?;
            Ok(end)
        })
    }

    /// Copy the object's contents into the client-side file at `path`.
    pub fn export(&self, path: impl AsRef<Path>) -> Result<()> {
        let oid = self.closed_oid()?;
        self.with_driver(|driver| driver.lo_export(oid, path.as_ref()))
    }

    /// Destroy the object on the server. The handle is invalid afterwards.
    pub fn unlink(&mut self) -> Result<()> {
        let oid = self.closed_oid()?;
        self.with_driver(|driver| driver.lo_unlink(oid))?;
        tracing::debug!(oid = %oid, "large object unlinked");
        self.oid = None;
        Ok(())
    }
}

impl Drop for LargeObject {
    fn drop(&mut self) {
        let Some(fd) = self.fd.take() else {
            return;
        };
        match self.with_driver(|driver| driver.lo_close(fd)) {
            Ok(()) | Err(Error::Closed(_)) => {}
            Err(err) => tracing::warn!(fd, error = %err, "closing large object on drop failed"),
        }
    }
}

impl fmt::Display for LargeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.oid, self.fd) {
            (None, _) => f.write_str("<Invalid/Unlinked large object>"),
            (Some(oid), Some(_)) => write!(f, "<Opened large object, oid={}>", oid),
            (Some(oid), None) => write!(f, "<Closed large object, oid={}>", oid),
        }
    }
}

impl fmt::Debug for LargeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LargeObject")
            .field("oid", &self.oid)
            .field("fd", &self.fd)
            .finish()
    }
}
