//! Bounds-checked little-endian access to guest linear memory.
//!
//! A `MemoryView` wraps a borrowed memory buffer. Because it borrows the
//! store, it cannot outlive a guest re-entry: hooks build a fresh view after
//! every call back into the guest.

use std::collections::BTreeMap;

use crate::error::BridgeError;

/// Out-of-bounds guest memory access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("access of {len} bytes at {offset:#x} exceeds memory size {size:#x}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
}

/// Converts a guest-supplied 64-bit address or length to `usize`.
///
/// Negative values map to `usize::MAX` so the following bounds check fails.
pub fn to_addr(raw: i64) -> usize {
    usize::try_from(raw).unwrap_or(usize::MAX)
}

/// A view over guest memory, relative to byte 0.
pub struct MemoryView<B> {
    data: B,
}

impl<B: AsRef<[u8]>> MemoryView<B> {
    pub fn new(data: B) -> Self {
        Self { data }
    }

    pub fn size(&self) -> usize {
        self.data.as_ref().len()
    }

    /// Borrow `[offset, offset + len)`.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8], MemoryError> {
        let data = self.data.as_ref();
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or(MemoryError::OutOfBounds {
                offset,
                len,
                size: data.len(),
            })?;
        Ok(&data[offset..end])
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> MemoryView<B> {
    /// Mutably borrow `[offset, offset + len)`.
    pub fn slice_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], MemoryError> {
        let data = self.data.as_mut();
        let size = data.len();
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= size)
            .ok_or(MemoryError::OutOfBounds { offset, len, size })?;
        Ok(&mut data[offset..end])
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<(), MemoryError> {
        self.slice_mut(offset, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }
}

macro_rules! le_accessors {
    ($($read:ident / $write:ident : $ty:ty),* $(,)?) => {
        impl<B: AsRef<[u8]>> MemoryView<B> {
            $(
                pub fn $read(&self, offset: usize) -> Result<$ty, MemoryError> {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    let len = buf.len();
                    buf.copy_from_slice(self.slice(offset, len)?);
                    Ok(<$ty>::from_le_bytes(buf))
                }
            )*
        }

        impl<B: AsRef<[u8]> + AsMut<[u8]>> MemoryView<B> {
            $(
                pub fn $write(&mut self, offset: usize, value: $ty) -> Result<(), MemoryError> {
                    self.write_bytes(offset, &value.to_le_bytes())
                }
            )*
        }
    };
}

le_accessors! {
    read_u8 / write_u8: u8,
    read_i8 / write_i8: i8,
    read_u16 / write_u16: u16,
    read_i16 / write_i16: i16,
    read_u32 / write_u32: u32,
    read_i32 / write_i32: i32,
    read_u64 / write_u64: u64,
    read_i64 / write_i64: i64,
    read_f32 / write_f32: f32,
    read_f64 / write_f64: f64,
}

/// Where the argv/envp block starts.
pub const ARGV_BASE: usize = 4096;

/// First address of the guest's data section; the argv block must end below it.
pub const MIN_DATA_ADDR: usize = 4096 + 8192;

fn align8(size: usize) -> usize {
    (size + 7) & !7
}

/// The argv/envp block, laid out but not yet written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgvLayout {
    /// Bytes to place at [`ARGV_BASE`].
    pub bytes: Vec<u8>,
    pub argc: i32,
    /// Address of the pointer array.
    pub argv: i32,
}

impl ArgvLayout {
    /// Lays out NUL-terminated argument and `KEY=VALUE` strings (8-byte
    /// aligned) followed by the pointer array: one 8-byte entry per string
    /// with a 0 after argv and a 0 after envp.
    pub fn build(args: &[String], env: &BTreeMap<String, String>) -> Result<Self, BridgeError> {
        fn push_str(bytes: &mut Vec<u8>, s: &str) -> usize {
            let ptr = ARGV_BASE + bytes.len();
            bytes.extend_from_slice(s.as_bytes());
            bytes.push(0);
            bytes.resize(align8(bytes.len()), 0);
            ptr
        }

        let mut bytes = Vec::new();
        let mut pointers = Vec::new();
        for arg in args {
            pointers.push(push_str(&mut bytes, arg));
        }
        pointers.push(0);
        for (key, value) in env {
            pointers.push(push_str(&mut bytes, &format!("{}={}", key, value)));
        }
        pointers.push(0);

        let argv = ARGV_BASE + bytes.len();
        for ptr in pointers {
            bytes.extend_from_slice(&(ptr as u32).to_le_bytes());
            bytes.extend_from_slice(&0u32.to_le_bytes());
        }

        if ARGV_BASE + bytes.len() >= MIN_DATA_ADDR {
            return Err(BridgeError::ArgvTooLong);
        }

        Ok(Self {
            bytes,
            argc: args.len() as i32,
            argv: argv as i32,
        })
    }

    pub fn write_to<B: AsRef<[u8]> + AsMut<[u8]>>(
        &self,
        view: &mut MemoryView<B>,
    ) -> Result<(), MemoryError> {
        view.write_bytes(ARGV_BASE, &self.bytes)
    }
}
