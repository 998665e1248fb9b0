// wire.rs -- little-endian record reader
//
// Every multi-byte field in the on-disk formats is little-endian. The
// reader normalizes records into native-endian values as it walks a
// byte slice: a straight copy on little-endian hosts, a byte swap on
// big-endian ones. Running off the end of the slice is a format error,
// never a panic.

use crate::error::{DropError, DropResult};

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    /// Reader over `buf[ofs..ofs + len]`, the usual way a lump is read.
    pub fn at(buf: &'a [u8], ofs: usize, len: usize) -> DropResult<Self> {
        let end = ofs
            .checked_add(len)
            .filter(|&e| e <= buf.len())
            .ok_or_else(|| DropError::new(format!("section out of range: {}+{}", ofs, len)))?;
        Ok(Reader { buf: &buf[ofs..end], pos: 0 })
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> DropResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(DropError::new(format!(
                "read past end of section ({} bytes left, {} wanted)",
                self.remaining(),
                n
            )));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn u8(&mut self) -> DropResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn i16(&mut self) -> DropResult<i16> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u16(&mut self) -> DropResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn i32(&mut self) -> DropResult<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u32(&mut self) -> DropResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f32(&mut self) -> DropResult<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn vec3(&mut self) -> DropResult<[f32; 3]> {
        Ok([self.f32()?, self.f32()?, self.f32()?])
    }

    pub fn bytes<const N: usize>(&mut self) -> DropResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn byte_slice(&mut self, n: usize) -> DropResult<&'a [u8]> {
        self.take(n)
    }

    pub fn skip(&mut self, n: usize) -> DropResult<()> {
        self.take(n)?;
        Ok(())
    }
}

/// NUL-terminated string out of a fixed-size name field.
pub fn name_str(bytes: &[u8]) -> &str {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..len]).unwrap_or("")
}
