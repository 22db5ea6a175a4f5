//! ISO-BMFF box reading and writing primitives.

use std::io::{Read, Seek, SeekFrom};

use subforge_common::error::{SubforgeError, SubforgeResult};

pub type FourCc = [u8; 4];

/// Printable form of a box type.
pub fn fourcc_str(kind: &FourCc) -> String {
    kind.iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect()
}

/// Header of a box found while scanning a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub kind: FourCc,
    /// Total size including the header.
    pub size: u64,
    pub header_len: u64,
    /// Absolute offset of the first header byte.
    pub offset: u64,
}

impl BoxHeader {
    /// Read the header at the reader's position. `None` at a clean end of stream.
    pub fn read<R: Read + Seek + ?Sized>(reader: &mut R) -> SubforgeResult<Option<Self>> {
        let offset = reader.stream_position()?;

        let mut header = [0u8; 8];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let kind = [header[4], header[5], header[6], header[7]];

        let (size, header_len) = match size32 {
            1 => {
                let mut ext = [0u8; 8];
                reader.read_exact(&mut ext)?;
                (u64::from_be_bytes(ext), 16)
            }
            0 => {
                let here = reader.stream_position()?;
                let end = reader.seek(SeekFrom::End(0))?;
                reader.seek(SeekFrom::Start(here))?;
                (end - offset, 8)
            }
            n => (n as u64, 8),
        };

        if size < header_len {
            return Err(SubforgeError::demux(format!(
                "box '{}' at offset {offset} has invalid size {size}",
                fourcc_str(&kind)
            )));
        }

        Ok(Some(Self {
            kind,
            size,
            header_len,
            offset,
        }))
    }

    pub fn content_len(&self) -> u64 {
        self.size - self.header_len
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// A child box inside an in-memory parent payload.
#[derive(Debug, Clone, Copy)]
pub struct RawBox<'a> {
    pub kind: FourCc,
    /// Content after the header.
    pub payload: &'a [u8],
    /// The complete box, header included.
    pub raw: &'a [u8],
}

/// Split a payload into its child boxes.
pub fn children(data: &[u8]) -> SubforgeResult<Vec<RawBox<'_>>> {
    let mut boxes = Vec::new();
    let mut pos = 0usize;

    while pos + 8 <= data.len() {
        let size32 = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
        let kind = [data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]];

        let (size, header_len) = match size32 {
            1 => {
                if pos + 16 > data.len() {
                    return Err(SubforgeError::demux("truncated 64-bit box header"));
                }
                let mut ext = [0u8; 8];
                ext.copy_from_slice(&data[pos + 8..pos + 16]);
                (u64::from_be_bytes(ext) as usize, 16)
            }
            0 => (data.len() - pos, 8),
            n => (n as usize, 8),
        };

        if size < header_len || pos + size > data.len() {
            return Err(SubforgeError::demux(format!(
                "box '{}' overruns its parent ({size} bytes at {pos} of {})",
                fourcc_str(&kind),
                data.len()
            )));
        }

        boxes.push(RawBox {
            kind,
            payload: &data[pos + header_len..pos + size],
            raw: &data[pos..pos + size],
        });
        pos += size;
    }

    Ok(boxes)
}

/// Payload of the first child of type `kind`.
pub fn find_child<'a>(data: &'a [u8], kind: &FourCc) -> SubforgeResult<Option<&'a [u8]>> {
    Ok(children(data)?
        .into_iter()
        .find(|b| &b.kind == kind)
        .map(|b| b.payload))
}

/// Big-endian cursor over a box payload.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn bytes(&mut self, n: usize) -> SubforgeResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(SubforgeError::demux(format!(
                "unexpected end of box: wanted {n} bytes, {} left",
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> SubforgeResult<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> SubforgeResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> SubforgeResult<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> SubforgeResult<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> SubforgeResult<i32> {
        Ok(self.u32()? as i32)
    }

    pub fn u64(&mut self) -> SubforgeResult<u64> {
        let b = self.bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    /// Version byte and 24-bit flags of a full box.
    pub fn full_box_header(&mut self) -> SubforgeResult<(u8, u32)> {
        let v = self.u32()?;
        Ok(((v >> 24) as u8, v & 0x00FF_FFFF))
    }

    /// Entry count that must fit in the remaining payload at `entry_len` bytes each.
    pub fn entry_count(&mut self, entry_len: usize) -> SubforgeResult<usize> {
        let count = self.u32()? as usize;
        if count.saturating_mul(entry_len) > self.remaining() {
            return Err(SubforgeError::demux(format!(
                "table claims {count} entries but only {} bytes remain",
                self.remaining()
            )));
        }
        Ok(count)
    }
}

/// Append a box of type `kind` whose content is produced by `body`.
pub fn write_box(out: &mut Vec<u8>, kind: &FourCc, body: impl FnOnce(&mut Vec<u8>)) {
    let start = out.len();
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(kind);
    body(out);
    let size = (out.len() - start) as u32;
    out[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

/// Append a full box (version + flags) of type `kind`.
pub fn write_full_box(
    out: &mut Vec<u8>,
    kind: &FourCc,
    version: u8,
    flags: u32,
    body: impl FnOnce(&mut Vec<u8>),
) {
    write_box(out, kind, |out| {
        out.extend_from_slice(&((u32::from(version) << 24) | (flags & 0x00FF_FFFF)).to_be_bytes());
        body(out);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_write_box_patches_size() {
        let mut out = Vec::new();
        write_box(&mut out, b"free", |b| b.extend_from_slice(&[1, 2, 3]));
        assert_eq!(out, vec![0, 0, 0, 11, b'f', b'r', b'e', b'e', 1, 2, 3]);
    }

    #[test]
    fn test_children_and_find() {
        let mut out = Vec::new();
        write_box(&mut out, b"aaaa", |b| b.push(7));
        write_full_box(&mut out, b"bbbb", 1, 3, |b| b.push(9));
        let kids = children(&out).unwrap();
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[1].payload, &[1, 0, 0, 3, 9]);
        assert_eq!(find_child(&out, b"aaaa").unwrap(), Some(&[7u8][..]));
        assert_eq!(find_child(&out, b"cccc").unwrap(), None);
    }

    #[test]
    fn test_children_rejects_overrun() {
        let data = [0, 0, 0, 64, b'm', b'o', b'o', b'v', 0, 0];
        assert!(children(&data).is_err());
    }

    #[test]
    fn test_header_read_extended_size() {
        let mut data = vec![0, 0, 0, 1, b'm', b'd', b'a', b't'];
        data.extend_from_slice(&20u64.to_be_bytes());
        data.extend_from_slice(&[0; 4]);
        let mut cursor = Cursor::new(data);
        let header = BoxHeader::read(&mut cursor).unwrap().unwrap();
        assert_eq!(&header.kind, b"mdat");
        assert_eq!(header.size, 20);
        assert_eq!(header.header_len, 16);
        assert_eq!(header.content_len(), 4);
        assert!(BoxHeader::read(&mut Cursor::new(Vec::new())).unwrap().is_none());
    }

    #[test]
    fn test_entry_count_guard() {
        let data = [0, 0, 0, 100, 0, 0, 0, 0];
        let mut reader = ByteReader::new(&data);
        assert!(reader.entry_count(4).is_err());
    }
}
