use bytes::Bytes;
use deku::ctx::Order;
use deku::prelude::*;
use deku::reader::Reader;
use deku::writer::Writer;
use std::io::{Read, Seek, Write};

/// Hard cap on any single variable-length XDR item. Checked before
/// allocation so a hostile length prefix cannot balloon memory.
pub const XDR_MAX_OPAQUE: u32 = 64 * 1024;

fn pad_len(len: usize) -> usize {
    (4 - len % 4) % 4
}

fn read_u32_be<R: Read + Seek>(reader: &mut Reader<R>) -> Result<u32, DekuError> {
    let mut buf = [0u8; 4];
    reader.read_bytes(4, &mut buf, Order::Lsb0)?;
    Ok(u32::from_be_bytes(buf))
}

fn write_u32_be<W: Write + Seek>(writer: &mut Writer<W>, value: u32) -> Result<(), DekuError> {
    writer.write_bytes(&value.to_be_bytes())
}

fn read_padded<R: Read + Seek>(reader: &mut Reader<R>) -> Result<Bytes, DekuError> {
    let len = read_u32_be(reader)?;
    if len > XDR_MAX_OPAQUE {
        return Err(DekuError::Parse(
            format!("opaque length {} exceeds {} byte cap", len, XDR_MAX_OPAQUE).into(),
        ));
    }
    let len = len as usize;
    let mut buf = vec![0u8; len];
    reader.read_bytes(len, &mut buf, Order::Lsb0)?;

    let pad = pad_len(len);
    if pad > 0 {
        let mut scratch = [0u8; 3];
        reader.read_bytes(pad, &mut scratch[..pad], Order::Lsb0)?;
    }
    Ok(Bytes::from(buf))
}

fn write_padded<W: Write + Seek>(writer: &mut Writer<W>, data: &[u8]) -> Result<(), DekuError> {
    if data.len() > XDR_MAX_OPAQUE as usize {
        return Err(DekuError::Parse(
            format!(
                "opaque length {} exceeds {} byte cap",
                data.len(),
                XDR_MAX_OPAQUE
            )
            .into(),
        ));
    }
    write_u32_be(writer, data.len() as u32)?;
    writer.write_bytes(data)?;
    let pad = pad_len(data.len());
    if pad > 0 {
        writer.write_bytes(&[0u8; 3][..pad])?;
    }
    Ok(())
}

/// Variable-length XDR opaque: big-endian length, payload, zero pad to
/// the next 4-byte boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XdrOpaque(pub Bytes);

impl XdrOpaque {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for XdrOpaque {
    fn from(vec: Vec<u8>) -> Self {
        Self(Bytes::from(vec))
    }
}

impl<'a> DekuReader<'a, ()> for XdrOpaque {
    fn from_reader_with_ctx<R: Read + Seek>(
        reader: &mut Reader<R>,
        _ctx: (),
    ) -> Result<Self, DekuError> {
        Ok(Self(read_padded(reader)?))
    }
}

impl DekuWriter<()> for XdrOpaque {
    fn to_writer<W: Write + Seek>(&self, writer: &mut Writer<W>, _ctx: ()) -> Result<(), DekuError> {
        write_padded(writer, &self.0)
    }
}

/// XDR string: same wire shape as an opaque, but the payload must be
/// valid UTF-8.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XdrString(pub String);

impl XdrString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'a> DekuReader<'a, ()> for XdrString {
    fn from_reader_with_ctx<R: Read + Seek>(
        reader: &mut Reader<R>,
        _ctx: (),
    ) -> Result<Self, DekuError> {
        let bytes = read_padded(reader)?;
        let s = String::from_utf8(bytes.to_vec())
            .map_err(|_| DekuError::Parse("string is not valid UTF-8".into()))?;
        Ok(Self(s))
    }
}

impl DekuWriter<()> for XdrString {
    fn to_writer<W: Write + Seek>(&self, writer: &mut Writer<W>, _ctx: ()) -> Result<(), DekuError> {
        write_padded(writer, self.0.as_bytes())
    }
}

/// XDR "pointer chain" list: each element is preceded by boolean 1, the
/// chain ends with boolean 0. MOUNT v3 encodes mount lists, export
/// lists, and group lists this way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XdrList<T>(pub Vec<T>);

impl<T> XdrList<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self(items)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }
}

impl<'a, T> DekuReader<'a, ()> for XdrList<T>
where
    T: DekuReader<'a, ()>,
{
    fn from_reader_with_ctx<R: Read + Seek>(
        reader: &mut Reader<R>,
        _ctx: (),
    ) -> Result<Self, DekuError> {
        let mut items = Vec::new();
        loop {
            match read_u32_be(reader)? {
                0 => break,
                1 => items.push(T::from_reader_with_ctx(reader, ())?),
                other => {
                    return Err(DekuError::Parse(
                        format!("list discriminator must be 0 or 1, got {}", other).into(),
                    ));
                }
            }
        }
        Ok(Self(items))
    }
}

impl<T> DekuWriter<()> for XdrList<T>
where
    T: DekuWriter<()>,
{
    fn to_writer<W: Write + Seek>(&self, writer: &mut Writer<W>, _ctx: ()) -> Result<(), DekuError> {
        for item in &self.0 {
            write_u32_be(writer, 1)?;
            item.to_writer(writer, ())?;
        }
        write_u32_be(writer, 0)
    }
}
