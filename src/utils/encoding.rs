use std::io::{self, Read, Write};

/// Padding byte used for fixed-width key columns
pub const PAD_BYTE: u8 = 0;

/// Write a u32 in little-endian format
pub fn write_u32_le<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Read a u32 in little-endian format
pub fn read_u32_le<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Write a u64 in little-endian format
pub fn write_u64_le<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a u16 in little-endian format
pub fn write_u16_le<W: Write>(writer: &mut W, value: u16) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Read a u16 in little-endian format
pub fn read_u16_le<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Write a length-prefixed (u16) byte string
pub fn write_short_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len = u16::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string longer than 65535 bytes"))?;
    write_u16_le(writer, len)?;
    writer.write_all(bytes)
}

/// Read a length-prefixed (u16) byte string
pub fn read_short_bytes<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = read_u16_le(reader)? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Write `bytes` into a fixed-width column, NUL-padded on the right
pub fn write_padded<W: Write>(writer: &mut W, bytes: &[u8], width: usize) -> io::Result<()> {
    if bytes.len() > width {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("key of {} bytes exceeds column width {}", bytes.len(), width),
        ));
    }
    writer.write_all(bytes)?;
    for _ in bytes.len()..width {
        writer.write_all(&[PAD_BYTE])?;
    }
    Ok(())
}

/// Strip right-hand NUL padding from a fixed-width column
#[inline]
pub fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != PAD_BYTE)
        .map(|i| i + 1)
        .unwrap_or(0);
    &bytes[..end]
}

/// Little-endian u16 at `offset` of a mapped slice
#[inline]
pub fn u16_at(buf: &[u8], offset: usize) -> u16 {
    let mut b = [0u8; 2];
    b.copy_from_slice(&buf[offset..offset + 2]);
    u16::from_le_bytes(b)
}

/// Little-endian u32 at `offset` of a mapped slice
#[inline]
pub fn u32_at(buf: &[u8], offset: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(b)
}

/// Little-endian u64 at `offset` of a mapped slice
#[inline]
pub fn u64_at(buf: &[u8], offset: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(b)
}
