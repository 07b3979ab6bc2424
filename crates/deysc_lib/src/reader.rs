use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Position-tracking cursor over the instruction region.
///
/// Reads past the end return `None`; the decoder turns that into a
/// truncation error carrying the offending address.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.buf.len());
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub(crate) fn peek_u8(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub(crate) fn get_u8(&mut self) -> Option<u8> {
        let v = self.peek_u8()?;
        self.pos += 1;
        Some(v)
    }

    pub(crate) fn get_u16(&mut self) -> Option<u16> {
        let b = self.get_bytes(2)?;
        Some(LittleEndian::read_u16(b))
    }

    pub(crate) fn get_u16_be(&mut self) -> Option<u16> {
        let b = self.get_bytes(2)?;
        Some(BigEndian::read_u16(b))
    }

    pub(crate) fn get_i16(&mut self) -> Option<i16> {
        let b = self.get_bytes(2)?;
        Some(LittleEndian::read_i16(b))
    }

    pub(crate) fn get_u24(&mut self) -> Option<u32> {
        let b = self.get_bytes(3)?;
        Some(LittleEndian::read_u24(b))
    }

    pub(crate) fn get_u32(&mut self) -> Option<u32> {
        let b = self.get_bytes(4)?;
        Some(LittleEndian::read_u32(b))
    }

    pub(crate) fn get_f32(&mut self) -> Option<f32> {
        let b = self.get_bytes(4)?;
        Some(LittleEndian::read_f32(b))
    }

    pub(crate) fn get_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_endianness_reads() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_u16(), Some(0x0201));
        assert_eq!(r.get_u16_be(), Some(0x0304));
        assert_eq!(r.get_u24(), Some(0x070605));
        assert_eq!(r.remaining(), 0);
        assert_eq!(r.get_u8(), None);
    }

    #[test]
    fn short_read_does_not_advance() {
        let bytes = [0xaa, 0xbb];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_u8(), Some(0xaa));
        assert_eq!(r.get_u32(), None);
        assert_eq!(r.position(), 1);
    }
}
