//! Concatenated segment image with header (§3 `Executable`, §6 executable
//! file format).

use std::io::{self, Read, Write};

pub const EXECUTABLE_MAGIC: &[u8; 8] = b"CSX64exe";
pub const EXECUTABLE_VERSION: u64 = 1;

/// Shallow `--dump` view of an `Executable` (§B); see `dump_json`.
#[derive(Serialize)]
struct ExecutableSummary {
    text_len: u64,
    rodata_len: u64,
    data_len: u64,
    bss_len: u64,
    content_size: u64,
    total_size: u64,
}

/// An immutable, linked binary image: four segment lengths plus a single
/// contiguous buffer holding text/rodata/data concatenated in that order.
/// `bss` is implicit zero-filled space the CPU allocates at `initialize`
/// time; it never appears in `content`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Executable {
    text_len: u64,
    rodata_len: u64,
    data_len: u64,
    bss_len: u64,
    content: Vec<u8>,
}

impl Executable {
    /// Constructs an executable from already-laid-out segment bytes. Called
    /// only by the linker (§4.3 step 10); the result is thereafter
    /// immutable for the rest of its lifetime.
    pub fn new(text: Vec<u8>, rodata: Vec<u8>, data: Vec<u8>, bss_len: u64) -> Self {
        let text_len = text.len() as u64;
        let rodata_len = rodata.len() as u64;
        let data_len = data.len() as u64;
        let mut content = text;
        content.extend_from_slice(&rodata);
        content.extend_from_slice(&data);
        Executable { text_len, rodata_len, data_len, bss_len, content }
    }

    pub fn text_seglen(&self) -> u64 {
        self.text_len
    }

    pub fn rodata_seglen(&self) -> u64 {
        self.rodata_len
    }

    pub fn data_seglen(&self) -> u64 {
        self.data_len
    }

    pub fn bss_seglen(&self) -> u64 {
        self.bss_len
    }

    /// `text + rodata + data` — the length of `content()`.
    pub fn content_size(&self) -> u64 {
        self.text_len + self.rodata_len + self.data_len
    }

    /// `text + rodata + data + bss` — the size a CPU must allocate to hold
    /// this image before adding stack space.
    pub fn total_size(&self) -> u64 {
        self.content_size() + self.bss_len
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Pretty-printed JSON summary for `--dump` (§B), the executable-side
    /// counterpart of `ObjectFile::dump_json`.
    pub fn dump_json(&self) -> serde_json::Result<String> {
        let summary = ExecutableSummary {
            text_len: self.text_len,
            rodata_len: self.rodata_len,
            data_len: self.data_len,
            bss_len: self.bss_len,
            content_size: self.content_size(),
            total_size: self.total_size(),
        };
        serde_json::to_string_pretty(&summary)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(EXECUTABLE_MAGIC)?;
        w.write_all(&EXECUTABLE_VERSION.to_le_bytes())?;
        w.write_all(&self.text_len.to_le_bytes())?;
        w.write_all(&self.rodata_len.to_le_bytes())?;
        w.write_all(&self.data_len.to_le_bytes())?;
        w.write_all(&self.bss_len.to_le_bytes())?;
        w.write_all(&self.content)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != EXECUTABLE_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad executable magic"));
        }
        let mut buf8 = [0u8; 8];
        r.read_exact(&mut buf8)?;
        let version = u64::from_le_bytes(buf8);
        if version != EXECUTABLE_VERSION {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "unsupported executable version"));
        }
        r.read_exact(&mut buf8)?;
        let text_len = u64::from_le_bytes(buf8);
        r.read_exact(&mut buf8)?;
        let rodata_len = u64::from_le_bytes(buf8);
        r.read_exact(&mut buf8)?;
        let data_len = u64::from_le_bytes(buf8);
        r.read_exact(&mut buf8)?;
        let bss_len = u64::from_le_bytes(buf8);

        let content_len = text_len + rodata_len + data_len;
        let mut content = vec![0u8; content_len as usize];
        r.read_exact(&mut content)?;

        Ok(Executable { text_len, rodata_len, data_len, bss_len, content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_serialization() {
        let exe = Executable::new(vec![1, 2, 3], vec![4, 5], vec![6], 16);
        let mut buf = Vec::new();
        exe.write_to(&mut buf).unwrap();
        let back = Executable::read_from(&mut &buf[..]).unwrap();
        assert_eq!(exe, back);
    }

    #[test]
    fn sizes_are_consistent() {
        let exe = Executable::new(vec![0; 10], vec![0; 20], vec![0; 5], 7);
        assert_eq!(exe.content_size(), 35);
        assert_eq!(exe.total_size(), 42);
        assert_eq!(
            exe.total_size(),
            exe.text_seglen() + exe.rodata_seglen() + exe.data_seglen() + exe.bss_seglen()
        );
    }
}
