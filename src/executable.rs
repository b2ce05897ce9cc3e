//! NOFF executables and the file system they are read from.
//!
//! The VM manager never owns an open file across calls. It asks the
//! [`FileSystem`] for a fresh handle each time it needs bytes from an
//! executable, the same way the loader reopens the program on every fault.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::rc::Rc;

use crate::constants::*;
use crate::error::{VmError, VmResult};

/// Location of one segment in memory and in the file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Segment {
    pub virtual_addr: u32,
    pub in_file_addr: u32,
    pub size: u32,
}

/// Header at offset 0 of every NOFF executable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoffHeader {
    pub magic: u32,
    pub code: Segment,
    pub init_data: Segment,
    pub uninit_data: Segment,
}

impl NoffHeader {
    /// Decode a header, correcting byte order when the magic only matches swapped.
    pub fn parse(bytes: &[u8]) -> VmResult<Self> {
        if bytes.len() < NOFF_HEADER_SIZE {
            return Err(VmError::BadExecutable(format!(
                "header is {} bytes, expected {}",
                bytes.len(),
                NOFF_HEADER_SIZE
            )));
        }
        let mut words = [0u32; NOFF_HEADER_SIZE / 4];
        for (i, w) in words.iter_mut().enumerate() {
            let raw = [bytes[4 * i], bytes[4 * i + 1], bytes[4 * i + 2], bytes[4 * i + 3]];
            *w = u32::from_le_bytes(raw);
        }
        if words[0] != NOFF_MAGIC {
            if words[0].swap_bytes() != NOFF_MAGIC {
                return Err(VmError::BadExecutable(format!("bad magic {:#x}", words[0])));
            }
            for w in words.iter_mut() {
                *w = w.swap_bytes();
            }
        }
        let segment = |i: usize| Segment {
            virtual_addr: words[i],
            in_file_addr: words[i + 1],
            size: words[i + 2],
        };
        Ok(NoffHeader {
            magic: words[0],
            code: segment(1),
            init_data: segment(4),
            uninit_data: segment(7),
        })
    }

    /// Read and decode the header of `file`, rejecting segments that run past its end.
    pub fn read_from(file: &mut dyn OpenFile) -> VmResult<Self> {
        let mut buf = [0u8; NOFF_HEADER_SIZE];
        let n = file.read_at(&mut buf, 0)?;
        let header = Self::parse(&buf[..n])?;

        for (name, segment) in [("code", header.code), ("data", header.init_data)] {
            if segment.size == 0 {
                continue;
            }
            let end = segment.in_file_addr as usize + segment.size as usize;
            let mut last = [0u8; 1];
            if file.read_at(&mut last, end - 1)? == 0 {
                return Err(VmError::BadExecutable(format!(
                    "{} segment ends at {}, past end of file",
                    name, end
                )));
            }
        }
        Ok(header)
    }

    pub fn to_bytes(&self) -> [u8; NOFF_HEADER_SIZE] {
        let words = [
            self.magic,
            self.code.virtual_addr,
            self.code.in_file_addr,
            self.code.size,
            self.init_data.virtual_addr,
            self.init_data.in_file_addr,
            self.init_data.size,
            self.uninit_data.virtual_addr,
            self.uninit_data.in_file_addr,
            self.uninit_data.size,
        ];
        let mut out = [0u8; NOFF_HEADER_SIZE];
        for (chunk, w) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&w.to_le_bytes());
        }
        out
    }

    /// Code, data, bss and the user stack, in bytes
    pub fn address_space_size(&self) -> usize {
        self.code.size as usize
            + self.init_data.size as usize
            + self.uninit_data.size as usize
            + USER_STACK_SIZE
    }

    pub fn num_pages(&self) -> usize {
        div_round_up(self.address_space_size(), PAGE_SIZE)
    }

    /// File offset holding the first byte of virtual page `vpn`.
    ///
    /// Segments are laid out back to back on disk in segment order, starting
    /// at the code segment.
    pub fn page_file_offset(&self, vpn: usize) -> usize {
        self.code.in_file_addr as usize + vpn * PAGE_SIZE
    }
}

/// Build a NOFF image with code and data stored contiguously after the header
pub fn noff_image(code: &[u8], init_data: &[u8], uninit_size: usize) -> Vec<u8> {
    let code_off = NOFF_HEADER_SIZE as u32;
    let data_off = code_off + code.len() as u32;
    let header = NoffHeader {
        magic: NOFF_MAGIC,
        code: Segment {
            virtual_addr: 0,
            in_file_addr: code_off,
            size: code.len() as u32,
        },
        init_data: Segment {
            virtual_addr: code.len() as u32,
            in_file_addr: data_off,
            size: init_data.len() as u32,
        },
        uninit_data: Segment {
            virtual_addr: (code.len() + init_data.len()) as u32,
            in_file_addr: 0,
            size: uninit_size as u32,
        },
    };
    let mut image = header.to_bytes().to_vec();
    image.extend_from_slice(code);
    image.extend_from_slice(init_data);
    image
}

/// A readable, randomly addressable open file
pub trait OpenFile {
    /// Read up to `buf.len()` bytes starting at `offset`; short reads mean end of file.
    fn read_at(&mut self, buf: &mut [u8], offset: usize) -> VmResult<usize>;
}

/// Where executables come from
pub trait FileSystem {
    fn open(&self, name: &str) -> VmResult<Box<dyn OpenFile>>;
}

impl<T: FileSystem + ?Sized> FileSystem for Rc<T> {
    fn open(&self, name: &str) -> VmResult<Box<dyn OpenFile>> {
        (**self).open(name)
    }
}

/// Executables stored as files on the host, relative to `root`
#[derive(Debug, Default, Clone)]
pub struct HostFileSystem {
    root: PathBuf,
}

impl HostFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        HostFileSystem { root: root.into() }
    }
}

impl FileSystem for HostFileSystem {
    fn open(&self, name: &str) -> VmResult<Box<dyn OpenFile>> {
        match File::open(self.root.join(name)) {
            Ok(file) => Ok(Box::new(HostFile(file))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(VmError::ExecutableNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

struct HostFile(File);

impl OpenFile for HostFile {
    fn read_at(&mut self, buf: &mut [u8], offset: usize) -> VmResult<usize> {
        self.0.seek(SeekFrom::Start(offset as u64))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.0.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

/// In-memory file system; files can be added and removed through a shared handle
#[derive(Debug, Default)]
pub struct MemFileSystem {
    files: RefCell<HashMap<String, Rc<[u8]>>>,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        self.files.borrow_mut().insert(name.to_string(), bytes.into());
    }

    pub fn remove(&self, name: &str) -> bool {
        self.files.borrow_mut().remove(name).is_some()
    }
}

impl FileSystem for MemFileSystem {
    fn open(&self, name: &str) -> VmResult<Box<dyn OpenFile>> {
        let data = self
            .files
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| VmError::ExecutableNotFound(name.to_string()))?;
        Ok(Box::new(MemFile { data }))
    }
}

struct MemFile {
    data: Rc<[u8]>,
}

impl OpenFile for MemFile {
    fn read_at(&mut self, buf: &mut [u8], offset: usize) -> VmResult<usize> {
        if offset >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        Ok(n)
    }
}
