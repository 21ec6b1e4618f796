//! Candidate Builder: given a source file and a `(offset, chunksize)`,
//! produces a new anonymous temporary file with that chunk deleted or
//! zeroed (spec §2, §4.4).
//!
//! Source files may be read concurrently by several strategy invocations at
//! once (one per in-flight speculative extension), so reads use positional
//! I/O (`read_exact_at`) rather than seek+read, which would race on the
//! shared file offset.

use std::fs::File;
use std::io::{self, Write};
use std::os::unix::fs::FileExt;

const COPY_BUF: usize = 64 * 1024;

fn copy_range(source: &File, dest: &mut File, mut start: u64, end: u64) -> io::Result<()> {
    let mut buf = vec![0u8; COPY_BUF];
    while start < end {
        let want = (end - start).min(COPY_BUF as u64) as usize;
        source.read_exact_at(&mut buf[..want], start)?;
        dest.write_all(&buf[..want])?;
        start += want as u64;
    }
    Ok(())
}

/// Builds `source.bytes[0..offset] ++ source.bytes[offset+chunksize..size]`
/// in a fresh anonymous file. Returns the file and its length, which is
/// always `size - chunksize` when `offset + chunksize <= size`, and
/// `offset` otherwise (the tail is empty because the chunk already ran off
/// the end — see `strategy::bisect`).
pub fn delete_chunk(source: &File, size: u64, offset: u64, chunksize: u64) -> io::Result<(File, u64)> {
    let mut dest = tempfile::tempfile()?;
    copy_range(source, &mut dest, 0, offset)?;
    let tail_start = offset + chunksize;
    let new_size = if tail_start <= size {
        copy_range(source, &mut dest, tail_start, size)?;
        size - chunksize
    } else {
        offset
    };
    Ok((dest, new_size))
}

/// Builds `source.bytes[0..offset] ++ [zero_byte; chunksize] ++
/// source.bytes[offset+chunksize..size]` in a fresh anonymous file. Length
/// is always unchanged (`size`).
pub fn zero_chunk(
    source: &File,
    size: u64,
    offset: u64,
    chunksize: u64,
    zero_byte: u8,
) -> io::Result<(File, u64)> {
    let mut dest = tempfile::tempfile()?;
    copy_range(source, &mut dest, 0, offset)?;
    let zeros = vec![zero_byte; chunksize.min(COPY_BUF as u64) as usize];
    let mut written = 0u64;
    while written < chunksize {
        let want = (chunksize - written).min(zeros.len() as u64) as usize;
        dest.write_all(&zeros[..want])?;
        written += want as u64;
    }
    let tail_start = offset + chunksize;
    if tail_start < size {
        copy_range(source, &mut dest, tail_start, size)?;
    }
    Ok((dest, size))
}

/// Reads `len` bytes at `offset` from `source` without disturbing any
/// other reader's position. Used by the zero strategy's already-zero skip
/// check.
pub fn read_range(source: &File, offset: u64, len: u64) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len as usize];
    source.read_exact_at(&mut buf, offset)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};

    fn file_with(bytes: &[u8]) -> File {
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(bytes).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        f
    }

    fn read_all(f: &mut File) -> Vec<u8> {
        use std::io::Read;
        f.seek(SeekFrom::Start(0)).unwrap();
        let mut out = Vec::new();
        f.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn delete_middle_chunk() {
        let source = file_with(b"ABCDEFGH");
        let (mut out, size) = delete_chunk(&source, 8, 2, 3).unwrap();
        assert_eq!(size, 5);
        assert_eq!(read_all(&mut out), b"ABFGH");
    }

    #[test]
    fn delete_chunk_past_end() {
        let source = file_with(b"ABCDEFGH");
        let (mut out, size) = delete_chunk(&source, 8, 6, 5).unwrap();
        assert_eq!(size, 6);
        assert_eq!(read_all(&mut out), b"ABCDEF");
    }

    #[test]
    fn zero_middle_chunk() {
        let source = file_with(b"AAAA");
        let (mut out, size) = zero_chunk(&source, 4, 1, 2, 0).unwrap();
        assert_eq!(size, 4);
        assert_eq!(read_all(&mut out), b"A\0\0A");
    }

    #[test]
    fn read_range_matches() {
        let source = file_with(b"hello world");
        let got = read_range(&source, 4, 4).unwrap();
        assert_eq!(&got, b"o wo");
    }
}
