//! Paged byte buffer backed by a page pool.
//!
//! A `PageBuffer` grows in fixed-size pages borrowed from a `PagePool`.
//! `slice` hands out `Slice` fragments that read the underlying pages without
//! copying. Buffer and slices share ownership of the pages; the pages go back
//! to the pool when the last of them is dropped.

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub const PAGE_SIZE: usize = 65536;

/// Upper bound of idle pages kept by a pool.
const MAX_IDLE_PAGES: usize = 64;

static DEFAULT_POOL: Lazy<Arc<PagePool>> = Lazy::new(|| Arc::new(PagePool::new()));

/// Free list of pages.
#[derive(Default)]
pub struct PagePool {
    free: Mutex<Vec<Box<[u8]>>>,
}

impl PagePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared process pool used by `PageBuffer::new`.
    pub fn global() -> Arc<PagePool> {
        Arc::clone(&DEFAULT_POOL)
    }

    /// A zeroed page, reused from the free list when possible.
    fn get(&self) -> Box<[u8]> {
        match self.free.lock().pop() {
            Some(mut page) => {
                page.fill(0);
                page
            }
            None => vec![0u8; PAGE_SIZE].into_boxed_slice(),
        }
    }

    fn put(&self, page: Box<[u8]>) {
        let mut free = self.free.lock();
        if free.len() < MAX_IDLE_PAGES {
            free.push(page);
        }
    }

    /// Number of idle pages.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

struct Pages {
    pool: Arc<PagePool>,
    pages: Vec<Box<[u8]>>,
    len: usize,
}

impl Pages {
    fn ensure(&mut self, size: usize) {
        while self.pages.len() * PAGE_SIZE < size {
            let page = self.pool.get();
            self.pages.push(page);
        }
        if size > self.len {
            self.len = size;
        }
    }

    fn write_at(&mut self, mut offset: usize, mut data: &[u8]) {
        self.ensure(offset + data.len());
        while !data.is_empty() {
            let page = offset / PAGE_SIZE;
            let start = offset % PAGE_SIZE;
            let n = data.len().min(PAGE_SIZE - start);
            self.pages[page][start..start + n].copy_from_slice(&data[..n]);
            data = &data[n..];
            offset += n;
        }
    }

    fn read_at(&self, mut offset: usize, end: usize, out: &mut [u8]) -> usize {
        let mut written = 0;
        while written < out.len() && offset < end {
            let page = offset / PAGE_SIZE;
            let start = offset % PAGE_SIZE;
            let n = (out.len() - written)
                .min(PAGE_SIZE - start)
                .min(end - offset);
            out[written..written + n].copy_from_slice(&self.pages[page][start..start + n]);
            written += n;
            offset += n;
        }
        written
    }
}

impl Drop for Pages {
    fn drop(&mut self) {
        for page in self.pages.drain(..) {
            self.pool.put(page);
        }
    }
}

/// Growable buffer made of pooled pages.
pub struct PageBuffer {
    pages: Arc<RwLock<Pages>>,
    cursor: usize,
}

impl PageBuffer {
    pub fn new() -> Self {
        Self::with_pool(PagePool::global())
    }

    pub fn with_pool(pool: Arc<PagePool>) -> Self {
        Self {
            pages: Arc::new(RwLock::new(Pages {
                pool,
                pages: Vec::new(),
                len: 0,
            })),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.pages.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `data` at `offset`, growing the buffer as needed.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) {
        self.pages.write().write_at(offset, data);
    }

    /// Write a big-endian u32 at `offset`.
    pub fn write_size_at(&mut self, offset: usize, size: u32) {
        self.write_at(offset, &size.to_be_bytes());
    }

    /// Fragment covering `[begin, end)`. The fragment keeps the pages alive.
    pub fn slice(&self, begin: usize, end: usize) -> Slice {
        let len = self.len();
        let end = end.min(len);
        let begin = begin.min(end);
        Slice {
            pages: Arc::clone(&self.pages),
            begin,
            end,
            pos: begin,
        }
    }

    /// Copy the contents from `from` to the end into a writer.
    pub fn write_to<W: Write>(&self, w: &mut W, from: usize) -> io::Result<usize> {
        let pages = self.pages.read();
        let mut offset = from;
        let mut total = 0;
        while offset < pages.len {
            let page = offset / PAGE_SIZE;
            let start = offset % PAGE_SIZE;
            let n = (PAGE_SIZE - start).min(pages.len - offset);
            w.write_all(&pages.pages[page][start..start + n])?;
            offset += n;
            total += n;
        }
        Ok(total)
    }

    /// Async counterpart of `write_to`, used by the protocol writers.
    pub async fn write_to_async<W: AsyncWrite + Unpin>(
        &self,
        w: &mut W,
        from: usize,
    ) -> io::Result<usize> {
        let chunks: Vec<Vec<u8>> = {
            let pages = self.pages.read();
            let mut chunks = Vec::new();
            let mut offset = from;
            while offset < pages.len {
                let page = offset / PAGE_SIZE;
                let start = offset % PAGE_SIZE;
                let n = (PAGE_SIZE - start).min(pages.len - offset);
                chunks.push(pages.pages[page][start..start + n].to_vec());
                offset += n;
            }
            chunks
        };
        let mut total = 0;
        for chunk in chunks {
            w.write_all(&chunk).await?;
            total += chunk.len();
        }
        Ok(total)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        // writing into a Vec cannot fail
        let _ = self.write_to(&mut out, 0);
        out
    }
}

impl Default for PageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for PageBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let offset = self.cursor;
        self.write_at(offset, buf);
        self.cursor += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read-only view over part of a `PageBuffer`.
pub struct Slice {
    pages: Arc<RwLock<Pages>>,
    begin: usize,
    end: usize,
    pos: usize,
}

impl Slice {
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.begin
    }
}

impl Read for Slice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.pages.read().read_at(self.pos, self.end, buf);
        self.pos += n;
        Ok(n)
    }
}

impl Seek for Slice {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.len() as i64;
        let current = (self.pos - self.begin) as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => current + n,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of slice",
            ));
        }
        let target = target.min(len) as usize;
        self.pos = self.begin + target;
        Ok(target as u64)
    }
}
