//! Buffer sources and the table of buffers on offer.

use super::lock_context::LockContext;
use crate::error::{ChannelError, Result};
use crate::message::MessageId;
use bytes::Bytes;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Something a peer can pull bytes from.
pub trait BufferSource: Send + Sync + 'static {
    /// Total length in bytes.
    fn size(&self) -> Result<u64>;

    /// Read `[start, end)`. Callers keep `start <= end <= size()`.
    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>>;

    /// Whether `read_range` blocks on IO. Such reads are moved off the
    /// async runtime.
    fn is_blocking(&self) -> bool {
        false
    }
}

/// Read `[start, end)` from `source` without stalling the runtime.
pub(crate) async fn read_source(
    source: Arc<dyn BufferSource>,
    start: u64,
    end: u64,
) -> Result<Vec<u8>> {
    if !source.is_blocking() {
        return source.read_range(start, end);
    }
    tokio::task::spawn_blocking(move || source.read_range(start, end))
        .await
        .map_err(|e| ChannelError::Source {
            message: format!("read task failed: {}", e),
            source: None,
        })?
}

fn check_range(start: u64, end: u64, size: u64) -> Result<()> {
    if start > end || end > size {
        return Err(ChannelError::Source {
            message: format!("range [{}, {}) outside buffer of {} bytes", start, end, size),
            source: None,
        });
    }
    Ok(())
}

impl BufferSource for Bytes {
    fn size(&self) -> Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        check_range(start, end, self.len() as u64)?;
        Ok(self[start as usize..end as usize].to_vec())
    }
}

impl BufferSource for Vec<u8> {
    fn size(&self) -> Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        check_range(start, end, self.len() as u64)?;
        Ok(self[start as usize..end as usize].to_vec())
    }
}

/// A seekable reader, such as an open file, served without loading it whole.
pub struct SeekableSource<R> {
    reader: Mutex<R>,
    size: u64,
}

impl<R: Read + Seek + Send + 'static> SeekableSource<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let size = reader
            .seek(SeekFrom::End(0))
            .map_err(ChannelError::source_io)?;
        Ok(Self {
            reader: Mutex::new(reader),
            size,
        })
    }
}

impl SeekableSource<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(ChannelError::source_io)?;
        Self::new(file)
    }
}

impl<R: Read + Seek + Send + 'static> BufferSource for SeekableSource<R> {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        check_range(start, end, self.size)?;
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        reader
            .seek(SeekFrom::Start(start))
            .map_err(ChannelError::source_io)?;
        let mut buf = vec![0u8; (end - start) as usize];
        reader.read_exact(&mut buf).map_err(ChannelError::source_io)?;
        Ok(buf)
    }

    fn is_blocking(&self) -> bool {
        true
    }
}

/// A buffer on offer to the peer.
pub(crate) struct BufferWrapper {
    pub source: Arc<dyn BufferSource>,
    /// Id of the in-flight announce call, once assigned.
    pub request_id: Option<MessageId>,
}

#[derive(Default)]
pub(crate) struct BufferTable {
    wrappers: HashMap<String, BufferWrapper>,
}

impl BufferTable {
    pub fn contains(&self, buffer_id: &str) -> bool {
        self.wrappers.contains_key(buffer_id)
    }

    pub fn get(&self, buffer_id: &str) -> Option<&BufferWrapper> {
        self.wrappers.get(buffer_id)
    }

    pub fn set_request_id(&mut self, buffer_id: &str, request_id: MessageId) -> bool {
        match self.wrappers.get_mut(buffer_id) {
            Some(wrapper) => {
                wrapper.request_id = Some(request_id);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, buffer_id: &str) -> Option<BufferWrapper> {
        self.wrappers.remove(buffer_id)
    }

    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub fn clear(&mut self) {
        self.wrappers.clear();
    }
}

/// Draw random ids until one is not held.
pub(crate) fn generate_buffer_id(ctx: &mut LockContext<'_, BufferTable>) -> String {
    loop {
        let id = Uuid::new_v4().to_string();
        if !ctx.with(|table| table.contains(&id)) {
            return id;
        }
    }
}

/// Store `source` under a fresh id, holding the lock across id generation
/// and insertion.
pub(crate) fn register_buffer(
    ctx: &mut LockContext<'_, BufferTable>,
    source: Arc<dyn BufferSource>,
) -> String {
    ctx.lock();
    let id = generate_buffer_id(ctx);
    ctx.with(|table| {
        table.wrappers.insert(
            id.clone(),
            BufferWrapper {
                source,
                request_id: None,
            },
        )
    });
    ctx.unlock();
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_in_memory_sources() {
        let bytes = Bytes::from_static(b"hello world");
        assert_eq!(bytes.size().unwrap(), 11);
        assert_eq!(bytes.read_range(6, 11).unwrap(), b"world");
        assert_eq!(bytes.read_range(3, 3).unwrap(), b"");
        assert!(bytes.read_range(6, 12).is_err());
        assert!(bytes.read_range(5, 4).is_err());

        let vec = b"abc".to_vec();
        assert_eq!(vec.read_range(0, 2).unwrap(), b"ab");
    }

    #[test]
    fn test_seekable_source_reads_ranges() {
        let source = SeekableSource::new(Cursor::new(b"0123456789".to_vec())).unwrap();
        assert_eq!(source.size().unwrap(), 10);
        assert_eq!(source.read_range(8, 10).unwrap(), b"89");
        assert_eq!(source.read_range(0, 3).unwrap(), b"012");
        assert!(source.read_range(9, 11).is_err());
    }

    #[test]
    fn test_seekable_source_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 600]).unwrap();
        file.flush().unwrap();

        let source = SeekableSource::open(file.path()).unwrap();
        assert_eq!(source.size().unwrap(), 600);
        assert_eq!(source.read_range(512, 600).unwrap(), vec![7u8; 88]);
    }

    /// Records the thread each read runs on.
    struct ThreadProbe(Mutex<Option<std::thread::ThreadId>>);

    impl BufferSource for ThreadProbe {
        fn size(&self) -> Result<u64> {
            Ok(4)
        }

        fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
            *self.0.lock().unwrap() = Some(std::thread::current().id());
            Ok(vec![0u8; (end - start) as usize])
        }

        fn is_blocking(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_blocking_reads_leave_the_runtime_thread() {
        let probe = Arc::new(ThreadProbe(Mutex::new(None)));
        let data = read_source(probe.clone(), 1, 3).await.unwrap();
        assert_eq!(data.len(), 2);
        let reader_thread = probe.0.lock().unwrap().unwrap();
        assert_ne!(reader_thread, std::thread::current().id());
    }

    #[tokio::test]
    async fn test_in_memory_reads_stay_inline() {
        let source: Arc<dyn BufferSource> = Arc::new(Bytes::from_static(b"abcdef"));
        assert!(!source.is_blocking());
        assert_eq!(read_source(source, 2, 4).await.unwrap(), b"cd");

        let file = SeekableSource::new(Cursor::new(b"xyz".to_vec())).unwrap();
        assert!(file.is_blocking());
        assert_eq!(read_source(Arc::new(file), 0, 3).await.unwrap(), b"xyz");
    }

    #[test]
    fn test_register_buffer_assigns_unique_ids() {
        let table = Mutex::new(BufferTable::default());
        let source: Arc<dyn BufferSource> = Arc::new(b"x".to_vec());

        let mut ids = std::collections::HashSet::new();
        for _ in 0..50 {
            let mut ctx = LockContext::new(&table);
            ids.insert(register_buffer(&mut ctx, source.clone()));
            assert!(!ctx.is_held());
        }
        assert_eq!(ids.len(), 50);
        assert_eq!(table.lock().unwrap().len(), 50);
    }

    #[test]
    fn test_request_id_recorded_and_removed() {
        let table = Mutex::new(BufferTable::default());
        let id = register_buffer(&mut LockContext::new(&table), Arc::new(Bytes::new()));

        let mut guard = table.lock().unwrap();
        assert!(guard.set_request_id(&id, MessageId::Num(4)));
        assert_eq!(guard.get(&id).unwrap().request_id, Some(MessageId::Num(4)));
        assert!(!guard.set_request_id("missing", MessageId::Num(1)));
        assert!(guard.remove(&id).is_some());
        assert!(!guard.contains(&id));
    }
}
