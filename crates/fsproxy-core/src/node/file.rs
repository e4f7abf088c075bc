use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use tracing::{debug, instrument, trace, warn};

use super::{EventKind, FileStamp, ProxyNode};
use crate::error::{FsError, FsResult};
use crate::lock::LockCapability;
use crate::naming::{EntryKind, is_absent};
use crate::stream::{Ticket, TicketMode};

/// Read stream over a file proxy, holding a shared ticket.
#[derive(Debug)]
pub struct NodeReader {
    file: File,
    ticket: Ticket,
}

impl NodeReader {
    /// Close the stream and release its ticket.
    pub fn close(self) {
        self.ticket.close();
    }
}

impl Read for NodeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for NodeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

/// Write stream over a file proxy, holding the exclusive ticket.
///
/// Closing (or dropping) the stream releases the ticket, refreshes the
/// node's cached stamp and fires one expected `Changed` event.
#[derive(Debug)]
pub struct NodeWriter {
    file: Option<File>,
    ticket: Ticket,
    node: Arc<ProxyNode>,
}

impl NodeWriter {
    pub fn close(mut self) -> FsResult<()> {
        self.finish()
    }

    fn finish(&mut self) -> FsResult<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        let path = self.node.path();
        let flushed = file
            .flush()
            .and_then(|()| file.sync_all())
            .map_err(|e| FsError::io("flush", &path, e));
        drop(file);
        self.ticket.close();
        self.node.written();
        flushed
    }
}

impl Write for NodeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::other("write stream already closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for NodeWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(error = %e, "Write stream closed with error");
        }
    }
}

impl ProxyNode {
    fn ensure_file(&self) -> FsResult<()> {
        if self.is_file() {
            Ok(())
        } else {
            Err(FsError::StructuralConflict {
                path: self.path(),
                expected: EntryKind::File,
                found: self.kind(),
            })
        }
    }

    fn request_ticket(&self, mode: TicketMode) -> FsResult<Ticket> {
        let cache = self.cache()?;
        let ticket = cache.streams().request(self.identity().key(), mode)?;
        if ticket.waited() {
            cache.metrics().record_ticket_wait();
        }
        Ok(ticket)
    }

    /// Open the file for reading under a shared ticket.
    pub fn open_read(&self) -> FsResult<NodeReader> {
        self.ensure_valid()?;
        self.ensure_file()?;
        let ticket = self.request_ticket(TicketMode::Shared)?;
        let path = self.path();
        let file = File::open(&path).map_err(|e| FsError::io("open", &path, e))?;
        Ok(NodeReader { file, ticket })
    }

    /// Open the file for writing (truncating) under the exclusive ticket.
    #[instrument(level = "debug", skip_all, fields(path = %self.path().display()))]
    pub fn open_write(self: &Arc<Self>, lock: &LockCapability) -> FsResult<NodeWriter> {
        self.ensure_valid()?;
        self.ensure_file()?;
        self.ensure_protected_by(lock)?;
        let ticket = self.request_ticket(TicketMode::Exclusive)?;
        let path = self.path();
        let file = File::create(&path).map_err(|e| FsError::io("open", &path, e))?;
        Ok(NodeWriter {
            file: Some(file),
            ticket,
            node: Arc::clone(self),
        })
    }

    /// Bookkeeping after a write stream closed.
    fn written(self: &Arc<Self>) {
        let Ok(cache) = self.cache() else {
            return;
        };
        cache.metrics().record_stat();
        match fs::metadata(self.path()) {
            Ok(meta) => {
                self.swap_stamp(FileStamp::from_metadata(&meta));
            }
            Err(e) => {
                debug!(path = %self.path().display(), error = %e, "Stat after write failed");
            }
        }
        if self.is_valid() {
            cache.fire(self, EventKind::Changed, true);
        }
    }

    pub(crate) fn refresh_file(self: &Arc<Self>, expected: bool) -> FsResult<()> {
        let cache = self.cache()?;
        let path = self.path();
        cache.metrics().record_stat();

        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) if is_absent(&e) => {
                debug!(path = %path.display(), "File vanished");
                cache.invalidate_subtree_with(&path, expected);
                return Ok(());
            }
            Err(e) => return Err(FsError::io("stat", &path, e)),
        };

        if EntryKind::from_metadata(&meta) != EntryKind::File {
            debug!(path = %path.display(), "File replaced by another kind");
            cache.invalidate_subtree_with(&path, expected);
            return Ok(());
        }

        let fresh = FileStamp::from_metadata(&meta);
        let Some(previous) = self.swap_stamp(fresh) else {
            return Ok(());
        };
        if previous == fresh {
            return Ok(());
        }
        if cache.streams().is_being_written(self.identity().key()) {
            // The writer fires its own event on close.
            trace!(path = %path.display(), "Change suppressed while writing");
            return Ok(());
        }
        cache.fire(self, EventKind::Changed, expected);
        Ok(())
    }
}
