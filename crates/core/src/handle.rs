//! Buffered file handle
//!
//! [`ObjectFile`] gives every backend the same file contract. Readers keep a
//! read-ahead window filled by ranged GETs; writers buffer up to one part and
//! either stream parts through a multipart upload, append, or PUT the whole
//! object on close, depending on what the driver advertises.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, Read, Seek, SeekFrom, Write};
use std::str::FromStr;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::cache::MetadataCache;
use crate::config::{RetryConfig, TransferConfig};
use crate::error::{Error, Result};
use crate::path::ObjectRef;
use crate::retry::with_retry;
use crate::runtime::Executor;
use crate::traits::{CompletedPart, DriverCapabilities};

/// How a handle was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `r`, `rb`, `rt`
    Read,
    /// `w`, `wb`, `wt`: create or truncate
    Write,
    /// `a`, `ab`, `at`: append, creating if missing
    Append,
    /// `x`, `xb`, `xt`: create, failing if the object exists
    CreateNew,
}

impl OpenMode {
    /// Parse a mode string; binary and text suffixes are equivalent
    pub fn parse(mode: &str) -> Result<Self> {
        match mode {
            "r" | "rb" | "rt" => Ok(Self::Read),
            "w" | "wb" | "wt" => Ok(Self::Write),
            "a" | "ab" | "at" => Ok(Self::Append),
            "x" | "xb" | "xt" => Ok(Self::CreateNew),
            other => Err(Error::InvalidMode(format!(
                "'{other}' (expected one of r, rb, rt, w, wb, wt, a, ab, at, x, xb, xt)"
            ))),
        }
    }

    pub fn is_write(self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self {
            Self::Read => "r",
            Self::Write => "w",
            Self::Append => "a",
            Self::CreateNew => "x",
        };
        f.write_str(mode)
    }
}

/// Per-handle overrides of the transfer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Read-ahead window in bytes
    pub buffer_size: Option<usize>,
    /// Write part size in bytes, raised to the driver minimum
    pub part_size: Option<usize>,
    /// Part uploads in flight
    pub upload_concurrency: Option<usize>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = Some(bytes);
        self
    }

    pub fn part_size(mut self, bytes: usize) -> Self {
        self.part_size = Some(bytes);
        self
    }

    pub fn upload_concurrency(mut self, tasks: usize) -> Self {
        self.upload_concurrency = Some(tasks);
        self
    }
}

/// What `flush()` does on a write handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushBehavior {
    /// Buffered bytes go out as a multipart part
    UploadsPart,
    /// Nothing reaches the backend before close
    DeferredUntilClose,
    /// Buffered bytes are appended to the object
    Appends,
}

/// Shared by every handle of one facade
#[derive(Debug)]
pub(crate) struct HandleContext {
    pub(crate) cache: Arc<MetadataCache>,
    pub(crate) executor: Executor,
    pub(crate) transfer: TransferConfig,
    pub(crate) retry: RetryConfig,
}

struct ReadWindow {
    size: u64,
    etag: Option<String>,
    position: u64,
    start: u64,
    data: Vec<u8>,
    buffer_size: usize,
}

impl ReadWindow {
    fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    fn contains(&self, position: u64) -> bool {
        position >= self.start && position < self.end()
    }

    fn buffered(&self) -> &[u8] {
        if self.contains(self.position) {
            &self.data[(self.position - self.start) as usize..]
        } else {
            &[]
        }
    }

    fn seek_to(&mut self, position: u64) {
        self.position = position;
        if !self.contains(position) {
            self.data.clear();
            self.start = position;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteStrategy {
    Multipart,
    SingleShot,
    Append,
}

struct MultipartUpload {
    upload_id: String,
    next_part: i32,
    in_flight: VecDeque<JoinHandle<Result<CompletedPart>>>,
    completed: Vec<CompletedPart>,
}

impl MultipartUpload {
    fn new(upload_id: String) -> Self {
        Self {
            upload_id,
            next_part: 1,
            in_flight: VecDeque::new(),
            completed: Vec::new(),
        }
    }
}

struct WriteSession {
    strategy: WriteStrategy,
    buffer: Vec<u8>,
    part_size: usize,
    min_part_size: usize,
    concurrency: usize,
    position: u64,
    upload: Option<MultipartUpload>,
}

impl WriteSession {
    /// Bytes not yet durably handed to the backend
    fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
            || self
                .upload
                .as_ref()
                .is_some_and(|upload| !upload.in_flight.is_empty())
    }
}

enum HandleState {
    OpenRead(ReadWindow),
    OpenWriteClean(WriteSession),
    OpenWriteDirty(WriteSession),
    Failed { reason: String },
    Closed,
}

impl HandleState {
    fn name(&self) -> &'static str {
        match self {
            Self::OpenRead(_) => "open-read",
            Self::OpenWriteClean(_) => "open-write-clean",
            Self::OpenWriteDirty(_) => "open-write-dirty",
            Self::Failed { .. } => "failed",
            Self::Closed => "closed",
        }
    }

    /// Error for an operation this state cannot serve
    fn refuse(&self, operation: &str, object: &ObjectRef) -> Error {
        match self {
            Self::Failed { reason } => Error::HandleFailed(reason.clone()),
            Self::Closed => Error::ClosedHandle(object.to_string()),
            Self::OpenRead(_) => Error::UnsupportedMode(format!(
                "{operation} on {object}, which is open for reading"
            )),
            Self::OpenWriteClean(_) | Self::OpenWriteDirty(_) => Error::UnsupportedMode(format!(
                "{operation} on {object}, which is open for writing"
            )),
        }
    }

    /// Put a write session in the variant matching its pending data
    fn settle(self) -> Self {
        match self {
            Self::OpenWriteClean(s) | Self::OpenWriteDirty(s) if s.has_pending() => {
                Self::OpenWriteDirty(s)
            }
            Self::OpenWriteClean(s) | Self::OpenWriteDirty(s) => Self::OpenWriteClean(s),
            other => other,
        }
    }
}

/// A file-like handle over one backend object
///
/// Implements [`Read`], [`BufRead`], [`Write`] and [`Seek`]. Dropping an open
/// write handle commits it; during a panic it aborts instead.
pub struct ObjectFile {
    object: ObjectRef,
    mode: OpenMode,
    flush_behavior: Option<FlushBehavior>,
    context: Arc<HandleContext>,
    state: HandleState,
}

impl ObjectFile {
    pub(crate) fn open(
        object: ObjectRef,
        mode: OpenMode,
        options: &OpenOptions,
        context: Arc<HandleContext>,
    ) -> Result<Self> {
        let capabilities = object.driver().capabilities();

        let state = match mode {
            OpenMode::Read => {
                HandleState::OpenRead(open_read(&object, &context, &capabilities, options)?)
            }
            _ => HandleState::OpenWriteClean(open_write(
                &object,
                &context,
                &capabilities,
                options,
                mode,
            )?),
        };

        let flush_behavior = match &state {
            HandleState::OpenWriteClean(session) => Some(match session.strategy {
                WriteStrategy::Multipart => FlushBehavior::UploadsPart,
                WriteStrategy::SingleShot => FlushBehavior::DeferredUntilClose,
                WriteStrategy::Append => FlushBehavior::Appends,
            }),
            _ => None,
        };

        tracing::debug!(object = %object, mode = %mode, "opened handle");
        Ok(Self {
            object,
            mode,
            flush_behavior,
            context,
            state,
        })
    }

    /// Full path of the object
    pub fn name(&self) -> String {
        self.object.url()
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// What `flush()` does; `None` for read handles
    pub fn flush_behavior(&self) -> Option<FlushBehavior> {
        self.flush_behavior
    }

    /// Object size for readers, end of the written data for writers
    pub fn len(&self) -> u64 {
        match &self.state {
            HandleState::OpenRead(window) => window.size,
            HandleState::OpenWriteClean(s) | HandleState::OpenWriteDirty(s) => s.position,
            HandleState::Failed { .. } | HandleState::Closed => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, HandleState::Closed)
    }

    /// Current position
    pub fn tell(&self) -> Result<u64> {
        match &self.state {
            HandleState::OpenRead(window) => Ok(window.position),
            HandleState::OpenWriteClean(s) | HandleState::OpenWriteDirty(s) => Ok(s.position),
            other => Err(other.refuse("tell", &self.object)),
        }
    }

    /// Commit buffered data and release the handle
    ///
    /// A failing commit aborts any multipart upload and leaves the handle
    /// failed; closing it again reports [`Error::HandleFailed`]. Closing a
    /// closed handle is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, HandleState::Closed) {
            HandleState::Closed | HandleState::OpenRead(_) => Ok(()),
            HandleState::Failed { reason } => {
                self.state = HandleState::Failed {
                    reason: reason.clone(),
                };
                Err(Error::HandleFailed(reason))
            }
            HandleState::OpenWriteClean(mut session) | HandleState::OpenWriteDirty(mut session) => {
                let result = commit_session(&self.object, &self.context, &mut session);
                self.context.cache.invalidate(&self.object);
                match result {
                    Ok(()) => {
                        tracing::debug!(object = %self.object, size = session.position, "committed");
                        Ok(())
                    }
                    Err(err) => {
                        abort_session(&self.object, &self.context, session);
                        self.state = HandleState::Failed {
                            reason: err.to_string(),
                        };
                        Err(err)
                    }
                }
            }
        }
    }

    /// Discard buffered data and any in-progress upload without committing
    pub fn abort(&mut self) {
        match std::mem::replace(&mut self.state, HandleState::Closed) {
            HandleState::OpenWriteClean(session) | HandleState::OpenWriteDirty(session) => {
                tracing::debug!(object = %self.object, "aborting write handle");
                abort_session(&self.object, &self.context, session);
                self.context.cache.invalidate(&self.object);
            }
            HandleState::Failed { reason } => {
                self.state = HandleState::Failed { reason };
            }
            HandleState::OpenRead(_) | HandleState::Closed => {}
        }
    }

    fn fill_window(&mut self) -> Result<&[u8]> {
        match &mut self.state {
            HandleState::OpenRead(window) => {
                if !window.contains(window.position) && window.position < window.size {
                    fetch_window(&self.object, &self.context, window)?;
                }
                Ok(window.buffered())
            }
            other => Err(other.refuse("read", &self.object)),
        }
    }

    fn consume_window(&mut self, amount: usize) {
        if let HandleState::OpenRead(window) = &mut self.state {
            if window.contains(window.position) {
                window.position = (window.position + amount as u64).min(window.end());
            }
        }
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        let result = match &mut self.state {
            HandleState::OpenWriteClean(s) | HandleState::OpenWriteDirty(s) => {
                buffer_bytes(&self.object, &self.context, s, buf)
            }
            other => return Err(other.refuse("write", &self.object)),
        };
        self.finish_write_op(result)
    }

    fn flush_session(&mut self) -> Result<()> {
        let result = match &mut self.state {
            HandleState::OpenWriteClean(s) | HandleState::OpenWriteDirty(s) => {
                flush_buffer(&self.object, &self.context, s)
            }
            HandleState::OpenRead(_) => return Ok(()),
            other => return Err(other.refuse("flush", &self.object)),
        };
        self.finish_write_op(result)
    }

    fn finish_write_op(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                let state = std::mem::replace(&mut self.state, HandleState::Closed);
                self.state = state.settle();
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Abort the session and enter `Failed`
    fn fail(&mut self, err: Error) -> Error {
        let previous = std::mem::replace(
            &mut self.state,
            HandleState::Failed {
                reason: err.to_string(),
            },
        );
        tracing::debug!(object = %self.object, error = %err, "write handle failed");
        if let HandleState::OpenWriteClean(session) | HandleState::OpenWriteDirty(session) = previous
        {
            abort_session(&self.object, &self.context, session);
        }
        self.context.cache.invalidate(&self.object);
        err
    }

    fn seek_to(&mut self, target: SeekFrom) -> io::Result<u64> {
        match &mut self.state {
            HandleState::OpenRead(window) => {
                let position = seek_position(target, window.position, window.size)?;
                window.seek_to(position);
                Ok(position)
            }
            HandleState::OpenWriteClean(s) | HandleState::OpenWriteDirty(s) => {
                let position = seek_position(target, s.position, s.position)?;
                if position != s.position {
                    return Err(Error::UnsupportedMode(format!(
                        "seek on {}, which is open for writing",
                        self.object
                    ))
                    .into());
                }
                Ok(position)
            }
            other => Err(other.refuse("seek", &self.object).into()),
        }
    }
}

impl Read for ObjectFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_window()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume_window(n);
        Ok(n)
    }
}

impl BufRead for ObjectFile {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        Ok(self.fill_window()?)
    }

    fn consume(&mut self, amount: usize) {
        self.consume_window(amount);
    }
}

impl Write for ObjectFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.flush_session()?)
    }
}

impl Seek for ObjectFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seek_to(pos)
    }
}

impl Drop for ObjectFile {
    fn drop(&mut self) {
        if !matches!(
            self.state,
            HandleState::OpenWriteClean(_) | HandleState::OpenWriteDirty(_)
        ) {
            return;
        }

        if std::thread::panicking() {
            tracing::warn!(object = %self.object, "write handle dropped during panic, aborting");
            self.abort();
            return;
        }

        if let Err(err) = self.close() {
            tracing::warn!(object = %self.object, error = %err, "failed to commit handle on drop");
        }
    }
}

impl fmt::Debug for ObjectFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectFile")
            .field("object", &self.object.to_string())
            .field("mode", &self.mode)
            .field("state", &self.state.name())
            .finish()
    }
}

fn open_read(
    object: &ObjectRef,
    context: &HandleContext,
    capabilities: &DriverCapabilities,
    options: &OpenOptions,
) -> Result<ReadWindow> {
    let since = context.cache.generation();
    let info = context
        .executor
        .block_on(object.driver().stat(object.key()))?;
    if info.is_dir {
        return Err(Error::InvalidPath(format!("{object} is a directory")));
    }
    context.cache.insert(object, info.clone(), since);

    let buffer_size = options
        .buffer_size
        .or(capabilities.preferred_buffer_size)
        .unwrap_or(context.transfer.buffer_size)
        .max(1);

    Ok(ReadWindow {
        size: info.size,
        etag: info.etag,
        position: 0,
        start: 0,
        data: Vec::new(),
        buffer_size,
    })
}

fn open_write(
    object: &ObjectRef,
    context: &HandleContext,
    capabilities: &DriverCapabilities,
    options: &OpenOptions,
    mode: OpenMode,
) -> Result<WriteSession> {
    if mode == OpenMode::Append && !capabilities.append {
        return Err(Error::UnsupportedMode(format!(
            "'{}' storage cannot append to {object}",
            object.storage_name()
        )));
    }

    let existing = match mode {
        OpenMode::CreateNew | OpenMode::Append => {
            match context.executor.block_on(object.driver().stat(object.key())) {
                Ok(info) => Some(info),
                Err(Error::NotFound(_)) => None,
                Err(err) => return Err(err),
            }
        }
        OpenMode::Read | OpenMode::Write => None,
    };
    if mode == OpenMode::CreateNew && existing.is_some() {
        return Err(Error::AlreadyExists(object.to_string()));
    }
    // Appends continue from the end of the object.
    let position = existing.map_or(0, |info| info.size);

    context.cache.invalidate(object);

    let strategy = match mode {
        OpenMode::Append => WriteStrategy::Append,
        _ if capabilities.multipart => WriteStrategy::Multipart,
        _ => WriteStrategy::SingleShot,
    };
    let min_part_size = usize::try_from(capabilities.min_part_size).unwrap_or(usize::MAX);
    let part_size = options
        .part_size
        .unwrap_or(context.transfer.part_size)
        .max(min_part_size)
        .max(1);
    let concurrency = options
        .upload_concurrency
        .unwrap_or(context.transfer.upload_concurrency)
        .max(1);

    Ok(WriteSession {
        strategy,
        buffer: Vec::new(),
        part_size,
        min_part_size,
        concurrency,
        position,
        upload: None,
    })
}

fn seek_position(target: SeekFrom, current: u64, end: u64) -> io::Result<u64> {
    let (base, offset) = match target {
        SeekFrom::Start(position) => return Ok(position),
        SeekFrom::Current(offset) => (current, offset),
        SeekFrom::End(offset) => (end, offset),
    };
    base.checked_add_signed(offset).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid seek to a negative or overflowing position",
        )
    })
}

/// Replace the window with the bytes at the current position
fn fetch_window(object: &ObjectRef, context: &HandleContext, window: &mut ReadWindow) -> Result<()> {
    let start = window.position;
    let end = start.saturating_add(window.buffer_size as u64).min(window.size);
    tracing::debug!(object = %object, start, end, "fetching read window");

    let driver = object.driver();
    let key = object.key();
    let etag = window.etag.clone();
    let data = context.executor.block_on(with_retry(&context.retry, "get_range", || {
        driver.get_range(key, start..end, etag.clone())
    }))?;

    let fetched = data.len() as u64;
    if fetched < end - start {
        tracing::debug!(object = %object, expected = end - start, fetched, "short read, treating as end of object");
        window.size = start + fetched;
    }
    window.start = start;
    window.data = data;
    Ok(())
}

fn buffer_bytes(
    object: &ObjectRef,
    context: &HandleContext,
    session: &mut WriteSession,
    buf: &[u8],
) -> Result<()> {
    session.buffer.extend_from_slice(buf);
    session.position += buf.len() as u64;

    match session.strategy {
        WriteStrategy::Multipart => {
            while session.buffer.len() >= session.part_size {
                let rest = session.buffer.split_off(session.part_size);
                let part = std::mem::replace(&mut session.buffer, rest);
                start_part(object, context, session, part)?;
            }
            Ok(())
        }
        WriteStrategy::Append if session.buffer.len() >= session.part_size => {
            append_buffer(object, context, session)
        }
        WriteStrategy::Append | WriteStrategy::SingleShot => Ok(()),
    }
}

fn flush_buffer(object: &ObjectRef, context: &HandleContext, session: &mut WriteSession) -> Result<()> {
    match session.strategy {
        WriteStrategy::Multipart => {
            // Parts below the backend minimum may only be the last one.
            if !session.buffer.is_empty() && session.buffer.len() >= session.min_part_size {
                let part = std::mem::take(&mut session.buffer);
                start_part(object, context, session, part)?;
            }
            match session.upload.as_mut() {
                Some(upload) => drain_parts(context, upload),
                None => Ok(()),
            }
        }
        WriteStrategy::Append if !session.buffer.is_empty() => {
            append_buffer(object, context, session)
        }
        WriteStrategy::Append | WriteStrategy::SingleShot => Ok(()),
    }
}

fn commit_session(object: &ObjectRef, context: &HandleContext, session: &mut WriteSession) -> Result<()> {
    match session.strategy {
        WriteStrategy::Append => {
            if session.buffer.is_empty() {
                Ok(())
            } else {
                append_buffer(object, context, session)
            }
        }
        WriteStrategy::SingleShot => put_buffer(object, context, session),
        WriteStrategy::Multipart => {
            if session.upload.is_some() && !session.buffer.is_empty() {
                let part = std::mem::take(&mut session.buffer);
                start_part(object, context, session, part)?;
            }
            let Some(upload) = session.upload.as_mut() else {
                return put_buffer(object, context, session);
            };

            drain_parts(context, upload)?;
            let mut parts = upload.completed.clone();
            parts.sort_by_key(|part| part.part_number);
            tracing::debug!(
                object = %object,
                upload_id = %upload.upload_id,
                parts = parts.len(),
                "completing multipart upload"
            );
            context.executor.block_on(object.driver().complete_multipart(
                object.key(),
                &upload.upload_id,
                parts,
            ))
        }
    }
}

fn put_buffer(object: &ObjectRef, context: &HandleContext, session: &mut WriteSession) -> Result<()> {
    let data = std::mem::take(&mut session.buffer);
    tracing::debug!(object = %object, bytes = data.len(), "uploading object");
    context
        .executor
        .block_on(object.driver().put(object.key(), data))
}

fn append_buffer(object: &ObjectRef, context: &HandleContext, session: &mut WriteSession) -> Result<()> {
    let data = std::mem::take(&mut session.buffer);
    tracing::debug!(object = %object, bytes = data.len(), "appending");
    context
        .executor
        .block_on(object.driver().append(object.key(), data))
}

/// Hand one part to the runtime, creating the upload on first use
fn start_part(
    object: &ObjectRef,
    context: &HandleContext,
    session: &mut WriteSession,
    data: Vec<u8>,
) -> Result<()> {
    if session.upload.is_none() {
        let upload_id = context
            .executor
            .block_on(object.driver().create_multipart(object.key()))?;
        tracing::debug!(object = %object, upload_id = %upload_id, "created multipart upload");
        session.upload = Some(MultipartUpload::new(upload_id));
    }
    let concurrency = session.concurrency;
    let Some(upload) = session.upload.as_mut() else {
        return Err(Error::General(format!("no multipart upload for {object}")));
    };

    while upload.in_flight.len() >= concurrency {
        let Some(task) = upload.in_flight.pop_front() else {
            break;
        };
        let part = context.executor.block_on(join_part(task))?;
        upload.completed.push(part);
    }

    let part_number = upload.next_part;
    upload.next_part += 1;
    tracing::debug!(object = %object, part_number, bytes = data.len(), "uploading part");

    let driver = object.driver().clone();
    let key = object.key().to_string();
    let upload_id = upload.upload_id.clone();
    let task = context.executor.spawn(async move {
        driver.upload_part(&key, &upload_id, part_number, data).await
    });
    upload.in_flight.push_back(task);
    Ok(())
}

async fn join_part(task: JoinHandle<Result<CompletedPart>>) -> Result<CompletedPart> {
    task.await
        .map_err(|e| Error::General(format!("part upload task failed: {e}")))?
}

/// Wait for every in-flight part
fn drain_parts(context: &HandleContext, upload: &mut MultipartUpload) -> Result<()> {
    if upload.in_flight.is_empty() {
        return Ok(());
    }
    let tasks: Vec<_> = upload.in_flight.drain(..).map(join_part).collect();
    let parts = context.executor.block_on(async move {
        let results = futures::future::join_all(tasks).await;
        results.into_iter().collect::<Result<Vec<_>>>()
    })?;
    upload.completed.extend(parts);
    Ok(())
}

/// Best-effort abort of the session's multipart upload
fn abort_session(object: &ObjectRef, context: &HandleContext, session: WriteSession) {
    let Some(mut upload) = session.upload else {
        return;
    };

    if !upload.in_flight.is_empty() {
        let tasks: Vec<_> = upload.in_flight.drain(..).collect();
        let _ = context.executor.block_on(async move {
            futures::future::join_all(tasks).await;
            Ok(())
        });
    }

    match context
        .executor
        .block_on(object.driver().abort_multipart(object.key(), &upload.upload_id))
    {
        Ok(()) => {
            tracing::debug!(object = %object, upload_id = %upload.upload_id, "aborted multipart upload");
        }
        Err(err) => {
            tracing::warn!(
                object = %object,
                upload_id = %upload.upload_id,
                error = %err,
                "failed to abort multipart upload"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::MemoryDriver;
    use crate::registry::MountEntry;
    use crate::traits::{MockStorageDriver, ObjectInfo, StorageDriver};

    fn context(part_size: usize, concurrency: usize) -> Arc<HandleContext> {
        Arc::new(HandleContext {
            cache: Arc::new(MetadataCache::new(Duration::from_secs(5))),
            executor: Executor::owned(Some(2)).unwrap(),
            transfer: TransferConfig {
                buffer_size: 4,
                part_size,
                upload_concurrency: concurrency,
                cache_ttl_ms: 5000,
            },
            retry: RetryConfig::none(),
        })
    }

    fn object(driver: Arc<dyn StorageDriver>) -> ObjectRef {
        ObjectRef::mounted(MountEntry::detached("mock://", "mock", driver), "key")
    }

    fn multipart_mock() -> MockStorageDriver {
        let mut mock = MockStorageDriver::new();
        mock.expect_capabilities().returning(|| DriverCapabilities {
            multipart: true,
            append: false,
            min_part_size: 0,
            preferred_buffer_size: None,
        });
        mock.expect_create_multipart()
            .times(1)
            .returning(|_| Ok("upload-1".to_string()));
        mock
    }

    #[test]
    fn test_parse_modes() {
        for mode in ["r", "rb", "rt"] {
            assert_eq!(OpenMode::parse(mode).unwrap(), OpenMode::Read);
        }
        assert_eq!("wb".parse::<OpenMode>().unwrap(), OpenMode::Write);
        assert_eq!("at".parse::<OpenMode>().unwrap(), OpenMode::Append);
        assert_eq!("x".parse::<OpenMode>().unwrap(), OpenMode::CreateNew);
        for bad in ["", "r+", "rw", "wx", "R"] {
            assert!(matches!(OpenMode::parse(bad), Err(Error::InvalidMode(_))));
        }
    }

    #[test]
    fn test_failed_part_aborts_upload() {
        let mut mock = multipart_mock();
        mock.expect_upload_part()
            .returning(|_, _, _, _| Err(Error::BackendUnavailable("connection reset".into())));
        mock.expect_abort_multipart()
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_complete_multipart().times(0);
        mock.expect_put().times(0);

        let mut file =
            ObjectFile::open(object(Arc::new(mock)), OpenMode::Write, &OpenOptions::new(), context(4, 1))
                .unwrap();

        file.write_all(b"abcd").unwrap();
        let err = file.write_all(b"efgh").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);

        match file.close() {
            Err(Error::HandleFailed(reason)) => assert!(reason.contains("connection reset")),
            other => panic!("expected HandleFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_commit_aborts_upload() {
        let mut mock = multipart_mock();
        mock.expect_upload_part().returning(|_, _, n, _| {
            Ok(CompletedPart {
                part_number: n,
                etag: format!("e{n}"),
            })
        });
        mock.expect_complete_multipart()
            .times(1)
            .returning(|_, _, _| Err(Error::PermissionDenied("bucket policy".into())));
        mock.expect_abort_multipart()
            .times(1)
            .returning(|_, _| Err(Error::BackendUnavailable("abort lost".into())));

        let mut file =
            ObjectFile::open(object(Arc::new(mock)), OpenMode::Write, &OpenOptions::new(), context(4, 2))
                .unwrap();
        file.write_all(b"0123456789").unwrap();

        assert!(matches!(file.close(), Err(Error::PermissionDenied(_))));
        assert!(matches!(file.close(), Err(Error::HandleFailed(_))));
        assert!(matches!(
            file.write(b"more").map_err(|e| e.kind()),
            Err(io::ErrorKind::Other)
        ));
    }

    #[test]
    fn test_parts_are_completed_in_order() {
        let mut mock = multipart_mock();
        mock.expect_upload_part().times(3).returning(|_, _, n, data| {
            std::thread::sleep(Duration::from_millis(10 * (4 - n as u64)));
            Ok(CompletedPart {
                part_number: n,
                etag: format!("{n}:{}", data.len()),
            })
        });
        mock.expect_complete_multipart()
            .times(1)
            .withf(|_, id, parts| {
                id == "upload-1"
                    && parts.iter().map(|p| p.etag.as_str()).collect::<Vec<_>>() == ["1:4", "2:4", "3:2"]
            })
            .returning(|_, _, _| Ok(()));

        let mut file =
            ObjectFile::open(object(Arc::new(mock)), OpenMode::Write, &OpenOptions::new(), context(4, 3))
                .unwrap();
        file.write_all(b"0123456789").unwrap();
        file.close().unwrap();
        assert!(file.is_closed());
    }

    #[test]
    fn test_small_object_is_single_put() {
        let mut mock = MockStorageDriver::new();
        mock.expect_capabilities().returning(|| DriverCapabilities {
            multipart: true,
            ..Default::default()
        });
        mock.expect_create_multipart().times(0);
        mock.expect_put()
            .times(1)
            .withf(|key, data| key == "key" && *data == b"tiny")
            .returning(|_, _| Ok(()));

        let mut file =
            ObjectFile::open(object(Arc::new(mock)), OpenMode::Write, &OpenOptions::new(), context(64, 2))
                .unwrap();
        file.write_all(b"tiny").unwrap();
        assert_eq!(file.flush_behavior(), Some(FlushBehavior::UploadsPart));
        drop(file);
    }

    #[test]
    fn test_stale_read_surfaces() {
        let mut mock = MockStorageDriver::new();
        mock.expect_capabilities().returning(DriverCapabilities::default);
        mock.expect_stat().returning(|key| {
            let mut info = ObjectInfo::file(key, 10);
            info.etag = Some("v1".into());
            Ok(info)
        });
        mock.expect_get_range()
            .withf(|_, _, if_match| if_match.as_deref() == Some("v1"))
            .returning(|key, _, _| Err(Error::StaleRead(key.to_string())));

        let mut file =
            ObjectFile::open(object(Arc::new(mock)), OpenMode::Read, &OpenOptions::new(), context(4, 1))
                .unwrap();
        let mut buf = [0u8; 4];
        let err = file.read(&mut buf).unwrap_err();
        let inner = err.get_ref().and_then(|e| e.downcast_ref::<Error>());
        assert!(matches!(inner, Some(Error::StaleRead(_))));
    }

    #[test]
    fn test_drop_during_panic_aborts() {
        let driver = Arc::new(MemoryDriver::new());
        let ctx = context(4, 2);
        let target = object(driver.clone());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut file =
                ObjectFile::open(target.clone(), OpenMode::Write, &OpenOptions::new(), ctx.clone())
                    .unwrap();
            file.write_all(b"0123456789").unwrap();
            panic!("caller bug");
        }));

        assert!(result.is_err());
        assert!(!driver.contains("key"));
        assert_eq!(driver.pending_uploads(), 0);
        assert_eq!(driver.stats().abort_multipart, 1);
        assert_eq!(driver.stats().complete_multipart, 0);
    }

    #[test]
    fn test_write_seek_only_to_current_position() {
        let driver = Arc::new(MemoryDriver::new());
        let mut file =
            ObjectFile::open(object(driver), OpenMode::Write, &OpenOptions::new(), context(64, 1)).unwrap();
        file.write_all(b"abc").unwrap();

        assert_eq!(file.seek(SeekFrom::Current(0)).unwrap(), 3);
        assert_eq!(file.seek(SeekFrom::End(0)).unwrap(), 3);
        let err = file.seek(SeekFrom::Start(0)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        file.close().unwrap();
    }

    #[test]
    fn test_abort_discards_data() {
        let driver = Arc::new(MemoryDriver::new());
        let mut file =
            ObjectFile::open(object(driver.clone()), OpenMode::Write, &OpenOptions::new(), context(4, 1))
                .unwrap();
        file.write_all(b"0123456789").unwrap();
        file.abort();

        assert!(file.is_closed());
        assert!(!driver.contains("key"));
        assert_eq!(driver.pending_uploads(), 0);
        assert!(matches!(file.tell(), Err(Error::ClosedHandle(_))));
    }

    #[test]
    fn test_state_transitions() {
        let driver = Arc::new(MemoryDriver::with_capabilities(DriverCapabilities::default()));
        let mut file =
            ObjectFile::open(object(driver.clone()), OpenMode::Write, &OpenOptions::new(), context(4, 1))
                .unwrap();
        assert_eq!(file.state.name(), "open-write-clean");
        assert_eq!(file.flush_behavior(), Some(FlushBehavior::DeferredUntilClose));

        file.write_all(b"data").unwrap();
        assert_eq!(file.state.name(), "open-write-dirty");
        file.flush().unwrap();
        assert_eq!(file.state.name(), "open-write-dirty");
        assert!(!driver.contains("key"));

        file.close().unwrap();
        assert_eq!(file.state.name(), "closed");
        assert_eq!(driver.get("key").unwrap(), b"data");
    }
}
