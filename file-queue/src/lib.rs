//! Durable file-backed queue for the order queue.
//!
//! Every message is one JSON file under a queue directory:
//!
//! ```text
//! <root>/
//!   tmp/         staging area; every write lands here first, then is renamed
//!   pending/     available messages, claimed in file-name (enqueue) order
//!   inflight/    claimed messages with a lease
//!   deadletter/  parked messages, never consumed
//!   index/       one marker per live message id (duplicate detection)
//! ```
//!
//! # Delivery Semantics
//!
//! - **Claiming is a rename** from `pending/` to `inflight/`. A rename succeeds
//!   for exactly one caller, so several processes can share a directory. The
//!   in-flight name carries the claim time, so a claim is never mistaken for an
//!   abandoned one before its lease has had a chance to run out.
//! - **Never delete-on-read**: a message file is only removed by `complete`.
//! - **Crash recovery**: a file whose lease expired is renamed back to
//!   `pending/` by the next `receive` or at `open`. Its delivery
//!   count keeps growing, so redelivery is visible to the consumer.
//! - **Writes are atomic**: content is written and synced in `tmp/`, then renamed
//!   into place.
//! - **Duplicate detection** is best effort: a marker in `index/` whose message is
//!   no longer in `pending/` or `inflight/` (a producer died mid-send) does not
//!   block a resend.
//!
//! # Example
//!
//! ```no_run
//! use order_queue_file::FileQueue;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = FileQueue::builder("/var/lib/orders")
//!     .lock_duration(Duration::from_secs(60))
//!     .poll_interval(Duration::from_millis(200))
//!     .open()
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod envelope;

use chrono::{DateTime, Utc};
use envelope::Envelope;
use order_queue_core::message::{
    DeadLetterReason, DeadLetteredMessage, LockToken, OutboundMessage, ReceivedMessage,
};
use order_queue_core::queue::{QueueBackend, QueueError, QueueFuture};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

const TMP_DIR: &str = "tmp";
const PENDING_DIR: &str = "pending";
const INFLIGHT_DIR: &str = "inflight";
const DEAD_LETTER_DIR: &str = "deadletter";
const INDEX_DIR: &str = "index";

const MESSAGE_EXTENSION: &str = "json";

/// Default lease on a claimed message.
pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(60);

/// Default delay between directory scans while waiting for a message.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Encode a message id so it is safe as a file name component.
fn file_safe(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Split a lock token into file name and delivery generation.
fn parse_token(token: &LockToken) -> Option<(&str, u32)> {
    let (name, generation) = token.as_str().rsplit_once('#')?;
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return None;
    }
    Some((name, generation.parse().ok()?))
}

/// Message id part of a `pending/` file name (`<micros>-<seq>-<id>.json`).
fn pending_id_part(name: &str) -> Option<&str> {
    let (_, rest) = name.split_once('-')?;
    let (_, id) = rest.split_once('-')?;
    id.strip_suffix(&format!(".{MESSAGE_EXTENSION}"))
}

/// Claim time and original `pending/` name of an `inflight/` file
/// (`<claim micros>-<pending name>`).
fn parse_claimed(name: &str) -> Option<(DateTime<Utc>, &str)> {
    let (claimed, original) = name.split_once('-')?;
    let claimed = DateTime::<Utc>::from_timestamp_micros(claimed.parse().ok()?)?;
    Some((claimed, original))
}

fn claimed_name(claimed_at: DateTime<Utc>, pending_name: &str) -> String {
    format!("{:020}-{pending_name}", claimed_at.timestamp_micros().max(0))
}

fn lease_expiry(now: DateTime<Utc>, lock_duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lock_duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Sorted message file names in `dir`.
async fn list_messages(dir: &Path) -> Result<Vec<String>, QueueError> {
    let mut entries = fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == MESSAGE_EXTENSION) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

async fn remove_if_present(path: &Path) -> Result<(), QueueError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// A message currently held under a lock token.
struct Held {
    path: PathBuf,
    envelope: Envelope,
}

/// File-backed queue backend.
///
/// Cheap to share behind an `Arc`; all state lives on disk apart from the
/// `closed` flag and a sequence counter used to order same-microsecond sends.
#[derive(Debug)]
pub struct FileQueue {
    root: PathBuf,
    lock_duration: Duration,
    poll_interval: Duration,
    sequence: AtomicU64,
    closed: AtomicBool,
}

impl FileQueue {
    /// Create a builder rooted at `path`.
    #[must_use]
    pub fn builder(path: impl Into<PathBuf>) -> FileQueueBuilder {
        FileQueueBuilder {
            path: path.into(),
            lock_duration: None,
            poll_interval: None,
        }
    }

    /// Open (creating if needed) a queue at `path` with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Io`] if the directory layout cannot be created.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        Self::builder(path).open().await
    }

    /// Queue root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }

    fn marker_path(&self, message_id: &str) -> PathBuf {
        self.dir(INDEX_DIR).join(file_safe(message_id))
    }

    /// File name for a message entering `pending/` now. Names sort in enqueue order.
    fn next_file_name(&self, message_id: &str) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!(
            "{:020}-{seq:010}-{}.{MESSAGE_EXTENSION}",
            Utc::now().timestamp_micros().max(0),
            file_safe(message_id)
        )
    }

    /// Write `bytes` to `dest` through `tmp/`.
    async fn write_atomic(&self, dest: &Path, bytes: &[u8]) -> Result<(), QueueError> {
        let tmp = self.dir(TMP_DIR).join(format!("{}.tmp", uuid::Uuid::new_v4()));
        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, dest).await
        }
        .await;
        if let Err(e) = written {
            if let Err(cleanup) = remove_if_present(&tmp).await {
                tracing::warn!(file = %tmp.display(), error = %cleanup, "Staging file left behind");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Replace an in-flight file, refusing to re-create it once it has gone.
    ///
    /// A file that vanished was recovered or settled elsewhere, so the caller no
    /// longer holds it.
    async fn rewrite_held(&self, path: &Path, bytes: &[u8]) -> Result<(), QueueError> {
        let tmp = self.dir(TMP_DIR).join(format!("{}.tmp", uuid::Uuid::new_v4()));
        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::metadata(path).await?;
            fs::rename(&tmp, path).await
        }
        .await;
        match written {
            Ok(()) => Ok(()),
            Err(e) => {
                remove_if_present(&tmp).await?;
                if e.kind() == ErrorKind::NotFound {
                    Err(QueueError::LockLost(format!(
                        "{} is no longer in flight",
                        path.display()
                    )))
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Lease end of an in-flight file: the later of its claim time plus the lock
    /// duration and any lease written into it.
    fn held_until(&self, claimed_at: DateTime<Utc>, envelope: Option<&Envelope>) -> DateTime<Utc> {
        let claim_lease = lease_expiry(claimed_at, self.lock_duration);
        envelope
            .and_then(|e| e.locked_until)
            .map_or(claim_lease, |written| written.max(claim_lease))
    }

    /// Whether a live message with this id sits in `pending/` or `inflight/`.
    async fn is_live(&self, message_id: &str) -> Result<bool, QueueError> {
        let id = file_safe(message_id);
        let pending = list_messages(&self.dir(PENDING_DIR)).await?;
        if pending.iter().any(|n| pending_id_part(n) == Some(id.as_str())) {
            return Ok(true);
        }
        let inflight = list_messages(&self.dir(INFLIGHT_DIR)).await?;
        Ok(inflight.iter().any(|n| {
            parse_claimed(n).and_then(|(_, original)| pending_id_part(original)) == Some(id.as_str())
        }))
    }

    /// Move in-flight messages whose lease expired back to `pending/`.
    ///
    /// Returns how many messages were released.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Io`] if the directories cannot be read.
    pub async fn recover(&self) -> Result<usize, QueueError> {
        let now = Utc::now();
        let mut released = 0;

        for name in list_messages(&self.dir(INFLIGHT_DIR)).await? {
            let path = self.dir(INFLIGHT_DIR).join(&name);
            let Some((claimed_at, original)) = parse_claimed(&name) else {
                tracing::warn!(file = %name, "Unrecognised in-flight file left alone");
                continue;
            };
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let envelope = Envelope::from_bytes(&bytes).ok();
            if self.held_until(claimed_at, envelope.as_ref()) > now {
                continue;
            }

            match fs::rename(&path, self.dir(PENDING_DIR).join(original)).await {
                Ok(()) => {
                    released += 1;
                    tracing::info!(file = %name, "Lease expired, message returned to pending");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(released)
    }

    /// Park an unreadable file so it stops being claimed.
    async fn quarantine(&self, path: &Path, name: &str, error: &QueueError) -> Result<(), QueueError> {
        tracing::error!(file = %name, error = %error, "Unreadable queue file moved to dead-letter");
        match fs::rename(path, self.dir(DEAD_LETTER_DIR).join(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Claim the oldest pending message, if any.
    async fn try_claim(&self) -> Result<Option<ReceivedMessage>, QueueError> {
        self.recover().await?;

        for pending_name in list_messages(&self.dir(PENDING_DIR)).await? {
            let claimed_at = Utc::now();
            let name = claimed_name(claimed_at, &pending_name);
            let path = self.dir(INFLIGHT_DIR).join(&name);
            match fs::rename(self.dir(PENDING_DIR).join(&pending_name), &path).await {
                Ok(()) => {}
                // Claimed by someone else
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }

            let bytes = fs::read(&path).await?;
            let mut envelope = match Envelope::from_bytes(&bytes) {
                Ok(envelope) => envelope,
                Err(e) => {
                    self.quarantine(&path, &name, &e).await?;
                    continue;
                }
            };
            envelope.delivery_count = envelope.delivery_count.saturating_add(1);
            envelope.locked_until = Some(lease_expiry(claimed_at, self.lock_duration));

            let token = LockToken::new(format!("{name}#{}", envelope.delivery_count));
            let received = match envelope.to_received(token) {
                Ok(received) => received,
                Err(e) => {
                    self.quarantine(&path, &name, &e).await?;
                    continue;
                }
            };
            match self.rewrite_held(&path, &envelope.to_bytes()?).await {
                Ok(()) => return Ok(Some(received)),
                Err(QueueError::LockLost(_)) => {
                    tracing::warn!(file = %name, "Claim recovered before its lease was written");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Resolve a lock token to the in-flight file it names.
    async fn held(&self, token: &LockToken) -> Result<Held, QueueError> {
        let lost = || QueueError::LockLost(format!("unknown or stale lock token {token}"));
        let (name, generation) = parse_token(token).ok_or_else(lost)?;

        let path = self.dir(INFLIGHT_DIR).join(name);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(lost()),
            Err(e) => return Err(e.into()),
        };
        let envelope = Envelope::from_bytes(&bytes)?;
        if envelope.delivery_count != generation {
            return Err(lost());
        }
        if envelope.locked_until.is_some_and(|until| until <= Utc::now()) {
            return Err(QueueError::LockLost(format!("lease expired for {token}")));
        }
        Ok(Held { path, envelope })
    }

    /// Messages parked in `deadletter/`, oldest enqueue first.
    ///
    /// Files that cannot be read back are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Io`] if the directory cannot be read.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetteredMessage>, QueueError> {
        let mut parked = Vec::new();
        for name in list_messages(&self.dir(DEAD_LETTER_DIR)).await? {
            let bytes = fs::read(self.dir(DEAD_LETTER_DIR).join(&name)).await?;
            match Envelope::from_bytes(&bytes).and_then(|e| e.to_dead_lettered()) {
                Ok(Some(message)) => parked.push(message),
                Ok(None) => tracing::warn!(file = %name, "Quarantined file has no dead-letter record"),
                Err(e) => tracing::warn!(file = %name, error = %e, "Skipping unreadable dead-letter file"),
            }
        }
        Ok(parked)
    }
}

impl QueueBackend for FileQueue {
    fn name(&self) -> &'static str {
        "file"
    }

    fn send(&self, message: OutboundMessage) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            self.ensure_open()?;

            let marker = self.marker_path(&message.message_id);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&marker)
                .await
            {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.is_live(&message.message_id).await? {
                        tracing::debug!(message_id = %message.message_id, "Duplicate message id, send ignored");
                        return Ok(());
                    }
                    tracing::warn!(message_id = %message.message_id, "Stale duplicate marker, sending again");
                }
                Err(e) => return Err(e.into()),
            }

            let name = self.next_file_name(&message.message_id);
            let written = match Envelope::from_outbound(&message, Utc::now()).to_bytes() {
                Ok(bytes) => {
                    self.write_atomic(&self.dir(PENDING_DIR).join(&name), &bytes)
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                if let Err(cleanup) = remove_if_present(&marker).await {
                    tracing::warn!(message_id = %message.message_id, error = %cleanup, "Duplicate marker left behind");
                }
                return Err(e);
            }

            tracing::debug!(message_id = %message.message_id, file = %name, "Message written");
            Ok(())
        })
    }

    fn receive(&self, timeout: Duration) -> QueueFuture<'_, Option<ReceivedMessage>> {
        Box::pin(async move {
            let deadline = Instant::now() + timeout;
            loop {
                self.ensure_open()?;
                if let Some(message) = self.try_claim().await? {
                    return Ok(Some(message));
                }
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
            }
        })
    }

    fn complete<'a>(&'a self, message: &'a ReceivedMessage) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            let held = self.held(&message.lock_token).await?;
            match fs::remove_file(&held.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(QueueError::LockLost(format!(
                        "message {} already settled",
                        message.message_id
                    )));
                }
                Err(e) => return Err(e.into()),
            }
            remove_if_present(&self.marker_path(&held.envelope.message_id)).await
        })
    }

    fn abandon<'a>(&'a self, message: &'a ReceivedMessage) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            let Held { path, mut envelope } = self.held(&message.lock_token).await?;
            envelope.locked_until = None;
            self.rewrite_held(&path, &envelope.to_bytes()?).await?;

            let requeued = self.next_file_name(&envelope.message_id);
            fs::rename(&path, self.dir(PENDING_DIR).join(requeued)).await?;
            Ok(())
        })
    }

    fn dead_letter<'a>(
        &'a self,
        message: &'a ReceivedMessage,
        reason: &'a DeadLetterReason,
    ) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            let Held { path, mut envelope } = self.held(&message.lock_token).await?;
            envelope.park(reason, Utc::now());
            self.rewrite_held(&path, &envelope.to_bytes()?).await?;

            let name = path
                .file_name()
                .map(std::ffi::OsStr::to_os_string)
                .ok_or_else(|| QueueError::Other("in-flight path has no file name".into()))?;
            fs::rename(&path, self.dir(DEAD_LETTER_DIR).join(name)).await?;
            remove_if_present(&self.marker_path(&envelope.message_id)).await?;

            tracing::warn!(message_id = %envelope.message_id, reason = %reason, "Message dead-lettered");
            Ok(())
        })
    }

    fn renew_lock<'a>(
        &'a self,
        message: &'a ReceivedMessage,
    ) -> QueueFuture<'a, Option<DateTime<Utc>>> {
        Box::pin(async move {
            self.ensure_open()?;
            let Held { path, mut envelope } = self.held(&message.lock_token).await?;
            let locked_until = lease_expiry(Utc::now(), self.lock_duration);
            envelope.locked_until = Some(locked_until);
            self.rewrite_held(&path, &envelope.to_bytes()?).await?;
            Ok(Some(locked_until))
        })
    }

    fn approximate_count(&self) -> QueueFuture<'_, Option<u64>> {
        Box::pin(async move {
            self.ensure_open()?;
            let pending = list_messages(&self.dir(PENDING_DIR)).await?.len();
            Ok(Some(u64::try_from(pending).unwrap_or(u64::MAX)))
        })
    }

    fn close(&self) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Builder for [`FileQueue`].
#[derive(Debug, Clone)]
pub struct FileQueueBuilder {
    path: PathBuf,
    lock_duration: Option<Duration>,
    poll_interval: Option<Duration>,
}

impl FileQueueBuilder {
    /// Lease on claimed messages (default: 60 s).
    #[must_use]
    pub const fn lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = Some(lock_duration);
        self
    }

    /// Delay between scans while `receive` waits (default: 200 ms).
    #[must_use]
    pub const fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }

    /// Create the directory layout, clear `tmp/` and release expired leases.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Configuration`] for a zero lock duration or poll
    /// interval, and [`QueueError::Io`] if the directories cannot be prepared.
    pub async fn open(self) -> Result<FileQueue, QueueError> {
        let lock_duration = self.lock_duration.unwrap_or(DEFAULT_LOCK_DURATION);
        let poll_interval = self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
        if lock_duration.is_zero() {
            return Err(QueueError::Configuration("lock duration must be > 0".into()));
        }
        if poll_interval.is_zero() {
            return Err(QueueError::Configuration("poll interval must be > 0".into()));
        }

        for dir in [TMP_DIR, PENDING_DIR, INFLIGHT_DIR, DEAD_LETTER_DIR, INDEX_DIR] {
            fs::create_dir_all(self.path.join(dir)).await.map_err(|e| {
                QueueError::Configuration(format!(
                    "cannot create queue directory {}: {e}",
                    self.path.join(dir).display()
                ))
            })?;
        }

        let mut leftovers = fs::read_dir(self.path.join(TMP_DIR)).await?;
        while let Some(entry) = leftovers.next_entry().await? {
            remove_if_present(&entry.path()).await?;
        }

        let queue = FileQueue {
            root: self.path,
            lock_duration,
            poll_interval,
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        };
        let released = queue.recover().await?;
        tracing::info!(
            path = %queue.root.display(),
            lock_duration_secs = lock_duration.as_secs_f64(),
            released,
            "File queue opened"
        );
        Ok(queue)
    }
}
