//! Advisory lock markers shared by collection instances.
//!
//! A resource (metadata file, shard file, index resource) is locked by
//! writing a sibling marker `<resource>.block` that records the owner's
//! instance id and a timestamp:
//!
//! ```text
//! <collection>/
//! ├─ meta
//! ├─ meta.block        # "<owner uuid>\t<unix millis>"
//! ├─ data_0
//! └─ index_a
//! ```
//!
//! A resource is blocked for an instance iff a marker exists, it belongs to
//! another owner, and it is younger than the staleness threshold. Stale
//! markers are reclaimed, which means a holder slower than the threshold
//! can be pre-empted. Holders refresh their markers through [`KeepAlive`]
//! to keep that from happening during long operations.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

/// Suffix of lock marker files.
pub const MARKER_SUFFIX: &str = "block";

/// Source of the current time for marker timestamps.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> SystemTime;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    /// Creates a clock frozen at the current wall time.
    pub fn new() -> Self {
        Self::at(SystemTime::now())
    }

    /// Creates a clock frozen at `time`.
    pub fn at(time: SystemTime) -> Self {
        Self {
            now: Mutex::new(time),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock()
    }
}

/// Identity of a lock owner: an instance id plus the clock it stamps with.
#[derive(Debug, Clone)]
pub struct LockOwner {
    id: Uuid,
    clock: Arc<dyn Clock>,
}

impl LockOwner {
    /// Creates an owner with a fresh random id and the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an owner with a fresh random id and the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            id: Uuid::new_v4(),
            clock,
        }
    }

    /// Returns the instance id written into markers.
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn now_millis(&self) -> u64 {
        to_millis(self.clock.now())
    }
}

impl Default for LockOwner {
    fn default() -> Self {
        Self::new()
    }
}

/// Parsed content of a marker file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    /// Owner instance id.
    pub owner: Uuid,
    /// Time the marker was written, in milliseconds since the epoch.
    pub stamped_at: u64,
}

impl Marker {
    fn encode(&self) -> String {
        format!("{}\t{}", self.owner, self.stamped_at)
    }

    fn decode(text: &str) -> Option<Self> {
        let (owner, stamp) = text.trim().split_once('\t')?;
        Some(Self {
            owner: owner.parse().ok()?,
            stamped_at: stamp.parse().ok()?,
        })
    }
}

/// Outcome of reading a marker.
enum MarkerState {
    Absent,
    Unreadable,
    Denied,
    Present(Marker),
}

/// Returns the marker path guarding `resource`.
pub fn marker_path(resource: &Path) -> PathBuf {
    let mut name: OsString = resource
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(MARKER_SUFFIX);
    resource.with_file_name(name)
}

/// Timeout-based mutual exclusion over named resources.
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    owner: LockOwner,
    stale_after: Duration,
    poll_interval: Duration,
    keep_alive_interval: Duration,
}

impl LockCoordinator {
    /// Creates a coordinator for `owner`.
    pub fn new(
        owner: LockOwner,
        stale_after: Duration,
        poll_interval: Duration,
        keep_alive_interval: Duration,
    ) -> Self {
        Self {
            owner,
            stale_after,
            poll_interval,
            keep_alive_interval,
        }
    }

    /// Returns the owner this coordinator acts for.
    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    /// Reads the marker of `resource`, if any.
    pub fn marker(&self, resource: &Path) -> Option<Marker> {
        match read_marker(resource) {
            MarkerState::Present(marker) => Some(marker),
            _ => None,
        }
    }

    /// Returns true if another live owner holds `resource`.
    pub fn is_blocked(&self, resource: &Path) -> bool {
        match read_marker(resource) {
            MarkerState::Absent | MarkerState::Unreadable => false,
            MarkerState::Denied => true,
            MarkerState::Present(marker) => {
                marker.owner != self.owner.id && !self.is_stale(&marker)
            }
        }
    }

    fn is_stale(&self, marker: &Marker) -> bool {
        let age = self.owner.now_millis().saturating_sub(marker.stamped_at);
        u128::from(age) >= self.stale_after.as_millis()
    }

    /// Writes a marker for `resource` unless another live owner holds it.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyBlocked` if the resource is held by someone else.
    pub fn block(&self, resource: &Path) -> CoreResult<()> {
        self.try_block(resource).map(|_| ())
    }

    /// Returns whether an existing marker had to be overwritten.
    fn try_block(&self, resource: &Path) -> CoreResult<bool> {
        let marker = self.stamp();
        match read_marker(resource) {
            MarkerState::Absent => match create_marker(resource, &marker) {
                Ok(()) => Ok(false),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    Err(CoreError::AlreadyBlocked {
                        path: resource.to_path_buf(),
                    })
                }
                Err(e) => Err(e.into()),
            },
            MarkerState::Denied => Err(CoreError::AlreadyBlocked {
                path: resource.to_path_buf(),
            }),
            MarkerState::Unreadable => {
                replace_marker(resource, &marker)?;
                Ok(true)
            }
            MarkerState::Present(existing) => {
                if existing.owner != self.owner.id {
                    if !self.is_stale(&existing) {
                        return Err(CoreError::AlreadyBlocked {
                            path: resource.to_path_buf(),
                        });
                    }
                    warn!(
                        resource = %resource.display(),
                        previous_owner = %existing.owner,
                        "reclaiming stale lock marker"
                    );
                }
                replace_marker(resource, &marker)?;
                Ok(true)
            }
        }
    }

    /// Removes the marker of `resource` if it is ours or stale.
    pub fn unblock(&self, resource: &Path) {
        if self.is_blocked(resource) {
            return;
        }
        match fs::remove_file(marker_path(resource)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!(resource = %resource.display(), error = %e, "unblock failed"),
        }
    }

    /// Spins until `resource` is acquired.
    ///
    /// # Errors
    ///
    /// Returns an error only for file-system failures other than contention.
    pub fn wait_to_block(&self, resource: &Path) -> CoreResult<()> {
        loop {
            if self.is_blocked(resource) {
                thread::sleep(self.poll_interval);
                continue;
            }
            match self.try_block(resource) {
                Ok(false) => break,
                Ok(true) => {
                    // An overwrite can race with another reclaimer; the last
                    // writer wins, so check who that was.
                    thread::sleep(self.settle_interval());
                    if self.owns(resource) {
                        break;
                    }
                }
                Err(CoreError::AlreadyBlocked { .. }) => {}
                Err(CoreError::Io(e)) if e.kind() == io::ErrorKind::PermissionDenied => {
                    thread::sleep(self.poll_interval);
                }
                Err(e) => return Err(e),
            }
        }
        debug!(resource = %resource.display(), owner = %self.owner.id, "lock acquired");
        Ok(())
    }

    /// Returns true if the marker of `resource` is currently ours.
    pub fn owns(&self, resource: &Path) -> bool {
        matches!(read_marker(resource), MarkerState::Present(m) if m.owner == self.owner.id)
    }

    /// Starts refreshing the marker of an acquired `resource`.
    ///
    /// The returned guard stops the refresher and releases the marker when
    /// dropped.
    pub fn keep_alive(&self, resource: &Path) -> KeepAlive {
        let (stop, stopped) = mpsc::channel::<()>();
        let coordinator = self.clone();
        let path = resource.to_path_buf();
        let handle = thread::Builder::new()
            .name("shelfdb-keepalive".into())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(coordinator.keep_alive_interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if !coordinator.refresh(&path) {
                                break;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                coordinator.unblock(&path);
            });

        match handle {
            Ok(handle) => KeepAlive {
                resource: resource.to_path_buf(),
                coordinator: None,
                stop: Some(stop),
                handle: Some(handle),
            },
            Err(e) => {
                warn!(resource = %resource.display(), error = %e, "keep-alive thread not started");
                KeepAlive {
                    resource: resource.to_path_buf(),
                    coordinator: Some(self.clone()),
                    stop: None,
                    handle: None,
                }
            }
        }
    }

    /// Re-stamps our marker. Returns false once the marker is lost.
    fn refresh(&self, resource: &Path) -> bool {
        if !self.owns(resource) {
            warn!(resource = %resource.display(), "lock marker lost while held");
            return false;
        }
        match replace_marker(resource, &self.stamp()) {
            Ok(()) => true,
            Err(e) => {
                warn!(resource = %resource.display(), error = %e, "lock marker refresh failed");
                false
            }
        }
    }

    fn stamp(&self) -> Marker {
        Marker {
            owner: self.owner.id,
            stamped_at: self.owner.now_millis(),
        }
    }

    fn settle_interval(&self) -> Duration {
        self.poll_interval.min(Duration::from_millis(5))
    }
}

/// Guard of an acquired resource, refreshing its marker while alive.
#[derive(Debug)]
pub struct KeepAlive {
    resource: PathBuf,
    /// Set only when no refresher thread could be started.
    coordinator: Option<LockCoordinator>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl KeepAlive {
    /// Returns the guarded resource.
    pub fn resource(&self) -> &Path {
        &self.resource
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.unblock(&self.resource);
        }
    }
}

/// A group of resources acquired together and released together.
///
/// Acquisition order is the metadata resource first, then every other
/// resource in lexicographic path order.
#[derive(Debug)]
pub struct LockSet {
    coordinator: LockCoordinator,
    held: Vec<KeepAlive>,
}

impl LockSet {
    /// Acquires `primary` and then `others`.
    ///
    /// # Errors
    ///
    /// Returns an error on file-system failures; everything acquired so far
    /// is released.
    pub fn acquire<I>(coordinator: &LockCoordinator, primary: &Path, others: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut set = Self {
            coordinator: coordinator.clone(),
            held: Vec::new(),
        };
        set.add(primary)?;
        let mut rest: Vec<PathBuf> = others.into_iter().filter(|p| p != primary).collect();
        rest.sort();
        rest.dedup();
        for path in rest {
            set.add(&path)?;
        }
        Ok(set)
    }

    /// Acquires further resources, in lexicographic order, skipping the
    /// ones already held.
    ///
    /// # Errors
    ///
    /// Returns an error on file-system failures.
    pub fn extend<I>(&mut self, others: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut rest: Vec<PathBuf> = others
            .into_iter()
            .filter(|p| !self.held.iter().any(|k| k.resource() == p))
            .collect();
        rest.sort();
        rest.dedup();
        for path in rest {
            self.add(&path)?;
        }
        Ok(())
    }

    /// Releases everything and acquires the same resources again, in the
    /// original order.
    ///
    /// # Errors
    ///
    /// Returns an error on file-system failures.
    pub fn reacquire(&mut self) -> CoreResult<()> {
        let resources: Vec<PathBuf> = self
            .held
            .iter()
            .map(|k| k.resource().to_path_buf())
            .collect();
        while let Some(guard) = self.held.pop() {
            drop(guard);
        }
        for path in resources {
            self.add(&path)?;
        }
        Ok(())
    }

    fn add(&mut self, resource: &Path) -> CoreResult<()> {
        self.coordinator.wait_to_block(resource)?;
        self.held.push(self.coordinator.keep_alive(resource));
        Ok(())
    }

    /// Returns true while no held marker has been taken over by someone else.
    pub fn is_intact(&self) -> bool {
        self.held
            .iter()
            .all(|k| !self.coordinator.is_blocked(k.resource()))
    }

    /// Returns the held resources in acquisition order.
    pub fn resources(&self) -> Vec<&Path> {
        self.held.iter().map(KeepAlive::resource).collect()
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        while let Some(guard) = self.held.pop() {
            drop(guard);
        }
    }
}

fn read_marker(resource: &Path) -> MarkerState {
    match fs::read_to_string(marker_path(resource)) {
        Ok(text) => Marker::decode(&text).map_or(MarkerState::Unreadable, MarkerState::Present),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => MarkerState::Absent,
            io::ErrorKind::PermissionDenied => MarkerState::Denied,
            _ => MarkerState::Unreadable,
        },
    }
}

/// Creates the marker only if none exists.
///
/// The content is written to a temporary file first and hard-linked into
/// place, so the marker never exists without its owner line.
fn create_marker(resource: &Path, marker: &Marker) -> io::Result<()> {
    let target = marker_path(resource);
    let temp = temp_sibling(&target);
    fs::write(&temp, marker.encode())?;
    let linked = fs::hard_link(&temp, &target);
    let _ = fs::remove_file(&temp);
    linked
}

/// Overwrites the marker through a rename so readers never see it half written.
fn replace_marker(resource: &Path, marker: &Marker) -> io::Result<()> {
    let target = marker_path(resource);
    let temp = temp_sibling(&target);
    fs::write(&temp, marker.encode())?;
    fs::rename(&temp, &target).inspect_err(|_| {
        let _ = fs::remove_file(&temp);
    })
}

fn temp_sibling(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    target.with_file_name(name)
}

fn to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn coordinator(clock: Arc<ManualClock>) -> LockCoordinator {
        LockCoordinator::new(
            LockOwner::with_clock(clock),
            Duration::from_secs(10),
            Duration::from_millis(5),
            Duration::from_millis(20),
        )
    }

    #[test]
    fn marker_path_appends_suffix() {
        assert_eq!(
            marker_path(Path::new("/db/meta")),
            PathBuf::from("/db/meta.block")
        );
    }

    #[test]
    fn block_and_unblock_own_marker() {
        let temp = tempdir().unwrap();
        let resource = temp.path().join("meta");
        let clock = Arc::new(ManualClock::new());
        let a = coordinator(clock);

        a.block(&resource).unwrap();
        assert!(marker_path(&resource).exists());
        assert!(!a.is_blocked(&resource));
        assert!(a.owns(&resource));

        a.unblock(&resource);
        assert!(!marker_path(&resource).exists());
    }

    #[test]
    fn foreign_fresh_marker_blocks() {
        let temp = tempdir().unwrap();
        let resource = temp.path().join("data_0");
        let clock = Arc::new(ManualClock::new());
        let a = coordinator(Arc::clone(&clock));
        let b = coordinator(clock);

        a.block(&resource).unwrap();
        assert!(b.is_blocked(&resource));
        assert!(matches!(
            b.block(&resource),
            Err(CoreError::AlreadyBlocked { .. })
        ));

        // b cannot remove a's live marker
        b.unblock(&resource);
        assert!(a.owns(&resource));
    }

    #[test]
    fn stale_marker_is_reclaimed() {
        let temp = tempdir().unwrap();
        let resource = temp.path().join("index_a");
        let clock = Arc::new(ManualClock::new());
        let a = coordinator(Arc::clone(&clock));
        let b = coordinator(Arc::clone(&clock));

        a.block(&resource).unwrap();
        clock.advance(Duration::from_secs(9));
        assert!(b.is_blocked(&resource));

        clock.advance(Duration::from_secs(1));
        assert!(!b.is_blocked(&resource));
        b.block(&resource).unwrap();
        assert!(b.owns(&resource));
        assert!(a.is_blocked(&resource));
    }

    #[test]
    fn unreadable_marker_does_not_block() {
        let temp = tempdir().unwrap();
        let resource = temp.path().join("meta");
        fs::write(marker_path(&resource), "garbage").unwrap();
        let a = coordinator(Arc::new(ManualClock::new()));

        assert!(!a.is_blocked(&resource));
        a.wait_to_block(&resource).unwrap();
        assert!(a.owns(&resource));
    }

    #[test]
    fn keep_alive_refreshes_and_releases() {
        let temp = tempdir().unwrap();
        let resource = temp.path().join("meta");
        let clock = Arc::new(ManualClock::new());
        let a = coordinator(Arc::clone(&clock));
        let b = coordinator(Arc::clone(&clock));

        a.wait_to_block(&resource).unwrap();
        let first = a.marker(&resource).unwrap().stamped_at;
        let guard = a.keep_alive(&resource);

        clock.advance(Duration::from_secs(8));
        thread::sleep(Duration::from_millis(120));
        let refreshed = a.marker(&resource).unwrap().stamped_at;
        assert!(refreshed > first);

        // Past the original stamp's expiry but within the refreshed one.
        clock.advance(Duration::from_secs(5));
        assert!(b.is_blocked(&resource));

        drop(guard);
        assert!(!marker_path(&resource).exists());
    }

    #[test]
    fn lock_set_orders_primary_first() {
        let temp = tempdir().unwrap();
        let meta = temp.path().join("meta");
        let a = coordinator(Arc::new(ManualClock::new()));

        let set = LockSet::acquire(
            &a,
            &meta,
            vec![
                temp.path().join("index_b"),
                temp.path().join("data_1"),
                temp.path().join("index_b"),
            ],
        )
        .unwrap();

        let names: Vec<_> = set
            .resources()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["meta", "data_1", "index_b"]);
        assert!(set.is_intact());

        drop(set);
        assert!(!marker_path(&meta).exists());
        assert!(!marker_path(&temp.path().join("data_1")).exists());
    }

    #[test]
    fn lock_set_extends_and_reacquires() {
        let temp = tempdir().unwrap();
        let meta = temp.path().join("meta");
        let clock = Arc::new(ManualClock::new());
        // No refresh may run while the clock is moved by hand.
        let a = LockCoordinator::new(
            LockOwner::with_clock(Arc::clone(&clock) as Arc<dyn Clock>),
            Duration::from_secs(10),
            Duration::from_millis(5),
            Duration::from_secs(60),
        );
        let b = coordinator(Arc::clone(&clock));

        let mut set = LockSet::acquire(&a, &meta, Vec::new()).unwrap();
        set.extend(vec![temp.path().join("data_0"), meta.clone()])
            .unwrap();
        assert_eq!(set.resources().len(), 2);

        // Simulate pre-emption of the shard marker by a second instance.
        clock.advance(Duration::from_secs(11));
        b.block(&temp.path().join("data_0")).unwrap();
        assert!(!set.is_intact());

        b.unblock(&temp.path().join("data_0"));
        set.reacquire().unwrap();
        assert!(set.is_intact());
        assert!(a.owns(&meta));
    }

    #[test]
    fn waiting_instance_acquires_after_release() {
        let temp = tempdir().unwrap();
        let resource = temp.path().join("meta");
        let a = LockCoordinator::new(
            LockOwner::new(),
            Duration::from_secs(10),
            Duration::from_millis(5),
            Duration::from_millis(100),
        );
        let b = LockCoordinator::new(
            LockOwner::new(),
            Duration::from_secs(10),
            Duration::from_millis(5),
            Duration::from_millis(100),
        );

        a.wait_to_block(&resource).unwrap();
        let path = resource.clone();
        let waiter = thread::spawn(move || {
            b.wait_to_block(&path).unwrap();
            b.owns(&path)
        });

        thread::sleep(Duration::from_millis(30));
        a.unblock(&resource);
        assert!(waiter.join().unwrap());
    }
}
