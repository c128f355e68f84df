//! Get, set and list disk quotas on XFS and ext4 filesystems, and manage
//! the project IDs used for project ("directory tree") quotas.
//!
//! The filesystem kind of a path is detected from the statfs magic number,
//! and every operation is forwarded to the matching native quota interface:
//! the XFS quotactl commands (`Q_XGETQUOTA` / `Q_XSETQLIM`) or the generic
//! VFS ones ext4 uses (`Q_GETQUOTA` / `Q_SETQUOTA`). Quota state lives in
//! the kernel; nothing is cached here, every call returns a fresh snapshot.
//!
//! Example:
//!
//! ```no_run
//! use disk_quota::{QuotaId, QuotaLimits, QuotaMgr, QuotaType};
//!
//! let mgr = QuotaMgr::new("/mnt/data")?;
//! let id = QuotaId::new(1000, QuotaType::Project);
//! mgr.set_quota("/mnt/data", id, &QuotaLimits {
//!     block_hard: 1048576,
//!     block_soft: 921600,
//!     inode_hard: 100000,
//!     inode_soft: 90000,
//! })?;
//! let rec = mgr.get_quota("/mnt/data", id)?;
//! println!("used {} of {} 1K blocks", rec.usage.blocks, rec.limits.block_hard);
//! # Ok::<(), disk_quota::DqError>(())
//! ```
#[macro_use]
extern crate log;
extern crate libc;

mod detect;
mod ext4;
mod mounts;
pub mod project;
mod sys;
mod xfs;

pub use crate::detect::{detect, detect_by_command};
pub use crate::project::{clear_project_id, get_project_id, set_project_id};

use std::ffi::NulError;
use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;

/// Default upper bound for the id space scanned by `list_quotas`.
pub const DEFAULT_MAX_ID: u32 = 65536;

/// Filesystem kinds we can manage quotas on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    Xfs,
    Ext4,
}

impl FsKind {
    pub fn name(self) -> &'static str {
        match self {
            FsKind::Xfs => "xfs",
            FsKind::Ext4 => "ext4",
        }
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The identity dimension a quota record applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaType {
    User,
    Group,
    Project,
}

impl QuotaType {
    /// The numeric type code the kernel quota interface uses.
    pub(crate) fn as_native(self) -> u32 {
        match self {
            QuotaType::User => 0,
            QuotaType::Group => 1,
            QuotaType::Project => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            QuotaType::User => "user",
            QuotaType::Group => "group",
            QuotaType::Project => "project",
        }
    }
}

impl fmt::Display for QuotaType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QuotaType {
    type Err = DqError;

    fn from_str(s: &str) -> Result<QuotaType, DqError> {
        match s {
            "user" | "usr" | "u" => Ok(QuotaType::User),
            "group" | "grp" | "g" => Ok(QuotaType::Group),
            "project" | "proj" | "p" => Ok(QuotaType::Project),
            other => Err(DqError::InvalidArgument(format!(
                "invalid quota type {:?} (must be user, group, or project)",
                other
            ))),
        }
    }
}

/// Identifies who or what a quota record applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaId {
    pub id:    u32,
    pub qtype: QuotaType,
}

impl QuotaId {
    pub fn new(id: u32, qtype: QuotaType) -> QuotaId {
        QuotaId { id, qtype }
    }
}

/// Hard and soft limits on block and inode consumption.
///
/// Block limits are in units of 1KiB blocks. A zero field means
/// "unlimited" and is passed through to the kernel verbatim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaLimits {
    pub block_hard: u64,
    pub block_soft: u64,
    pub inode_hard: u64,
    pub inode_soft: u64,
}

/// Live usage as accounted by the kernel at call time.
///
/// The grace fields are the kernel's grace expiry timestamps (seconds,
/// filesystem-native epoch); zero when no soft limit is being exceeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaUsage {
    pub blocks:      u64,
    pub inodes:      u64,
    pub block_grace: u64,
    pub inode_grace: u64,
}

/// Snapshot of one identity's quota state: limits plus current usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaRecord {
    pub id:     u32,
    pub qtype:  QuotaType,
    pub limits: QuotaLimits,
    pub usage:  QuotaUsage,
}

impl QuotaRecord {
    pub(crate) fn zero(id: QuotaId) -> QuotaRecord {
        QuotaRecord {
            id:     id.id,
            qtype:  id.qtype,
            limits: QuotaLimits::default(),
            usage:  QuotaUsage::default(),
        }
    }

    /// True if this record shows any quota activity: a nonzero limit in
    /// any of the four limit fields, or a nonzero usage counter.
    pub fn is_active(&self) -> bool {
        self.limits.block_hard != 0
            || self.limits.block_soft != 0
            || self.limits.inode_hard != 0
            || self.limits.inode_soft != 0
            || self.usage.blocks != 0
            || self.usage.inodes != 0
    }
}

/// Errors returned by this crate.
#[derive(Debug)]
pub enum DqError {
    /// The path is on a filesystem we cannot manage quotas on.
    NotSupported(String),
    /// An enumeration method is not available on this kernel/mount.
    /// Drives the ext4 list fallback chain; only surfaced when every
    /// method reported it.
    Unavailable,
    /// Quota accounting is not enabled on the mount.
    NotEnabled,
    /// No active quota record exists for the id (see `test_quota`).
    NotFound,
    /// A native quota call failed. `code` is the OS error number,
    /// `message` the platform's description of it.
    Quota { code: i32, message: String },
    /// Malformed input (bad quota-type token, unparseable number).
    InvalidArgument(String),
    IoError(io::Error),
}

impl DqError {
    /// Wrap an OS error number from a failed quota/ioctl call.
    pub(crate) fn from_os_code(code: i32) -> DqError {
        DqError::Quota {
            code,
            message: io::Error::from_raw_os_error(code).to_string(),
        }
    }
}

impl fmt::Display for DqError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DqError::NotSupported(msg) => write!(f, "{}", msg),
            DqError::Unavailable => write!(f, "quota enumeration method not available"),
            DqError::NotEnabled => write!(f, "quota accounting not enabled"),
            DqError::NotFound => write!(f, "no quota set for this id"),
            DqError::Quota { code, message } => {
                write!(f, "quota error (code {}): {}", code, message)
            },
            DqError::InvalidArgument(msg) => write!(f, "{}", msg),
            DqError::IoError(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DqError {}

impl From<io::Error> for DqError {
    fn from(e: io::Error) -> Self {
        DqError::IoError(e)
    }
}

impl From<NulError> for DqError {
    fn from(e: NulError) -> Self {
        DqError::IoError(e.into())
    }
}

fn to_num(e: &DqError) -> u32 {
    match e {
        DqError::NotSupported(_) => 1,
        DqError::Unavailable => 2,
        DqError::NotEnabled => 3,
        DqError::NotFound => 4,
        DqError::Quota { .. } => 5,
        DqError::InvalidArgument(_) => 6,
        DqError::IoError(_) => 7,
    }
}

impl PartialEq for DqError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DqError::IoError(e), DqError::IoError(o)) => e.kind() == o.kind(),
            (DqError::Quota { code: a, .. }, DqError::Quota { code: b, .. }) => a == b,
            (e, o) => to_num(e) == to_num(o),
        }
    }
}

/// Quota operations on one filesystem kind.
///
/// Stateless apart from the kind tag: every method resolves the mount and
/// issues the native calls fresh, so a manager can be kept around or
/// rebuilt per call at no real cost.
#[derive(Debug, Clone, Copy)]
pub struct QuotaMgr {
    kind: FsKind,
}

impl QuotaMgr {
    /// Detect the filesystem kind of `path` and return a manager for it.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<QuotaMgr, DqError> {
        Ok(QuotaMgr {
            kind: detect::detect(path)?,
        })
    }

    /// Manager for a known filesystem kind, skipping detection. Useful
    /// for batch operations across many paths on the same mount.
    pub fn with_kind(kind: FsKind) -> QuotaMgr {
        QuotaMgr { kind }
    }

    pub fn kind(&self) -> FsKind {
        self.kind
    }

    /// Install hard/soft block and inode limits for `id` on the
    /// filesystem containing `path`. Idempotent.
    pub fn set_quota<P: AsRef<Path>>(
        &self,
        path: P,
        id: QuotaId,
        limits: &QuotaLimits,
    ) -> Result<(), DqError> {
        match self.kind {
            FsKind::Xfs => xfs::set_quota(path.as_ref(), id, limits),
            FsKind::Ext4 => ext4::set_quota(path.as_ref(), id, limits),
        }
    }

    /// Read current limits and live usage for `id`. Returns an all-zero
    /// record when no quota was ever set, and `DqError::NotEnabled` when
    /// quota accounting is off for the mount.
    pub fn get_quota<P: AsRef<Path>>(&self, path: P, id: QuotaId) -> Result<QuotaRecord, DqError> {
        match self.kind {
            FsKind::Xfs => xfs::get_quota(path.as_ref(), id),
            FsKind::Ext4 => ext4::get_quota(path.as_ref(), id),
        }
    }

    /// Enumerate the identities of `qtype` in `[0, max_id)` that show any
    /// quota activity, ascending by id.
    pub fn list_quotas<P: AsRef<Path>>(
        &self,
        path: P,
        qtype: QuotaType,
        max_id: u32,
    ) -> Result<Vec<QuotaRecord>, DqError> {
        match self.kind {
            FsKind::Xfs => xfs::list_quotas(path.as_ref(), qtype, max_id),
            FsKind::Ext4 => ext4::list_quotas(path.as_ref(), qtype, max_id),
        }
    }

    /// Reset all four limit fields to zero (unlimited). Usage counters are
    /// owned by the filesystem and stay as they are.
    pub fn remove_quota<P: AsRef<Path>>(&self, path: P, id: QuotaId) -> Result<(), DqError> {
        match self.kind {
            FsKind::Xfs => xfs::remove_quota(path.as_ref(), id),
            FsKind::Ext4 => ext4::remove_quota(path.as_ref(), id),
        }
    }

    /// Succeeds iff an active quota record exists for `id`; fails with
    /// `DqError::NotFound` otherwise.
    pub fn test_quota<P: AsRef<Path>>(&self, path: P, id: QuotaId) -> Result<(), DqError> {
        match self.kind {
            FsKind::Xfs => xfs::test_quota(path.as_ref(), id),
            FsKind::Ext4 => ext4::test_quota(path.as_ref(), id),
        }
    }
}

/// One-shot `set_quota`, detecting the filesystem kind of `path` first.
pub fn set_quota<P: AsRef<Path>>(path: P, id: QuotaId, limits: &QuotaLimits) -> Result<(), DqError> {
    QuotaMgr::new(path.as_ref())?.set_quota(path, id, limits)
}

/// One-shot `get_quota`, detecting the filesystem kind of `path` first.
pub fn get_quota<P: AsRef<Path>>(path: P, id: QuotaId) -> Result<QuotaRecord, DqError> {
    QuotaMgr::new(path.as_ref())?.get_quota(path, id)
}

/// One-shot `list_quotas`, detecting the filesystem kind of `path` first.
pub fn list_quotas<P: AsRef<Path>>(
    path: P,
    qtype: QuotaType,
    max_id: u32,
) -> Result<Vec<QuotaRecord>, DqError> {
    QuotaMgr::new(path.as_ref())?.list_quotas(path, qtype, max_id)
}

/// One-shot `remove_quota`, detecting the filesystem kind of `path` first.
pub fn remove_quota<P: AsRef<Path>>(path: P, id: QuotaId) -> Result<(), DqError> {
    QuotaMgr::new(path.as_ref())?.remove_quota(path, id)
}

/// One-shot `test_quota`, detecting the filesystem kind of `path` first.
pub fn test_quota<P: AsRef<Path>>(path: P, id: QuotaId) -> Result<(), DqError> {
    QuotaMgr::new(path.as_ref())?.test_quota(path, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_type_tokens() {
        for t in &["user", "usr", "u"] {
            assert_eq!(t.parse::<QuotaType>().unwrap(), QuotaType::User);
        }
        for t in &["group", "grp", "g"] {
            assert_eq!(t.parse::<QuotaType>().unwrap(), QuotaType::Group);
        }
        for t in &["project", "proj", "p"] {
            assert_eq!(t.parse::<QuotaType>().unwrap(), QuotaType::Project);
        }
        let e = "btrfs".parse::<QuotaType>().unwrap_err();
        assert_eq!(e, DqError::InvalidArgument(String::new()));
    }

    #[test]
    fn quota_type_native_codes() {
        assert_eq!(QuotaType::User.as_native(), 0);
        assert_eq!(QuotaType::Group.as_native(), 1);
        assert_eq!(QuotaType::Project.as_native(), 2);
    }

    #[test]
    fn active_record_predicate() {
        let id = QuotaId::new(1000, QuotaType::Project);
        let mut rec = QuotaRecord::zero(id);
        assert!(!rec.is_active());

        rec.limits.block_soft = 1;
        assert!(rec.is_active());

        // usage alone also counts as activity.
        let mut rec = QuotaRecord::zero(id);
        rec.usage.inodes = 42;
        assert!(rec.is_active());

        // grace timestamps alone do not.
        let mut rec = QuotaRecord::zero(id);
        rec.usage.block_grace = 1234567890;
        assert!(!rec.is_active());
    }

    #[test]
    fn error_equality_ignores_payload() {
        assert_eq!(
            DqError::Quota { code: 13, message: "a".into() },
            DqError::Quota { code: 13, message: "b".into() }
        );
        assert_ne!(
            DqError::Quota { code: 13, message: String::new() },
            DqError::Quota { code: 2, message: String::new() }
        );
        assert_ne!(DqError::NotFound, DqError::NotEnabled);
    }
}
