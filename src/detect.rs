//
// Filesystem kind detection: statfs magic number first, with an optional
// `df -T` based fallback for environments where statfs is unusable.
//
use std::path::Path;
use std::process::Command;

use crate::sys;
use crate::{DqError, FsKind};

/// Map a statfs filesystem magic to a supported kind.
pub(crate) fn kind_from_magic(magic: i64) -> Option<FsKind> {
    match magic {
        sys::XFS_SUPER_MAGIC => Some(FsKind::Xfs),
        sys::EXT4_SUPER_MAGIC => Some(FsKind::Ext4),
        _ => None,
    }
}

/// Detect the filesystem kind of `path` from its statfs magic number.
///
/// Detection is not cached: the filesystem under a path can change
/// between calls (remount), so callers on a hot path must cache and
/// invalidate themselves.
pub fn detect<P: AsRef<Path>>(path: P) -> Result<FsKind, DqError> {
    let st = sys::statfs(path.as_ref())?;
    let magic = st.f_type as i64;
    kind_from_magic(magic).ok_or_else(|| {
        DqError::NotSupported(format!("unsupported filesystem type: 0x{:x}", magic))
    })
}

/// Detect the filesystem kind of `path` by parsing `df -T` output.
///
/// Only meant as a fallback when the statfs call is unavailable; prefer
/// [`detect`].
pub fn detect_by_command<P: AsRef<Path>>(path: P) -> Result<FsKind, DqError> {
    let output = Command::new("df").arg("-T").arg(path.as_ref()).output()?;
    if !output.status.success() {
        return Err(DqError::NotSupported(format!(
            "df -T failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    parse_df_output(&String::from_utf8_lossy(&output.stdout))
}

// `df -T` prints a header line, then one line per filesystem with the
// type in the second column.
fn parse_df_output(out: &str) -> Result<FsKind, DqError> {
    let line = out
        .lines()
        .nth(1)
        .ok_or_else(|| DqError::NotSupported("invalid df output".to_string()))?;
    let fstype = line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| DqError::NotSupported("invalid df output format".to_string()))?;

    let lower = fstype.to_lowercase();
    if lower.contains("xfs") {
        Ok(FsKind::Xfs)
    } else if lower.contains("ext4") {
        Ok(FsKind::Ext4)
    } else {
        Err(DqError::NotSupported(format!(
            "unsupported filesystem: {}",
            lower
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_mapping() {
        assert_eq!(kind_from_magic(0x58465342), Some(FsKind::Xfs));
        assert_eq!(kind_from_magic(0xEF53), Some(FsKind::Ext4));
        // no false positives for other well-known magics.
        assert_eq!(kind_from_magic(0x9123683E), None); // btrfs
        assert_eq!(kind_from_magic(0x01021994), None); // tmpfs
        assert_eq!(kind_from_magic(0), None);
    }

    #[test]
    fn df_output_parsing() {
        let out = "Filesystem     Type 1K-blocks    Used Available Use% Mounted on\n\
                   /dev/sdb1      xfs   52403200 1048576  51354624   2% /mnt/data\n";
        assert_eq!(parse_df_output(out).unwrap(), FsKind::Xfs);

        let out = "Filesystem     Type 1K-blocks    Used Available Use% Mounted on\n\
                   /dev/sda2      EXT4  52403200 1048576  51354624   2% /srv\n";
        assert_eq!(parse_df_output(out).unwrap(), FsKind::Ext4);

        let out = "Filesystem     Type 1K-blocks    Used Available Use% Mounted on\n\
                   /dev/sda2      btrfs 52403200 1048576  51354624   2% /srv\n";
        match parse_df_output(out) {
            Err(DqError::NotSupported(_)) => {},
            other => panic!("expected NotSupported, got {:?}", other),
        }

        match parse_df_output("Filesystem Type\n") {
            Err(DqError::NotSupported(_)) => {},
            other => panic!("expected NotSupported, got {:?}", other),
        }
    }
}
