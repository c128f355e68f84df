//
// Mount-table lookups. quotactl(2) wants the block device backing a
// filesystem, not a path on it, so we resolve paths against /proc/mounts.
//
use std::fs::File;
use std::io;
use std::io::prelude::*;
use std::io::BufReader;
use std::os::linux::fs::MetadataExt;
use std::path::Path;

use crate::DqError;

#[derive(Debug, Clone)]
pub(crate) struct MountEntry {
    pub device:    String,
    pub directory: String,
    pub fstype:    String,
}

// filesystem types we can issue quota calls against.
fn is_quota_fstype(tp: &str) -> bool {
    match tp {
        "xfs" | "ext2" | "ext3" | "ext4" => true,
        _ => false,
    }
}

pub(crate) fn parse_mounts<R: BufRead>(reader: R) -> io::Result<Vec<MountEntry>> {
    let mut result = Vec::new();
    for l in reader.lines() {
        let l2 = l?;
        let line = l2.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let words = line.split_whitespace().collect::<Vec<_>>();
        if words.len() < 3 {
            continue;
        }
        result.push(MountEntry {
            device:    words[0].to_string(),
            directory: words[1].to_string(),
            fstype:    words[2].to_string(),
        });
    }
    Ok(result)
}

// read /proc/mounts.
pub(crate) fn read_mounts() -> io::Result<Vec<MountEntry>> {
    let f = File::open("/proc/mounts")?;
    parse_mounts(BufReader::new(f))
}

/// Find the xfs/ext* mount entry a path lives on. Matches by device
/// number first; if several mount entries share it (bind mounts), the
/// longest canonicalized mount-point prefix wins.
pub(crate) fn entry_for_path(path: &Path) -> Result<MountEntry, DqError> {
    let meta = std::fs::symlink_metadata(path)?;

    let ents = read_mounts()?
        .into_iter()
        .filter(|e| is_quota_fstype(&e.fstype))
        .filter(|e| match std::fs::metadata(&e.directory) {
            Ok(ref m) => m.st_dev() == meta.st_dev(),
            Err(_) => false,
        })
        .collect::<Vec<MountEntry>>();

    match ents.len() {
        0 => Err(DqError::NotSupported(format!(
            "no xfs or ext4 mount found for {}",
            path.display()
        ))),
        1 => Ok(ents[0].clone()),
        _ => {
            let rp = std::fs::canonicalize(path)?;

            let mut v = Vec::new();
            for mut e in ents.into_iter() {
                if let Ok(p) = std::fs::canonicalize(&e.directory) {
                    e.directory = p.to_string_lossy().to_string();
                    v.push((p, e));
                }
            }

            // longest match first.
            v.sort_by(|a, b| b.0.cmp(&a.0));
            match v.into_iter().find(|(dir, _)| rp.starts_with(dir)) {
                Some((_, e)) => Ok(e),
                None => Err(DqError::NotSupported(format!(
                    "no xfs or ext4 mount found for {}",
                    path.display()
                ))),
            }
        },
    }
}

/// The block device backing the filesystem `path` is on.
pub(crate) fn device_for_path(path: &Path) -> Result<String, DqError> {
    entry_for_path(path).map(|e| e.device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_table_parsing() {
        let table = "\
# comment line
/dev/sda1 / ext4 rw,relatime 0 0

proc /proc proc rw,nosuid,nodev,noexec 0 0
/dev/sdb1 /mnt/data xfs rw,relatime,attr2,inode64,usrquota,prjquota 0 0
broken-line
/dev/mapper/vg0-home /home ext4 rw 0 0
";
        let ents = parse_mounts(table.as_bytes()).unwrap();
        assert_eq!(ents.len(), 4);
        assert_eq!(ents[0].device, "/dev/sda1");
        assert_eq!(ents[0].directory, "/");
        assert_eq!(ents[0].fstype, "ext4");
        assert_eq!(ents[1].fstype, "proc");
        assert_eq!(ents[2].device, "/dev/sdb1");
        assert_eq!(ents[3].directory, "/home");
    }

    #[test]
    fn quota_fstype_filter() {
        assert!(is_quota_fstype("xfs"));
        assert!(is_quota_fstype("ext4"));
        assert!(is_quota_fstype("ext2"));
        assert!(!is_quota_fstype("proc"));
        assert!(!is_quota_fstype("tmpfs"));
        assert!(!is_quota_fstype("nfs4"));
    }
}
