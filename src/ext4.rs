//
// EXT4 quota backend, using the generic VFS quotactl commands
// (Q_GETQUOTA / Q_SETQUOTA). Set/get/remove/test are single call paths;
// list_quotas tries three enumeration methods in a fixed order and falls
// through only when a method is unavailable, never on a real error.
//
use std::fs;
use std::fs::File;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use crate::mounts;
use crate::sys;
use crate::sys::IfDqblk;
use crate::{DqError, QuotaId, QuotaLimits, QuotaRecord, QuotaType, QuotaUsage};

// Block limits are already in 1KiB blocks for the VFS interface; only
// dqb_curspace (bytes) needs conversion.
fn dqblk_from_limits(limits: &QuotaLimits) -> IfDqblk {
    IfDqblk {
        dqb_bhardlimit: limits.block_hard,
        dqb_bsoftlimit: limits.block_soft,
        dqb_ihardlimit: limits.inode_hard,
        dqb_isoftlimit: limits.inode_soft,
        dqb_valid: sys::QIF_LIMITS,
        ..Default::default()
    }
}

fn record_from_dqblk(id: QuotaId, dq: &IfDqblk) -> QuotaRecord {
    QuotaRecord {
        id:     id.id,
        qtype:  id.qtype,
        limits: QuotaLimits {
            block_hard: dq.dqb_bhardlimit,
            block_soft: dq.dqb_bsoftlimit,
            inode_hard: dq.dqb_ihardlimit,
            inode_soft: dq.dqb_isoftlimit,
        },
        usage:  QuotaUsage {
            blocks:      dq.dqb_curspace / 1024,
            inodes:      dq.dqb_curinodes,
            block_grace: dq.dqb_btime,
            inode_grace: dq.dqb_itime,
        },
    }
}

fn setquota(device: &str, id: QuotaId, dq: &mut IfDqblk) -> Result<(), DqError> {
    let cmd = sys::qcmd(sys::Q_SETQUOTA, id.qtype.as_native());
    match sys::quotactl(cmd, device, id.id, dq as *mut IfDqblk as *mut libc::c_char) {
        Ok(()) => Ok(()),
        Err(libc::ESRCH) | Err(libc::ENOSYS) => Err(DqError::NotEnabled),
        Err(e) => Err(DqError::from_os_code(e)),
    }
}

// Raw Q_GETQUOTA; the caller maps the errno.
fn getquota(device: &str, id: QuotaId) -> Result<IfDqblk, i32> {
    let mut dq = IfDqblk::default();
    let cmd = sys::qcmd(sys::Q_GETQUOTA, id.qtype.as_native());
    sys::quotactl(cmd, device, id.id, &mut dq as *mut IfDqblk as *mut libc::c_char)?;
    Ok(dq)
}

pub(crate) fn set_quota(path: &Path, id: QuotaId, limits: &QuotaLimits) -> Result<(), DqError> {
    let device = mounts::device_for_path(path)?;
    let mut dq = dqblk_from_limits(limits);
    setquota(&device, id, &mut dq)
}

pub(crate) fn get_quota(path: &Path, id: QuotaId) -> Result<QuotaRecord, DqError> {
    let device = mounts::device_for_path(path)?;
    match getquota(&device, id) {
        Ok(dq) => Ok(record_from_dqblk(id, &dq)),
        Err(libc::ESRCH) | Err(libc::ENOSYS) => Err(DqError::NotEnabled),
        Err(e) => Err(DqError::from_os_code(e)),
    }
}

pub(crate) fn remove_quota(path: &Path, id: QuotaId) -> Result<(), DqError> {
    let device = mounts::device_for_path(path)?;
    // zero limits with QIF_LIMITS; usage fields are not part of the mask.
    let mut dq = IfDqblk {
        dqb_valid: sys::QIF_LIMITS,
        ..Default::default()
    };
    setquota(&device, id, &mut dq)
}

pub(crate) fn test_quota(path: &Path, id: QuotaId) -> Result<(), DqError> {
    let rec = get_quota(path, id)?;
    if rec.is_active() {
        Ok(())
    } else {
        Err(DqError::NotFound)
    }
}

pub(crate) fn list_quotas(
    path: &Path,
    qtype: QuotaType,
    max_id: u32,
) -> Result<Vec<QuotaRecord>, DqError> {
    let entry = mounts::entry_for_path(path)?;
    let mountpoint = Path::new(&entry.directory).to_owned();
    let device = entry.device;

    let records = list_chain(
        || list_direct(&mountpoint, qtype),
        || list_proc(qtype),
        || list_scan(&device, qtype, max_id),
    )?;
    Ok(normalize(records, max_id))
}

// The three enumeration methods, tried in fixed order. Only an
// Unavailable result moves on to the next one; real errors propagate
// so they are never masked as "method unavailable".
fn list_chain<D, F, S>(direct: D, fast: F, scan: S) -> Result<Vec<QuotaRecord>, DqError>
where
    D: FnOnce() -> Result<Vec<QuotaRecord>, DqError>,
    F: FnOnce() -> Result<Vec<QuotaRecord>, DqError>,
    S: FnOnce() -> Result<Vec<QuotaRecord>, DqError>,
{
    match direct() {
        Err(DqError::Unavailable) => {
            debug!("quota-file enumeration unavailable, trying /proc/fs/quota");
        },
        other => return other,
    }
    match fast() {
        Err(DqError::Unavailable) => {
            debug!("/proc/fs/quota enumeration unavailable, falling back to per-id scan");
        },
        other => return other,
    }
    scan()
}

// Bound to [0, max_id), drop untouched records, ascending by id.
fn normalize(mut records: Vec<QuotaRecord>, max_id: u32) -> Vec<QuotaRecord> {
    records.retain(|r| r.id < max_id && r.is_active());
    records.sort_by_key(|r| r.id);
    records.dedup_by_key(|r| r.id);
    records
}

fn quota_file_name(qtype: QuotaType) -> &'static str {
    match qtype {
        QuotaType::User => "aquota.user",
        QuotaType::Group => "aquota.group",
        QuotaType::Project => "aquota.project",
    }
}

const V2_DQINFO_SIZE: usize = 24;
const V2_DQBLK_SIZE: usize = 48;

fn rd32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn rd64(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

// One on-disk v2 quota record: id, inode limits/count (32 bit), block
// limits (32 bit, 1KiB units), then curspace/btime/itime (64 bit).
fn parse_v2_dqblk(buf: &[u8], qtype: QuotaType) -> Option<QuotaRecord> {
    let id = rd32(&buf[0..]);
    // id 0 is the default record, ~0 marks unused slots.
    if id == 0 || id == u32::MAX {
        return None;
    }
    Some(QuotaRecord {
        id,
        qtype,
        limits: QuotaLimits {
            inode_hard: rd32(&buf[4..]) as u64,
            inode_soft: rd32(&buf[8..]) as u64,
            block_hard: rd32(&buf[16..]) as u64,
            block_soft: rd32(&buf[20..]) as u64,
        },
        usage: QuotaUsage {
            inodes:      rd32(&buf[12..]) as u64,
            blocks:      rd64(&buf[24..]) / 1024,
            block_grace: rd64(&buf[32..]),
            inode_grace: rd64(&buf[40..]),
        },
    })
}

// Direct method: decode the aquota.* file at the mount root. A missing
// or truncated file means the method is unavailable here; any other
// read failure is a real error.
fn list_direct(mountpoint: &Path, qtype: QuotaType) -> Result<Vec<QuotaRecord>, DqError> {
    let file = mountpoint.join(quota_file_name(qtype));
    let mut f = match File::open(&file) {
        Ok(f) => f,
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Err(DqError::Unavailable),
        Err(e) => return Err(DqError::IoError(e)),
    };

    let mut header = [0u8; V2_DQINFO_SIZE];
    match f.read_exact(&mut header) {
        Ok(()) => {},
        Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(DqError::Unavailable),
        Err(e) => return Err(DqError::IoError(e)),
    }

    let mut records = Vec::new();
    let mut buf = [0u8; V2_DQBLK_SIZE];
    loop {
        match f.read_exact(&mut buf) {
            Ok(()) => {},
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(DqError::IoError(e)),
        }
        if let Some(rec) = parse_v2_dqblk(&buf, qtype) {
            records.push(rec);
        }
    }
    Ok(records)
}

fn proc_type_dir(qtype: QuotaType) -> &'static str {
    match qtype {
        QuotaType::User => "usrquota",
        QuotaType::Group => "grpquota",
        QuotaType::Project => "prjquota",
    }
}

fn parse_proc_entry(id: u32, qtype: QuotaType, text: &str) -> QuotaRecord {
    let mut rec = QuotaRecord::zero(QuotaId::new(id, qtype));
    for line in text.lines() {
        let mut parts = line.splitn(2, ':');
        let key = match parts.next() {
            Some(k) => k.trim(),
            None => continue,
        };
        let val = match parts.next().and_then(|v| v.trim().parse::<u64>().ok()) {
            Some(v) => v,
            None => continue,
        };
        match key {
            "block_hard_limit" => rec.limits.block_hard = val,
            "block_soft_limit" => rec.limits.block_soft = val,
            "block_current" => rec.usage.blocks = val / 1024,
            "inode_hard_limit" => rec.limits.inode_hard = val,
            "inode_soft_limit" => rec.limits.inode_soft = val,
            "inode_current" => rec.usage.inodes = val,
            _ => {},
        }
    }
    rec
}

// Fast method: walk the per-device quota entries some kernels expose
// under /proc/fs/quota. No such tree means the method is unavailable.
fn list_proc(qtype: QuotaType) -> Result<Vec<QuotaRecord>, DqError> {
    let root = Path::new("/proc/fs/quota");
    let devs = match fs::read_dir(root) {
        Ok(d) => d,
        Err(_) => return Err(DqError::Unavailable),
    };

    let mut records = Vec::new();
    for dev in devs.flatten() {
        let type_dir = dev.path().join(proc_type_dir(qtype));
        let ids = match fs::read_dir(&type_dir) {
            Ok(d) => d,
            Err(_) => continue,
        };
        for ent in ids.flatten() {
            let id = match ent.file_name().to_string_lossy().parse::<u32>() {
                Ok(id) if id != 0 => id,
                _ => continue,
            };
            let text = match fs::read_to_string(ent.path()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            let rec = parse_proc_entry(id, qtype, &text);
            if rec.is_active() {
                records.push(rec);
            }
        }
    }
    Ok(records)
}

// Scan method: probe every id with Q_GETQUOTA. Ids without a record
// come back as zeros or ENOENT and are skipped; ESRCH means the quota
// subsystem itself is off, so scanning further is pointless.
fn list_scan(device: &str, qtype: QuotaType, max_id: u32) -> Result<Vec<QuotaRecord>, DqError> {
    let mut records = Vec::new();
    for id in 0..max_id {
        let qid = QuotaId::new(id, qtype);
        match getquota(device, qid) {
            Ok(dq) => {
                let rec = record_from_dqblk(qid, &dq);
                if rec.is_active() {
                    records.push(rec);
                }
            },
            Err(libc::ENOENT) => continue,
            Err(libc::ESRCH) | Err(libc::ENOSYS) => return Err(DqError::NotEnabled),
            Err(e) => return Err(DqError::from_os_code(e)),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn rec(id: u32) -> QuotaRecord {
        let mut r = QuotaRecord::zero(QuotaId::new(id, QuotaType::User));
        r.limits.block_hard = 100;
        r
    }

    #[test]
    fn chain_uses_fast_when_direct_unavailable() {
        let scan_called = Cell::new(false);
        let records = list_chain(
            || Err(DqError::Unavailable),
            || Ok(vec![rec(5)]),
            || {
                scan_called.set(true);
                Ok(vec![rec(9)])
            },
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 5);
        assert!(!scan_called.get());
    }

    #[test]
    fn chain_falls_through_to_scan() {
        let records = list_chain(
            || Err(DqError::Unavailable),
            || Err(DqError::Unavailable),
            || Ok(vec![rec(9)]),
        )
        .unwrap();
        assert_eq!(records[0].id, 9);
    }

    #[test]
    fn chain_propagates_real_errors() {
        let fast_called = Cell::new(false);
        let err = list_chain(
            || Err(DqError::from_os_code(libc::EIO)),
            || {
                fast_called.set(true);
                Ok(vec![])
            },
            || Ok(vec![]),
        )
        .unwrap_err();
        assert_eq!(err, DqError::Quota { code: libc::EIO, message: String::new() });
        assert!(!fast_called.get());
    }

    #[test]
    fn chain_unavailable_everywhere() {
        let err = list_chain(
            || Err(DqError::Unavailable),
            || Err(DqError::Unavailable),
            || Err(DqError::Unavailable),
        )
        .unwrap_err();
        assert_eq!(err, DqError::Unavailable);
    }

    #[test]
    fn normalize_sorts_bounds_and_filters() {
        let mut inactive = QuotaRecord::zero(QuotaId::new(3, QuotaType::User));
        inactive.usage.block_grace = 99; // grace alone is not activity
        let records = vec![rec(70000), rec(9), inactive, rec(2), rec(9)];
        let out = normalize(records, 65536);
        let ids: Vec<u32> = out.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 9]);
    }

    #[test]
    fn v2_dqblk_decoding() {
        let mut buf = [0u8; V2_DQBLK_SIZE];
        buf[0..4].copy_from_slice(&1000u32.to_le_bytes()); // id
        buf[4..8].copy_from_slice(&100000u32.to_le_bytes()); // ihard
        buf[8..12].copy_from_slice(&90000u32.to_le_bytes()); // isoft
        buf[12..16].copy_from_slice(&17u32.to_le_bytes()); // curinodes
        buf[16..20].copy_from_slice(&1048576u32.to_le_bytes()); // bhard
        buf[20..24].copy_from_slice(&921600u32.to_le_bytes()); // bsoft
        buf[24..32].copy_from_slice(&2097152u64.to_le_bytes()); // curspace, bytes
        buf[32..40].copy_from_slice(&1700000000u64.to_le_bytes()); // btime

        let rec = parse_v2_dqblk(&buf, QuotaType::Project).unwrap();
        assert_eq!(rec.id, 1000);
        assert_eq!(rec.limits.block_hard, 1048576);
        assert_eq!(rec.limits.block_soft, 921600);
        assert_eq!(rec.limits.inode_hard, 100000);
        assert_eq!(rec.limits.inode_soft, 90000);
        assert_eq!(rec.usage.inodes, 17);
        assert_eq!(rec.usage.blocks, 2048); // bytes -> 1KiB blocks
        assert_eq!(rec.usage.block_grace, 1700000000);

        // slot markers are skipped.
        let zero = [0u8; V2_DQBLK_SIZE];
        assert!(parse_v2_dqblk(&zero, QuotaType::User).is_none());
        let mut unused = [0u8; V2_DQBLK_SIZE];
        unused[0..4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(parse_v2_dqblk(&unused, QuotaType::User).is_none());
    }

    #[test]
    fn proc_entry_parsing() {
        let text = "\
block_hard_limit: 1048576
block_soft_limit: 921600
block_current: 3145728
inode_hard_limit: 100000
inode_soft_limit: 90000
inode_current: 42
";
        let rec = parse_proc_entry(1000, QuotaType::User, text);
        assert_eq!(rec.limits.block_hard, 1048576);
        assert_eq!(rec.limits.block_soft, 921600);
        assert_eq!(rec.usage.blocks, 3072); // bytes -> 1KiB blocks
        assert_eq!(rec.limits.inode_hard, 100000);
        assert_eq!(rec.limits.inode_soft, 90000);
        assert_eq!(rec.usage.inodes, 42);
        assert!(rec.is_active());
    }

    #[test]
    fn dqblk_conversion() {
        let limits = QuotaLimits {
            block_hard: 1048576,
            block_soft: 921600,
            inode_hard: 100000,
            inode_soft: 90000,
        };
        let dq = dqblk_from_limits(&limits);
        assert_eq!(dq.dqb_bhardlimit, 1048576); // already 1KiB units
        assert_eq!(dq.dqb_valid, sys::QIF_LIMITS);

        let mut dq = dq;
        dq.dqb_curspace = 5 * 1024 * 1024; // bytes
        dq.dqb_curinodes = 12;
        let rec = record_from_dqblk(QuotaId::new(8, QuotaType::Group), &dq);
        assert_eq!(rec.limits, limits);
        assert_eq!(rec.usage.blocks, 5120);
        assert_eq!(rec.usage.inodes, 12);
    }
}
