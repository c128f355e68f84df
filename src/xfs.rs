//
// XFS quota backend. Talks to the XFS quota manager commands
// (Q_XGETQUOTA / Q_XSETQLIM) on the block device backing the path.
// Single call path per operation, no fallback tiers.
//
use std::path::Path;

use crate::mounts;
use crate::sys;
use crate::sys::FsDiskQuota;
use crate::{DqError, QuotaId, QuotaLimits, QuotaRecord, QuotaType, QuotaUsage};

fn type_flag(qtype: QuotaType) -> i8 {
    match qtype {
        QuotaType::User => sys::FS_USER_QUOTA,
        QuotaType::Group => sys::FS_GROUP_QUOTA,
        QuotaType::Project => sys::FS_PROJ_QUOTA,
    }
}

// XFS block limits and counts are 512-byte basic blocks; the public unit
// is 1KiB blocks. Zero stays zero (unlimited) through the conversion.
fn dq_from_limits(id: QuotaId, limits: &QuotaLimits) -> FsDiskQuota {
    FsDiskQuota {
        d_version: sys::FS_DQUOT_VERSION,
        d_flags: type_flag(id.qtype),
        d_fieldmask: sys::FS_DQ_LIMIT_MASK,
        d_id: id.id,
        d_blk_hardlimit: limits.block_hard * 2,
        d_blk_softlimit: limits.block_soft * 2,
        d_ino_hardlimit: limits.inode_hard,
        d_ino_softlimit: limits.inode_soft,
        ..Default::default()
    }
}

fn record_from_dq(id: QuotaId, dq: &FsDiskQuota) -> QuotaRecord {
    QuotaRecord {
        id:     id.id,
        qtype:  id.qtype,
        limits: QuotaLimits {
            block_hard: dq.d_blk_hardlimit / 2,
            block_soft: dq.d_blk_softlimit / 2,
            inode_hard: dq.d_ino_hardlimit,
            inode_soft: dq.d_ino_softlimit,
        },
        usage:  QuotaUsage {
            blocks:      dq.d_bcount / 2,
            inodes:      dq.d_icount,
            block_grace: dq.d_btimer as u32 as u64,
            inode_grace: dq.d_itimer as u32 as u64,
        },
    }
}

fn setqlim(device: &str, id: QuotaId, dq: &mut FsDiskQuota) -> Result<(), DqError> {
    let cmd = sys::qcmd(sys::Q_XSETQLIM, id.qtype.as_native());
    sys::quotactl(cmd, device, id.id, dq as *mut FsDiskQuota as *mut libc::c_char)
        .map_err(DqError::from_os_code)
}

// Raw Q_XGETQUOTA; the caller maps the errno.
fn getquota(device: &str, id: QuotaId) -> Result<FsDiskQuota, i32> {
    let mut dq = FsDiskQuota::default();
    let cmd = sys::qcmd(sys::Q_XGETQUOTA, id.qtype.as_native());
    sys::quotactl(cmd, device, id.id, &mut dq as *mut FsDiskQuota as *mut libc::c_char)?;
    Ok(dq)
}

pub(crate) fn set_quota(path: &Path, id: QuotaId, limits: &QuotaLimits) -> Result<(), DqError> {
    let device = mounts::device_for_path(path)?;
    let mut dq = dq_from_limits(id, limits);
    setqlim(&device, id, &mut dq)
}

pub(crate) fn get_quota(path: &Path, id: QuotaId) -> Result<QuotaRecord, DqError> {
    let device = mounts::device_for_path(path)?;
    match getquota(&device, id) {
        Ok(dq) => Ok(record_from_dq(id, &dq)),
        // no dquot allocated yet for this id: report zero limits/usage.
        Err(libc::ENOENT) => Ok(QuotaRecord::zero(id)),
        Err(libc::ESRCH) | Err(libc::ENOSYS) => Err(DqError::NotEnabled),
        Err(e) => Err(DqError::from_os_code(e)),
    }
}

pub(crate) fn list_quotas(
    path: &Path,
    qtype: QuotaType,
    max_id: u32,
) -> Result<Vec<QuotaRecord>, DqError> {
    let device = mounts::device_for_path(path)?;
    let mut records = Vec::new();
    for id in 0..max_id {
        let qid = QuotaId::new(id, qtype);
        match getquota(&device, qid) {
            Ok(dq) => {
                let rec = record_from_dq(qid, &dq);
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

// Zero limits with the limit fieldmask resets all four limits; usage
// counters are untouched by Q_XSETQLIM.
pub(crate) fn remove_quota(path: &Path, id: QuotaId) -> Result<(), DqError> {
    let device = mounts::device_for_path(path)?;
    let mut dq = FsDiskQuota {
        d_version: sys::FS_DQUOT_VERSION,
        d_flags: type_flag(id.qtype),
        d_fieldmask: sys::FS_DQ_LIMIT_MASK,
        d_id: id.id,
        ..Default::default()
    };
    setqlim(&device, id, &mut dq)
}

pub(crate) fn test_quota(path: &Path, id: QuotaId) -> Result<(), DqError> {
    let rec = get_quota(path, id)?;
    if rec.is_active() {
        Ok(())
    } else {
        Err(DqError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_unit_conversion() {
        let id = QuotaId::new(1000, QuotaType::Project);
        let limits = QuotaLimits {
            block_hard: 1048576,
            block_soft: 921600,
            inode_hard: 100000,
            inode_soft: 90000,
        };
        let dq = dq_from_limits(id, &limits);

        // 1KiB blocks become 512-byte basic blocks.
        assert_eq!(dq.d_blk_hardlimit, 2097152);
        assert_eq!(dq.d_blk_softlimit, 1843200);
        assert_eq!(dq.d_ino_hardlimit, 100000);
        assert_eq!(dq.d_ino_softlimit, 90000);
        assert_eq!(dq.d_id, 1000);
        assert_eq!(dq.d_version, sys::FS_DQUOT_VERSION);
        assert_eq!(dq.d_fieldmask, sys::FS_DQ_LIMIT_MASK);

        // and back.
        let rec = record_from_dq(id, &dq);
        assert_eq!(rec.limits, limits);
    }

    #[test]
    fn zero_limits_stay_zero() {
        let id = QuotaId::new(7, QuotaType::User);
        let dq = dq_from_limits(id, &QuotaLimits::default());
        assert_eq!(dq.d_blk_hardlimit, 0);
        assert_eq!(dq.d_blk_softlimit, 0);
        let rec = record_from_dq(id, &dq);
        assert_eq!(rec.limits, QuotaLimits::default());
        assert!(!rec.is_active());
    }

    #[test]
    fn usage_unit_conversion() {
        let id = QuotaId::new(3, QuotaType::Group);
        let dq = FsDiskQuota {
            d_bcount: 4096, // 512-byte blocks
            d_icount: 17,
            d_btimer: 1700000000,
            ..Default::default()
        };
        let rec = record_from_dq(id, &dq);
        assert_eq!(rec.usage.blocks, 2048); // 1KiB blocks
        assert_eq!(rec.usage.inodes, 17);
        assert_eq!(rec.usage.block_grace, 1700000000);
        assert_eq!(rec.usage.inode_grace, 0);
    }

    #[test]
    fn quota_type_flags() {
        assert_eq!(type_flag(QuotaType::User), sys::FS_USER_QUOTA);
        assert_eq!(type_flag(QuotaType::Group), sys::FS_GROUP_QUOTA);
        assert_eq!(type_flag(QuotaType::Project), sys::FS_PROJ_QUOTA);
    }
}
