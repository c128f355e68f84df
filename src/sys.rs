//
// Native quota surface: quotactl(2) command constants, the fixed-layout
// structures the kernel exchanges, and thin safe wrappers around the
// libc calls. Failed calls report the raw OS error number so the
// backends can branch on specific codes.
//
use std::ffi::CString;
use std::fs::File;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

// Filesystem magic numbers as reported by statfs(2).
pub(crate) const XFS_SUPER_MAGIC: i64 = 0x5846_5342;
pub(crate) const EXT4_SUPER_MAGIC: i64 = 0xEF53;

// quotactl command encoding: QCMD(cmd, type) = (cmd << 8) | (type & 0xff).
const SUBCMDSHIFT: u32 = 8;
const SUBCMDMASK: u32 = 0x00ff;

pub(crate) const fn qcmd(cmd: u32, qtype: u32) -> i32 {
    ((cmd << SUBCMDSHIFT) | (qtype & SUBCMDMASK)) as i32
}

// VFS quota commands (ext4).
pub(crate) const Q_GETQUOTA: u32 = 0x800007;
pub(crate) const Q_SETQUOTA: u32 = 0x800008;

// XFS quota manager commands: XQM_CMD(x) = ('X' << 8) + x.
pub(crate) const Q_XGETQUOTA: u32 = (b'X' as u32) << 8 | 3;
pub(crate) const Q_XSETQLIM: u32 = (b'X' as u32) << 8 | 4;

// if_dqblk validity flags.
const QIF_BLIMITS: u32 = 1;
const QIF_ILIMITS: u32 = 4;
pub(crate) const QIF_LIMITS: u32 = QIF_BLIMITS | QIF_ILIMITS;

// fs_disk_quota field masks and type flags.
pub(crate) const FS_DQUOT_VERSION: i8 = 1;
pub(crate) const FS_DQ_LIMIT_MASK: u16 = 0x3f;
pub(crate) const FS_USER_QUOTA: i8 = 1 << 0;
pub(crate) const FS_PROJ_QUOTA: i8 = 1 << 1;
pub(crate) const FS_GROUP_QUOTA: i8 = 1 << 2;

// fsxattr ioctls and flags.
pub(crate) const FS_IOC_FSGETXATTR: libc::c_ulong = 0x801c_581f;
pub(crate) const FS_IOC_FSSETXATTR: libc::c_ulong = 0x401c_5820;
pub(crate) const FS_XFLAG_PROJINHERIT: u32 = 0x0000_0200;

/// struct fs_disk_quota from linux/dqblk_xfs.h. Block limits and counts
/// are in 512-byte basic blocks.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub(crate) struct FsDiskQuota {
    pub d_version:       i8,
    pub d_flags:         i8,
    pub d_fieldmask:     u16,
    pub d_id:            u32,
    pub d_blk_hardlimit: u64,
    pub d_blk_softlimit: u64,
    pub d_ino_hardlimit: u64,
    pub d_ino_softlimit: u64,
    pub d_bcount:        u64,
    pub d_icount:        u64,
    pub d_itimer:        i32,
    pub d_btimer:        i32,
    pub d_iwarns:        u16,
    pub d_bwarns:        u16,
    pub d_padding2:      i32,
    pub d_rtb_hardlimit: u64,
    pub d_rtb_softlimit: u64,
    pub d_rtbcount:      u64,
    pub d_rtbtimer:      i32,
    pub d_rtbwarns:      u16,
    pub d_padding3:      i16,
    pub d_padding4:      [u8; 8],
}

/// struct if_dqblk from linux/quota.h. Block limits are 1KiB blocks,
/// dqb_curspace is in bytes.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub(crate) struct IfDqblk {
    pub dqb_bhardlimit: u64,
    pub dqb_bsoftlimit: u64,
    pub dqb_curspace:   u64,
    pub dqb_ihardlimit: u64,
    pub dqb_isoftlimit: u64,
    pub dqb_curinodes:  u64,
    pub dqb_btime:      u64,
    pub dqb_itime:      u64,
    pub dqb_valid:      u32,
}

/// struct fsxattr from linux/fs.h.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub(crate) struct Fsxattr {
    pub fsx_xflags:     u32,
    pub fsx_extsize:    u32,
    pub fsx_nextents:   u32,
    pub fsx_projid:     u32,
    pub fsx_cowextsize: u32,
    pub fsx_pad:        [u8; 8],
}

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

/// The quotactl(2) system call against a block device.
pub(crate) fn quotactl(cmd: i32, device: &str, id: u32, data: *mut libc::c_char) -> Result<(), i32> {
    let dev = match CString::new(device.as_bytes()) {
        Ok(d) => d,
        Err(_) => return Err(libc::EINVAL),
    };
    let rc = unsafe { libc::quotactl(cmd, dev.as_ptr(), id as libc::c_int, data) };
    if rc != 0 {
        Err(last_errno())
    } else {
        Ok(())
    }
}

/// The statfs(2) system call.
pub(crate) fn statfs(path: &Path) -> io::Result<libc::statfs> {
    let cpath = CString::new(path.as_os_str().as_bytes())?;
    let mut st: libc::statfs = unsafe { mem::zeroed() };
    let rc = unsafe { libc::statfs(cpath.as_ptr(), &mut st) };
    if rc != 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(st)
    }
}

/// Fetch the extended attributes of an open file.
pub(crate) fn fsgetxattr(file: &File) -> Result<Fsxattr, i32> {
    let mut attr = Fsxattr::default();
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), FS_IOC_FSGETXATTR, &mut attr as *mut Fsxattr) };
    if rc < 0 {
        Err(last_errno())
    } else {
        Ok(attr)
    }
}

/// Write back the extended attributes of an open file.
pub(crate) fn fssetxattr(file: &File, attr: &Fsxattr) -> Result<(), i32> {
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), FS_IOC_FSSETXATTR, attr as *const Fsxattr) };
    if rc < 0 {
        Err(last_errno())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qcmd_encoding() {
        // Q_XGETQUOTA for user quotas, as quotactl expects it.
        assert_eq!(qcmd(Q_XGETQUOTA, 0), 0x0058_0300);
        assert_eq!(qcmd(Q_XSETQLIM, 2), 0x0058_0402);
        assert_eq!(qcmd(Q_GETQUOTA, 1), 0x8000_0701u32 as i32);
    }

    #[test]
    fn native_struct_layout() {
        // Sizes must match the kernel uapi headers, or the ioctls would
        // clobber memory.
        assert_eq!(mem::size_of::<FsDiskQuota>(), 112);
        assert_eq!(mem::size_of::<IfDqblk>(), 72);
        assert_eq!(mem::size_of::<Fsxattr>(), 28);
    }
}
