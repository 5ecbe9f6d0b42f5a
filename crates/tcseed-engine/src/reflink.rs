//! Copy-on-write block sharing between two files.
//!
//! Linux exposes range cloning through the `FICLONERANGE` ioctl (btrfs, XFS
//! with reflink=1, bcachefs, ...). Other platforms report the capability as
//! unavailable and refuse every clone with `ErrorKind::Unsupported`.

use std::fs::File;
use std::io;
use std::path::Path;

use tracing::debug;

/// Shares `length` bytes of `src` at `src_offset` into `dst` at `dst_offset`.
///
/// Offsets and length must be multiples of the filesystem block size, except
/// that the range may end at the source's EOF.
pub trait BlockCloner: Sync {
    fn clone_range(
        &self,
        dst: &File,
        src: &File,
        src_offset: u64,
        length: u64,
        dst_offset: u64,
    ) -> io::Result<()>;
}

/// The operating system's clone primitive
#[derive(Debug, Clone, Copy, Default)]
pub struct Reflink;

impl BlockCloner for Reflink {
    fn clone_range(
        &self,
        dst: &File,
        src: &File,
        src_offset: u64,
        length: u64,
        dst_offset: u64,
    ) -> io::Result<()> {
        sys::clone_range(dst, src, src_offset, length, dst_offset)
    }
}

/// Whether `err` means the filesystem declined to share blocks, as opposed to
/// a genuine read/write failure.
pub fn is_clone_unsupported(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::Unsupported {
        return true;
    }
    sys::is_unsupported_errno(err.raw_os_error())
}

/// Probe whether blocks of `source` can be shared into a file at `destination`.
///
/// `destination` need not exist yet; the probe clones the first block of the
/// source into an anonymous scratch file in the destination's directory. Any
/// failure is reported as "no".
pub fn can_clone(destination: &Path, source: &Path) -> bool {
    match probe(destination, source) {
        Ok(()) => {
            debug!(src = %source.display(), dst = %destination.display(), "reflink available");
            true
        }
        Err(e) => {
            debug!(
                src = %source.display(),
                dst = %destination.display(),
                "reflink unavailable: {e}"
            );
            false
        }
    }
}

fn probe(destination: &Path, source: &Path) -> io::Result<()> {
    use std::os::unix::fs::MetadataExt;

    let dir = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let src = File::open(source)?;
    let src_meta = src.metadata()?;
    let dir_meta = std::fs::metadata(dir)?;
    if src_meta.dev() != dir_meta.dev() {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "source and destination are on different devices",
        ));
    }
    if src_meta.len() == 0 {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "empty source has no blocks to share",
        ));
    }

    // A zero length clones through to EOF, which is the only legal unaligned
    // length and is cheap for a file shorter than one block.
    let block = src_meta.blksize();
    let length = if src_meta.len() >= block { block } else { 0 };

    let scratch = tempfile::tempfile_in(dir)?;
    Reflink.clone_range(&scratch, &src, 0, length, 0)
}

#[cfg(target_os = "linux")]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::fd::AsRawFd;

    /// `struct file_clone_range` from <linux/fs.h>
    #[repr(C)]
    struct FileCloneRange {
        src_fd: i64,
        src_offset: u64,
        src_length: u64,
        dest_offset: u64,
    }

    /// _IOW(0x94, 13, struct file_clone_range)
    const FICLONERANGE: u64 = 0x4020_940d;

    pub(super) fn clone_range(
        dst: &File,
        src: &File,
        src_offset: u64,
        length: u64,
        dst_offset: u64,
    ) -> io::Result<()> {
        let arg = FileCloneRange {
            src_fd: i64::from(src.as_raw_fd()),
            src_offset,
            src_length: length,
            dest_offset: dst_offset,
        };
        // SAFETY: both descriptors are open for the duration of the call and
        // `arg` matches the kernel's layout for FICLONERANGE.
        let rc = unsafe {
            libc::ioctl(
                dst.as_raw_fd(),
                FICLONERANGE as _,
                &arg as *const FileCloneRange,
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub(super) fn is_unsupported_errno(errno: Option<i32>) -> bool {
        matches!(
            errno,
            Some(libc::EOPNOTSUPP)
                | Some(libc::EXDEV)
                | Some(libc::EINVAL)
                | Some(libc::ENOTTY)
                | Some(libc::ENOSYS)
        )
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::fs::File;
    use std::io;

    pub(super) fn clone_range(
        _dst: &File,
        _src: &File,
        _src_offset: u64,
        _length: u64,
        _dst_offset: u64,
    ) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "range cloning is not available on this platform",
        ))
    }

    pub(super) fn is_unsupported_errno(_errno: Option<i32>) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_kind_is_clone_refusal() {
        let err = io::Error::new(io::ErrorKind::Unsupported, "nope");
        assert!(is_clone_unsupported(&err));
    }

    #[test]
    fn plain_io_error_is_not_clone_refusal() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(!is_clone_unsupported(&err));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn cross_device_errno_is_clone_refusal() {
        assert!(is_clone_unsupported(&io::Error::from_raw_os_error(libc::EXDEV)));
        assert!(!is_clone_unsupported(&io::Error::from_raw_os_error(libc::EIO)));
    }

    #[test]
    fn missing_source_cannot_clone() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(!can_clone(
            &tmp.path().join("dst"),
            &tmp.path().join("does-not-exist")
        ));
    }

    #[test]
    fn empty_source_cannot_clone() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("empty");
        std::fs::write(&src, b"").unwrap();
        assert!(!can_clone(&tmp.path().join("dst"), &src));
    }

    #[test]
    fn probe_never_panics_on_real_file() {
        // The answer depends on the filesystem backing the temp dir
        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("seed.bin");
        std::fs::write(&src, vec![7u8; 64 * 1024]).unwrap();
        let _ = can_clone(&tmp.path().join("dst.bin"), &src);
    }

    #[test]
    fn probe_leaves_no_files_behind() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("seed.bin");
        std::fs::write(&src, vec![1u8; 8192]).unwrap();
        let _ = can_clone(&tmp.path().join("dst.bin"), &src);

        let entries = std::fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
