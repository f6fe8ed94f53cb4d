//! The S3-backed VFS: a named SQLite virtual file system whose only real
//! file routes every page read through the fetcher's ranged GET.
//!
//! SQLite's VFS contract is a pair of C ABI vtables (`sqlite3_vfs` and
//! `sqlite3_io_methods`) with no safe Rust equivalent — this is the one
//! place in the crate built directly on `libsqlite3_sys`'s raw bindings
//! rather than on `rusqlite`'s safe wrapper, because no safe wrapper for
//! VFS registration exists. Every callback here is called back into from C,
//! so each one is wrapped in `catch_unwind`: an unwind crossing the FFI
//! boundary is undefined behavior.

use std::ffi::{c_void, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use libsqlite3_sys as ffi;
use tracing::{debug, warn};

use crate::fetch::{Fetcher, ObjectBinding};

/// Immutable — tells SQLite's pager to skip change-counter re-reads, since
/// the object version this session is pinned to never changes underneath
/// it.
const SQLITE_IOCAP_IMMUTABLE: c_int = 0x0000_2000;

/// Data shared by every file this VFS opens: the fetcher and the version
/// binding discovered at session open. Owned by the `VfsRegistration`;
/// outlives every `S3File` built from it because the connection (and every
/// file it holds open) is always closed before the VFS is unregistered.
pub(crate) struct VfsAppData {
    pub fetcher: Fetcher,
    pub binding: ObjectBinding,
}

/// The "file" structure `xOpen` copies into SQLite-provided storage. Must
/// start with `sqlite3_file` so a `*mut sqlite3_file` from SQLite can be
/// reinterpreted as `*mut S3File` by every other callback.
#[repr(C)]
struct S3File {
    base: ffi::sqlite3_file,
    app_data: *const VfsAppData,
}

static IO_METHODS: ffi::sqlite3_io_methods = ffi::sqlite3_io_methods {
    iVersion: 1,
    xClose: Some(x_close),
    xRead: Some(x_read),
    xWrite: None,
    xTruncate: None,
    xSync: None,
    xFileSize: Some(x_file_size),
    xLock: Some(x_lock),
    xUnlock: Some(x_unlock),
    xCheckReservedLock: Some(x_check_reserved_lock),
    xFileControl: Some(x_file_control),
    xSectorSize: None,
    xDeviceCharacteristics: Some(x_device_characteristics),
    xShmMap: None,
    xShmLock: None,
    xShmBarrier: None,
    xShmUnmap: None,
    xFetch: None,
    xUnfetch: None,
};

/// A live VFS registration. Unregisters and frees the C-side vtables and
/// app data on drop, which must happen after the connection built against
/// it is closed.
pub(crate) struct VfsRegistration {
    vfs: *mut ffi::sqlite3_vfs,
    name: CString,
    app_data: *mut VfsAppData,
}

// The registration is only ever touched from the thread that opened the
// session (sessions are single-threaded, never shared concurrently); `Send` lets it
// live inside a `Session` that itself may move between threads between
// queries, as long as it is not used concurrently from two of them.
unsafe impl Send for VfsRegistration {}

impl VfsRegistration {
    pub fn name(&self) -> &str {
        self.name.to_str().expect("vfs name is ASCII")
    }
}

impl Drop for VfsRegistration {
    fn drop(&mut self) {
        unsafe {
            ffi::sqlite3_vfs_unregister(self.vfs);
            drop(Box::from_raw(self.vfs));
            drop(Box::from_raw(self.app_data));
        }
    }
}

/// Registers a new VFS named `name` backed by `app_data`. Fails only if
/// SQLite itself rejects the registration (e.g. the name collides with one
/// already registered — callers are expected to generate unique names).
pub(crate) fn register(name: &str, app_data: VfsAppData) -> Result<VfsRegistration, String> {
    let name_c = CString::new(name).map_err(|e| e.to_string())?;
    let app_data_ptr = Box::into_raw(Box::new(app_data));

    let vfs_box = Box::new(ffi::sqlite3_vfs {
        iVersion: 1,
        szOsFile: std::mem::size_of::<S3File>() as c_int,
        mxPathname: 512,
        pNext: ptr::null_mut(),
        zName: name_c.as_ptr(),
        pAppData: app_data_ptr as *mut c_void,
        xOpen: Some(x_open),
        xDelete: None,
        xAccess: Some(x_access),
        xFullPathname: Some(x_full_pathname),
        xDlOpen: None,
        xDlError: None,
        xDlSym: None,
        xDlClose: None,
        xRandomness: None,
        xSleep: None,
        xCurrentTime: Some(x_current_time),
        xGetLastError: None,
        xCurrentTimeInt64: None,
        xSetSystemCall: None,
        xGetSystemCall: None,
        xNextSystemCall: None,
    });
    let vfs_ptr = Box::into_raw(vfs_box);

    let rc = unsafe { ffi::sqlite3_vfs_register(vfs_ptr, 0) };
    if rc != ffi::SQLITE_OK {
        unsafe {
            drop(Box::from_raw(vfs_ptr));
            drop(Box::from_raw(app_data_ptr));
        }
        return Err(format!("sqlite3_vfs_register failed with code {rc}"));
    }

    debug!(vfs_name = name, "registered S3-backed VFS");
    Ok(VfsRegistration {
        vfs: vfs_ptr,
        name: name_c,
        app_data: app_data_ptr,
    })
}

fn guard<F: FnOnce() -> c_int>(label: &'static str, f: F) -> c_int {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(rc) => rc,
        Err(_) => {
            warn!(callback = label, "VFS callback panicked; reporting I/O error");
            ffi::SQLITE_IOERR
        }
    }
}

unsafe extern "C" fn x_open(
    vfs: *mut ffi::sqlite3_vfs,
    _name: *const c_char,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    out_flags: *mut c_int,
) -> c_int {
    guard("xOpen", || {
        let app_data = (*vfs).pAppData as *const VfsAppData;
        let s3file = S3File {
            base: ffi::sqlite3_file {
                pMethods: &IO_METHODS,
            },
            app_data,
        };
        ptr::write(file as *mut S3File, s3file);
        if !out_flags.is_null() {
            *out_flags = flags;
        }
        ffi::SQLITE_OK
    })
}

unsafe extern "C" fn x_access(
    _vfs: *mut ffi::sqlite3_vfs,
    _path: *const c_char,
    _flags: c_int,
    out: *mut c_int,
) -> c_int {
    guard("xAccess", || {
        // Always "does not exist" — SQLite then skips journal/WAL setup
        // entirely, matching the read-only, immutable snapshot model.
        *out = 0;
        ffi::SQLITE_OK
    })
}

unsafe extern "C" fn x_full_pathname(
    _vfs: *mut ffi::sqlite3_vfs,
    name: *const c_char,
    n_out: c_int,
    out: *mut c_char,
) -> c_int {
    guard("xFullPathname", || {
        let len = libc::strlen(name);
        if len as c_int >= n_out {
            return ffi::SQLITE_CANTOPEN;
        }
        ptr::copy_nonoverlapping(name, out, len + 1);
        ffi::SQLITE_OK
    })
}

unsafe extern "C" fn x_current_time(_vfs: *mut ffi::sqlite3_vfs, out: *mut f64) -> c_int {
    guard("xCurrentTime", || {
        let unix_seconds = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        *out = unix_seconds / 86400.0 + 2440587.5;
        ffi::SQLITE_OK
    })
}

unsafe extern "C" fn x_close(file: *mut ffi::sqlite3_file) -> c_int {
    guard("xClose", || {
        let _ = file;
        ffi::SQLITE_OK
    })
}

unsafe extern "C" fn x_read(
    file: *mut ffi::sqlite3_file,
    buf: *mut c_void,
    amount: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    guard("xRead", || {
        let s3file = &*(file as *const S3File);
        let app_data = &*s3file.app_data;
        match app_data
            .fetcher
            .read_range(&app_data.binding, offset as u64, amount as u64)
        {
            Ok(bytes) => {
                debug_assert_eq!(bytes.len(), amount as usize);
                ptr::copy_nonoverlapping(bytes.as_ptr(), buf as *mut u8, bytes.len());
                ffi::SQLITE_OK
            }
            Err(e) => {
                warn!(error = %e, offset, amount, "xRead failed");
                ffi::SQLITE_IOERR
            }
        }
    })
}

unsafe extern "C" fn x_file_size(file: *mut ffi::sqlite3_file, out: *mut ffi::sqlite3_int64) -> c_int {
    guard("xFileSize", || {
        let s3file = &*(file as *const S3File);
        let app_data = &*s3file.app_data;
        *out = app_data.binding.size as ffi::sqlite3_int64;
        ffi::SQLITE_OK
    })
}

unsafe extern "C" fn x_lock(_file: *mut ffi::sqlite3_file, _lock_type: c_int) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_unlock(_file: *mut ffi::sqlite3_file, _lock_type: c_int) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_check_reserved_lock(_file: *mut ffi::sqlite3_file, out: *mut c_int) -> c_int {
    *out = 0;
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_file_control(
    _file: *mut ffi::sqlite3_file,
    _op: c_int,
    _arg: *mut c_void,
) -> c_int {
    ffi::SQLITE_NOTFOUND
}

unsafe extern "C" fn x_device_characteristics(_file: *mut ffi::sqlite3_file) -> c_int {
    SQLITE_IOCAP_IMMUTABLE
}
