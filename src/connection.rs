//! The connection and statement manager.
//!
//! Built directly on `libsqlite3_sys`'s raw FFI rather than `rusqlite`'s
//! safe wrapper: a finalized statement's handle must never be mistaken for
//! a live one, and SQLite is free to hand a later
//! `sqlite3_prepare_v2` call the exact same pointer a previous statement
//! held before it was finalized. Every prepared statement is therefore
//! addressed from the outside by a fresh opaque token, never by its raw
//! pointer — the pointer lives only in the map this connection owns.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

use libsqlite3_sys as ffi;
use parking_lot::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::value::Value;

/// Identifies one prepared statement for the lifetime of a connection.
/// Carries no relationship to the underlying `sqlite3_stmt` pointer beyond
/// the connection's internal map, so a finalized statement's token can
/// never collide with a later statement reusing its freed memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementToken(Uuid);

impl StatementToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

pub enum StepResult {
    Row,
    Done,
}

/// A read-only connection opened against a named VFS, and every statement
/// prepared against it that hasn't yet been finalized.
pub struct Connection {
    db: *mut ffi::sqlite3,
    statements: Mutex<HashMap<StatementToken, *mut ffi::sqlite3_stmt>>,
}

// `db` and every `sqlite3_stmt` pointer are only ever dereferenced through
// `&self`/`&mut self` methods serialized by `statements`' mutex; SQLite
// itself is safe to call from any one thread at a time once opened.
unsafe impl Send for Connection {}

impl Connection {
    #[instrument(skip(vfs_name, file_name))]
    pub fn open(vfs_name: &str, file_name: &str) -> Result<Self> {
        let c_file = CString::new(file_name).map_err(|e| Error::Io(e.to_string()))?;
        let c_vfs = CString::new(vfs_name).map_err(|e| Error::Io(e.to_string()))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_URI;
        let rc = unsafe { ffi::sqlite3_open_v2(c_file.as_ptr(), &mut db, flags, c_vfs.as_ptr()) };

        if rc != ffi::SQLITE_OK {
            let err = if db.is_null() {
                Error::sqlite(rc, "failed to open connection")
            } else {
                let msg = unsafe { last_error_message(db) };
                unsafe {
                    ffi::sqlite3_close(db);
                }
                Error::sqlite(rc, msg)
            };
            return Err(err);
        }

        debug!(vfs_name, file_name, "opened connection");
        Ok(Self {
            db,
            statements: Mutex::new(HashMap::new()),
        })
    }

    /// Compiles every statement in `sql`, in order, returning one token per
    /// statement. Mirrors `sqlite3_prepare_v2`'s own notion of "the next
    /// statement" — a trailing comment or whitespace after the last `;`
    /// yields no extra token.
    pub fn prepare_all(&self, sql: &str) -> Result<Vec<StatementToken>> {
        let c_sql = CString::new(sql).map_err(|e| Error::Io(e.to_string()))?;
        let mut remaining: *const c_char = c_sql.as_ptr();
        let mut tokens = Vec::new();

        loop {
            let remaining_str = unsafe { CStr::from_ptr(remaining) }
                .to_str()
                .map_err(|e| Error::Io(e.to_string()))?;
            if remaining_str.trim().is_empty() {
                break;
            }

            let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
            let mut tail: *const c_char = ptr::null();
            let rc = unsafe { ffi::sqlite3_prepare_v2(self.db, remaining, -1, &mut stmt, &mut tail) };
            if rc != ffi::SQLITE_OK {
                return Err(Error::sqlite(rc, unsafe { last_error_message(self.db) }));
            }

            if stmt.is_null() {
                // Remaining text was only whitespace or a comment; advance
                // and keep looking.
                remaining = tail;
                continue;
            }

            let token = StatementToken::new();
            self.statements.lock().insert(token, stmt);
            tokens.push(token);
            remaining = tail;
        }

        Ok(tokens)
    }

    pub fn column_count(&self, token: StatementToken) -> Result<usize> {
        let stmt = self.stmt_ptr(token)?;
        Ok(unsafe { ffi::sqlite3_column_count(stmt) } as usize)
    }

    pub fn column_name(&self, token: StatementToken, index: usize) -> Result<String> {
        let stmt = self.stmt_ptr(token)?;
        let ptr = unsafe { ffi::sqlite3_column_name(stmt, index as c_int) };
        if ptr.is_null() {
            return Err(Error::sqlite(ffi::SQLITE_NOMEM, "out of memory reading column name"));
        }
        Ok(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    /// Binds `params` to `?`-style positional placeholders, 1-indexed.
    pub fn bind_positional(&self, token: StatementToken, params: &[Value]) -> Result<()> {
        let stmt = self.stmt_ptr(token)?;
        for (i, value) in params.iter().enumerate() {
            self.bind_one(stmt, (i + 1) as c_int, value)?;
        }
        Ok(())
    }

    /// Binds named parameters. Each name must include whatever sigil (`:`,
    /// `@`, `$`) the statement text itself uses — SQLite's parameter index
    /// lookup is sigil-sensitive.
    pub fn bind_named(&self, token: StatementToken, params: &[(String, Value)]) -> Result<()> {
        let stmt = self.stmt_ptr(token)?;
        for (name, value) in params {
            let c_name = CString::new(name.as_str()).map_err(|e| Error::Io(e.to_string()))?;
            let idx = unsafe { ffi::sqlite3_bind_parameter_index(stmt, c_name.as_ptr()) };
            if idx == 0 {
                return Err(Error::UnknownParameter(name.clone()));
            }
            self.bind_one(stmt, idx, value)?;
        }
        Ok(())
    }

    fn bind_one(&self, stmt: *mut ffi::sqlite3_stmt, idx: c_int, value: &Value) -> Result<()> {
        let rc = match value {
            Value::Integer(v) => unsafe { ffi::sqlite3_bind_int64(stmt, idx, *v) },
            Value::Double(v) => unsafe { ffi::sqlite3_bind_double(stmt, idx, *v) },
            Value::Text(v) => unsafe {
                ffi::sqlite3_bind_text(
                    stmt,
                    idx,
                    v.as_ptr() as *const c_char,
                    v.len() as c_int,
                    ffi::SQLITE_TRANSIENT(),
                )
            },
            Value::Blob(v) => unsafe {
                if v.is_empty() {
                    ffi::sqlite3_bind_zeroblob(stmt, idx, 0)
                } else {
                    ffi::sqlite3_bind_blob(
                        stmt,
                        idx,
                        v.as_ptr() as *const c_void,
                        v.len() as c_int,
                        ffi::SQLITE_TRANSIENT(),
                    )
                }
            },
            Value::Null => unsafe { ffi::sqlite3_bind_null(stmt, idx) },
        };
        if rc != ffi::SQLITE_OK {
            return Err(Error::sqlite(rc, unsafe { last_error_message(self.db) }));
        }
        Ok(())
    }

    pub fn step(&self, token: StatementToken) -> Result<StepResult> {
        let stmt = self.stmt_ptr(token)?;
        match unsafe { ffi::sqlite3_step(stmt) } {
            ffi::SQLITE_ROW => Ok(StepResult::Row),
            ffi::SQLITE_DONE => Ok(StepResult::Done),
            rc => Err(Error::sqlite(rc, unsafe { last_error_message(self.db) })),
        }
    }

    pub fn column_value(&self, token: StatementToken, index: usize) -> Result<Value> {
        let stmt = self.stmt_ptr(token)?;
        let idx = index as c_int;
        let value = unsafe {
            match ffi::sqlite3_column_type(stmt, idx) {
                ffi::SQLITE_INTEGER => Value::Integer(ffi::sqlite3_column_int64(stmt, idx)),
                ffi::SQLITE_FLOAT => Value::Double(ffi::sqlite3_column_double(stmt, idx)),
                ffi::SQLITE_TEXT => {
                    let text_ptr = ffi::sqlite3_column_text(stmt, idx);
                    let len = ffi::sqlite3_column_bytes(stmt, idx) as usize;
                    if text_ptr.is_null() {
                        Value::Text(String::new())
                    } else {
                        let slice = std::slice::from_raw_parts(text_ptr, len);
                        Value::Text(String::from_utf8_lossy(slice).into_owned())
                    }
                }
                ffi::SQLITE_BLOB => {
                    let blob_ptr = ffi::sqlite3_column_blob(stmt, idx);
                    let len = ffi::sqlite3_column_bytes(stmt, idx) as usize;
                    if blob_ptr.is_null() || len == 0 {
                        Value::Blob(Vec::new())
                    } else {
                        let slice = std::slice::from_raw_parts(blob_ptr as *const u8, len);
                        Value::Blob(slice.to_vec())
                    }
                }
                _ => Value::Null,
            }
        };
        Ok(value)
    }

    /// Finalizes a statement, removing it from the live set. Calling this
    /// twice on the same token is a no-op — the second call sees the token
    /// already gone and succeeds silently. A non-OK result from `sqlite3_finalize`
    /// itself is swallowed rather than returned: it almost always just
    /// restates a step/prepare error the caller already saw, and surfacing
    /// it here would mask that original error with a redundant one.
    pub fn finalize(&self, token: StatementToken) -> Result<()> {
        let stmt = self.statements.lock().remove(&token);
        if let Some(stmt) = stmt {
            let rc = unsafe { ffi::sqlite3_finalize(stmt) };
            if rc != ffi::SQLITE_OK {
                debug!(code = rc, "sqlite3_finalize returned an error; swallowing it");
            }
        }
        Ok(())
    }

    pub fn is_live(&self, token: StatementToken) -> bool {
        self.statements.lock().contains_key(&token)
    }

    fn stmt_ptr(&self, token: StatementToken) -> Result<*mut ffi::sqlite3_stmt> {
        self.statements
            .lock()
            .get(&token)
            .copied()
            .ok_or(Error::FinalizedStatement)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let tokens: Vec<StatementToken> = self.statements.lock().keys().copied().collect();
        for token in tokens {
            let _ = self.finalize(token);
        }
        unsafe {
            ffi::sqlite3_close(self.db);
        }
    }
}

unsafe fn last_error_message(db: *mut ffi::sqlite3) -> String {
    let ptr = ffi::sqlite3_errmsg(db);
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}
