//! Read-only SQL queries against a SQLite database file stored as a
//! versioned S3 object.
//!
//! A session opens a connection through a custom SQLite VFS that issues
//! authenticated, ranged HTTP GETs pinned to one object version instead of
//! downloading the file. See [`Session`] for the entry point.
//!
//! ```no_run
//! use sqlite_s3_query::{Params, Session};
//!
//! # fn run() -> sqlite_s3_query::Result<()> {
//! let session = Session::builder()
//!     .url("https://my-bucket.s3.amazonaws.com/my.db")
//!     .open()?;
//!
//! let (columns, rows) = session.query("SELECT * FROM my_table", Params::None)?;
//! for row in rows {
//!     let row = row?;
//!     println!("{columns:?}: {row:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
mod credentials;
mod error;
mod fetch;
mod session;
mod sigv4;
mod value;
mod vfs;

pub use config::FetcherConfig;
pub use credentials::{env_provider, Credentials, CredentialsProvider};
pub use error::{Error, Result};
pub use session::{Params, RowCursor, Session, SessionBuilder};
pub use value::{Row, Value};
