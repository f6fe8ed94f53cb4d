//! The query API façade: open a session against one versioned S3 object and
//! run SQL against it without ever pulling the whole file local.

use std::rc::Rc;

use tracing::instrument;
use uuid::Uuid;

use crate::config::FetcherConfig;
use crate::connection::{Connection, StatementToken, StepResult};
use crate::credentials::{env_provider, CredentialsProvider};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::value::{Row, Value};
use crate::vfs::{self, VfsAppData, VfsRegistration};

/// Bound parameters for one statement. `Named` keys must carry whatever
/// sigil (`:`, `@`, `$`) the SQL text itself uses. `Mixed` binds both
/// surfaces to the same statement, positional first, then named — the
/// same order a statement using both `?` and `:name` placeholders would
/// resolve them in.
#[derive(Debug, Clone)]
pub enum Params {
    None,
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
    Mixed {
        positional: Vec<Value>,
        named: Vec<(String, Value)>,
    },
}

impl Default for Params {
    fn default() -> Self {
        Params::None
    }
}

impl Params {
    fn bind(&self, connection: &Connection, token: StatementToken) -> Result<()> {
        match self {
            Params::None => Ok(()),
            Params::Positional(values) => connection.bind_positional(token, values),
            Params::Named(values) => connection.bind_named(token, values),
            Params::Mixed { positional, named } => {
                connection.bind_positional(token, positional)?;
                connection.bind_named(token, named)
            }
        }
    }
}

/// Owns the connection and the VFS registration it was opened against.
/// Field order matters: `connection` drops before `registration`, so every
/// statement finalizes and the connection closes before the VFS (and the
/// fetcher it holds) is torn down — enforced here instead of merely
/// documented, because both fields live behind one
/// `Rc` shared with every outstanding `RowCursor`. The VFS can't be
/// unregistered out from under a cursor a caller is still holding, because
/// that cursor holds a clone of the same `Rc`.
struct Inner {
    connection: Connection,
    registration: VfsRegistration,
}

/// One query session against a single versioned S3 object.
pub struct Session {
    inner: Rc<Inner>,
}

/// Builds a `Session`, letting a caller partially apply a fixed
/// url/credentials pair and reuse the builder across calls.
pub struct SessionBuilder {
    url: Option<String>,
    credentials: Option<CredentialsProvider>,
    config: FetcherConfig,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            url: None,
            credentials: None,
            config: FetcherConfig::default(),
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn credentials(mut self, provider: CredentialsProvider) -> Self {
        self.credentials = Some(provider);
        self
    }

    pub fn config(mut self, config: FetcherConfig) -> Self {
        self.config = config;
        self
    }

    #[instrument(skip(self))]
    pub fn open(self) -> Result<Session> {
        let url = self
            .url
            .ok_or_else(|| Error::Io("SessionBuilder: no url configured".to_string()))?;
        let credentials = self.credentials.unwrap_or_else(env_provider);

        let fetcher = Fetcher::new(&url, credentials, &self.config)?;
        let binding = fetcher.open()?;

        let id = Uuid::new_v4();
        let vfs_name = format!("s3-vfs-{id}");
        let file_name = format!("s3-{id}");

        let registration = vfs::register(&vfs_name, VfsAppData { fetcher, binding })
            .map_err(Error::Io)?;
        let connection = Connection::open(&vfs_name, &file_name)?;

        Ok(Session {
            inner: Rc::new(Inner {
                connection,
                registration,
            }),
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Opens a session directly, without the builder, for the common case
    /// of a fixed url and credential provider.
    pub fn open(url: impl Into<String>, credentials: CredentialsProvider) -> Result<Self> {
        SessionBuilder::new().url(url).credentials(credentials).open()
    }

    /// Convenience over `query_multi`: prepares `sql`, binds `params` to
    /// its first statement, and yields exactly that statement's
    /// `(columns, row_iterator)` pair. Any further statements `sql` text
    /// contains are finalized unread rather than run — the same "prepare
    /// once, take the first" contract `query_multi` generalizes.
    pub fn query(&self, sql: &str, params: Params) -> Result<(Vec<String>, RowCursor)> {
        let mut tokens = self.inner.connection.prepare_all(sql)?.into_iter();
        let token = tokens
            .next()
            .ok_or_else(|| Error::Io("query: sql contained no statements".to_string()))?;
        for tail in tokens {
            self.inner.connection.finalize(tail)?;
        }

        params.bind(&self.inner.connection, token)?;
        let columns = self.columns_of(token)?;
        Ok((columns, self.cursor(token)))
    }

    /// Runs every statement in `sql` in order, returning one
    /// `(columns, row_iterator)` pair per statement. `params[i]` binds to
    /// the `i`-th statement; statements past the end of `params` run with
    /// no bound parameters.
    pub fn query_multi(&self, sql: &str, params: &[Params]) -> Result<Vec<(Vec<String>, RowCursor)>> {
        let tokens = self.inner.connection.prepare_all(sql)?;
        let mut results = Vec::with_capacity(tokens.len());

        for (index, token) in tokens.into_iter().enumerate() {
            if let Some(p) = params.get(index) {
                p.bind(&self.inner.connection, token)?;
            }
            let columns = self.columns_of(token)?;
            results.push((columns, self.cursor(token)));
        }

        Ok(results)
    }

    fn columns_of(&self, token: StatementToken) -> Result<Vec<String>> {
        let count = self.inner.connection.column_count(token)?;
        (0..count)
            .map(|i| self.inner.connection.column_name(token, i))
            .collect()
    }

    fn cursor(&self, token: StatementToken) -> RowCursor {
        RowCursor {
            inner: Rc::clone(&self.inner),
            token,
            exhausted: false,
        }
    }
}

/// A lazy, single-pass, forward-only iterator over one statement's result
/// rows. Stepping past the last row finalizes the statement automatically;
/// calling `finalize` early does the same. Once a statement is finalized —
/// whether by reaching the end or by an explicit `finalize` call — every
/// further pull reports `Error::FinalizedStatement` rather than silently
/// going quiet or touching freed memory.
pub struct RowCursor {
    inner: Rc<Inner>,
    token: StatementToken,
    exhausted: bool,
}

impl RowCursor {
    /// Finalizes the underlying statement before it's naturally exhausted.
    /// Safe to call more than once.
    pub fn finalize(&self) -> Result<()> {
        self.inner.connection.finalize(self.token)
    }
}

impl Iterator for RowCursor {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        match self.inner.connection.step(self.token) {
            Ok(StepResult::Row) => match self.read_row() {
                Ok(row) => Some(Ok(row)),
                Err(e) => {
                    self.exhausted = true;
                    Some(Err(e))
                }
            },
            Ok(StepResult::Done) => {
                self.exhausted = true;
                let _ = self.inner.connection.finalize(self.token);
                None
            }
            Err(Error::FinalizedStatement) => Some(Err(Error::FinalizedStatement)),
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

impl RowCursor {
    fn read_row(&self) -> Result<Row> {
        let count = self.inner.connection.column_count(self.token)?;
        (0..count)
            .map(|i| self.inner.connection.column_value(self.token, i))
            .collect()
    }
}

impl Drop for RowCursor {
    fn drop(&mut self) {
        if !self.exhausted {
            let _ = self.inner.connection.finalize(self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_default_to_none() {
        assert!(matches!(Params::default(), Params::None));
    }
}
