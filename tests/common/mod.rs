//! In-memory engine reproducing the InnoDB behaviour the version protocol relies on.
//!
//! Modelled: single-row tables, `SELECT ... FOR UPDATE` row locks, uncommitted
//! writes visible only to their session, implicit commit on `CREATE TABLE`,
//! `SET AUTOCOMMIT`, `COMMIT`/`ROLLBACK`, rollback when a session ends, and
//! MySQL error numbers 1050/1062/1146. Statements it does not model succeed
//! without effect.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::{Value as JsonValue, json};
use sqlx_mysql_toolkit::{
   ConnectionProvider, DatabaseClient, ER_NO_SUCH_TABLE, ER_TABLE_EXISTS_ERROR, Error, Result,
   Row, WriteQueryResult, async_trait,
};
use tokio::sync::Notify;

const ER_DUP_ENTRY: u16 = 1062;

#[derive(Debug, Default)]
struct Table {
   committed: Option<i64>,
   /// Row as written by the lock holder, until commit or rollback
   pending: Option<Option<i64>>,
   lock_owner: Option<u64>,
}

impl Table {
   fn view(&self, session: u64) -> Option<i64> {
      match (self.pending, self.lock_owner) {
         (Some(row), Some(owner)) if owner == session => row,
         _ => self.committed,
      }
   }
}

#[derive(Debug, Default)]
struct State {
   tables: HashMap<String, Table>,
   failures: Vec<(String, u16)>,
   statements: Vec<(u64, String)>,
   sessions: HashSet<u64>,
   unavailable: bool,
}

/// Shared database; clone the [`MemoryProvider`] to simulate several processes.
#[derive(Debug, Default)]
pub struct MemoryEngine {
   state: Mutex<State>,
   released: Notify,
   next_session: AtomicU64,
}

impl MemoryEngine {
   pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
   }

   pub fn provider(self: &Arc<Self>) -> MemoryProvider {
      MemoryProvider {
         engine: Arc::clone(self),
      }
   }

   /// Create `table` holding a committed `value`.
   pub fn seed_version(&self, table: &str, value: i64) {
      let mut state = self.state.lock();
      let entry = state.tables.entry(table.to_string()).or_default();
      entry.committed = Some(value);
   }

   pub fn create_empty_table(&self, table: &str) {
      self.state.lock().tables.entry(table.to_string()).or_default();
   }

   /// Committed value, as a fresh session would read it.
   pub fn version(&self, table: &str) -> Option<i64> {
      self.state.lock().tables.get(table).and_then(|t| t.committed)
   }

   pub fn table_exists(&self, table: &str) -> bool {
      self.state.lock().tables.contains_key(table)
   }

   pub fn is_locked(&self, table: &str) -> bool {
      self
         .state
         .lock()
         .tables
         .get(table)
         .is_some_and(|t| t.lock_owner.is_some())
   }

   /// Fail the next statement starting with `prefix` (case-insensitive) with MySQL error `number`.
   pub fn fail_next(&self, prefix: &str, number: u16) {
      self
         .state
         .lock()
         .failures
         .push((normalize(prefix), number));
   }

   /// Refuse new connections.
   pub fn set_unavailable(&self, unavailable: bool) {
      self.state.lock().unavailable = unavailable;
   }

   /// Every statement run so far, normalized, with the session that ran it.
   pub fn statements(&self) -> Vec<(u64, String)> {
      self.state.lock().statements.clone()
   }

   pub fn count_statements(&self, statement: &str) -> usize {
      let statement = normalize(statement);
      self
         .state
         .lock()
         .statements
         .iter()
         .filter(|(_, s)| *s == statement)
         .count()
   }

   pub fn open_sessions(&self) -> usize {
      self.state.lock().sessions.len()
   }

   fn open_session(&self) -> Result<u64> {
      let mut state = self.state.lock();
      if state.unavailable {
         return Err(Error::Other("connect ECONNREFUSED 127.0.0.1:3306".into()));
      }
      let session = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
      state.sessions.insert(session);
      Ok(session)
   }

   fn end_session(&self, session: u64) {
      self.rollback(session);
      self.state.lock().sessions.remove(&session);
   }

   fn commit(&self, session: u64) {
      {
         let mut state = self.state.lock();
         for table in state.tables.values_mut() {
            if table.lock_owner == Some(session) {
               if let Some(row) = table.pending.take() {
                  table.committed = row;
               }
               table.lock_owner = None;
            }
         }
      }
      self.released.notify_waiters();
   }

   fn rollback(&self, session: u64) {
      {
         let mut state = self.state.lock();
         for table in state.tables.values_mut() {
            if table.lock_owner == Some(session) {
               table.pending = None;
               table.lock_owner = None;
            }
         }
      }
      self.released.notify_waiters();
   }

   async fn lock_row(&self, session: u64, name: &str) -> Result<()> {
      loop {
         let released = self.released.notified();
         {
            let mut state = self.state.lock();
            let table = state
               .tables
               .get_mut(name)
               .ok_or_else(|| no_such_table(name))?;
            match table.lock_owner {
               None => {
                  table.lock_owner = Some(session);
                  return Ok(());
               }
               Some(owner) if owner == session => return Ok(()),
               Some(_) => {}
            }
         }
         released.await;
      }
   }

   async fn run(
      &self,
      session: u64,
      autocommit: &mut bool,
      sql: &str,
      params: &[JsonValue],
   ) -> Result<Vec<Row>> {
      tokio::task::yield_now().await;

      let statement = normalize(sql);
      {
         let mut state = self.state.lock();
         state.statements.push((session, statement.clone()));
         if let Some(pos) = state
            .failures
            .iter()
            .position(|(prefix, _)| statement.starts_with(prefix.as_str()))
         {
            let (_, number) = state.failures.remove(pos);
            return Err(Error::server(number, format!("injected failure: {statement}")));
         }
      }

      match statement.as_str() {
         "set autocommit=0" => {
            *autocommit = false;
            return Ok(vec![]);
         }
         "set autocommit=1" => {
            self.commit(session);
            *autocommit = true;
            return Ok(vec![]);
         }
         "commit" => {
            self.commit(session);
            return Ok(vec![]);
         }
         "rollback" => {
            self.rollback(session);
            return Ok(vec![]);
         }
         "show variables like 'version%'" => {
            return Ok(vec![
               variable("version", "10.11.6-MariaDB"),
               variable("version_comment", "MariaDB Server"),
            ]);
         }
         _ => {}
      }

      let words: Vec<&str> = statement.split_whitespace().collect();
      let result = match words.as_slice() {
         ["create", "table", name, ..] => self.create_table(session, table_name(name)).map(|_| vec![]),
         ["insert", "into", name, "values", ..] => match parse_values(&statement) {
            Ok(value) => self.insert(session, table_name(name), value).await.map(|_| vec![]),
            Err(e) => Err(e),
         },
         ["select", "value", "from", name, rest @ ..] => {
            let for_update = rest == ["for", "update"];
            self.select(session, table_name(name), for_update).await
         }
         ["update", name, "set", "value", "=", "?"] => {
            match params.first().and_then(JsonValue::as_i64) {
               Some(value) => self.update(session, table_name(name), value).await.map(|_| vec![]),
               None => Err(Error::Other("update without integer parameter".into())),
            }
         }
         _ => Ok(vec![]),
      };

      // Autocommit wraps each statement in its own transaction
      if *autocommit {
         match result {
            Ok(_) => self.commit(session),
            Err(_) => self.rollback(session),
         }
      }
      result
   }

   fn create_table(&self, session: u64, name: &str) -> Result<()> {
      // DDL ends the open transaction
      self.commit(session);

      let mut state = self.state.lock();
      if state.tables.contains_key(name) {
         return Err(Error::server(
            ER_TABLE_EXISTS_ERROR,
            format!("Table '{name}' already exists"),
         ));
      }
      state.tables.insert(name.to_string(), Table::default());
      Ok(())
   }

   async fn insert(&self, session: u64, name: &str, value: i64) -> Result<()> {
      self.lock_row(session, name).await?;

      let mut state = self.state.lock();
      let table = state
         .tables
         .get_mut(name)
         .ok_or_else(|| no_such_table(name))?;
      if table.view(session).is_some() {
         return Err(Error::server(
            ER_DUP_ENTRY,
            format!("Duplicate entry '{value}' for key 'PRIMARY'"),
         ));
      }
      table.pending = Some(Some(value));
      Ok(())
   }

   async fn select(&self, session: u64, name: &str, for_update: bool) -> Result<Vec<Row>> {
      if for_update {
         self.lock_row(session, name).await?;
      }

      let state = self.state.lock();
      let table = state.tables.get(name).ok_or_else(|| no_such_table(name))?;
      Ok(table
         .view(session)
         .map(|value| {
            let mut row = Row::new();
            row.insert("value".into(), json!(value));
            row
         })
         .into_iter()
         .collect())
   }

   async fn update(&self, session: u64, name: &str, value: i64) -> Result<()> {
      self.lock_row(session, name).await?;

      let mut state = self.state.lock();
      let table = state
         .tables
         .get_mut(name)
         .ok_or_else(|| no_such_table(name))?;
      let current = table.view(session);
      table.pending = Some(current.map(|_| value));
      Ok(())
   }
}

fn normalize(sql: &str) -> String {
   sql.split_whitespace()
      .collect::<Vec<_>>()
      .join(" ")
      .to_lowercase()
}

fn table_name(word: &str) -> &str {
   word.split('(').next().unwrap_or(word)
}

fn parse_values(statement: &str) -> Result<i64> {
   statement
      .split_once('(')
      .and_then(|(_, rest)| rest.split_once(')'))
      .and_then(|(value, _)| value.trim().parse().ok())
      .ok_or_else(|| Error::Other(format!("unsupported insert: {statement}")))
}

fn no_such_table(name: &str) -> Error {
   Error::server(
      ER_NO_SUCH_TABLE,
      format!("Table 'app.{name}' doesn't exist"),
   )
}

fn variable(name: &str, value: &str) -> Row {
   let mut row = Row::new();
   row.insert("Variable_name".into(), json!(name));
   row.insert("Value".into(), json!(value));
   row
}

/// [`ConnectionProvider`] over a [`MemoryEngine`].
#[derive(Debug, Clone)]
pub struct MemoryProvider {
   engine: Arc<MemoryEngine>,
}

#[async_trait]
impl ConnectionProvider for MemoryProvider {
   type Client = MemoryClient;

   fn get_client(&self, _pool_selector: Option<&str>) -> MemoryClient {
      MemoryClient {
         engine: Arc::clone(&self.engine),
         session: None,
         autocommit: true,
      }
   }

   async fn close(&self) -> Result<()> {
      self.engine.set_unavailable(true);
      Ok(())
   }
}

/// One session; dropping it without closing behaves like a lost connection.
#[derive(Debug)]
pub struct MemoryClient {
   engine: Arc<MemoryEngine>,
   session: Option<u64>,
   autocommit: bool,
}

impl MemoryClient {
   async fn run(&mut self, sql: &str, params: Vec<JsonValue>) -> Result<Vec<Row>> {
      let session = self.session.ok_or(Error::NotOpen)?;
      self
         .engine
         .run(session, &mut self.autocommit, sql, &params)
         .await
   }
}

#[async_trait]
impl DatabaseClient for MemoryClient {
   async fn open(&mut self) -> Result<()> {
      self.session = Some(self.engine.open_session()?);
      self.autocommit = true;
      Ok(())
   }

   async fn close(&mut self) -> Result<()> {
      if let Some(session) = self.session.take() {
         self.engine.end_session(session);
      }
      Ok(())
   }

   async fn fetch_one(&mut self, sql: &str, params: Vec<JsonValue>) -> Result<Option<Row>> {
      Ok(self.run(sql, params).await?.into_iter().next())
   }

   async fn fetch_all(&mut self, sql: &str, params: Vec<JsonValue>) -> Result<Vec<Row>> {
      self.run(sql, params).await
   }

   async fn execute(&mut self, sql: &str, params: Vec<JsonValue>) -> Result<WriteQueryResult> {
      self.run(sql, params).await?;
      Ok(WriteQueryResult::default())
   }
}

impl Drop for MemoryClient {
   fn drop(&mut self) {
      if let Some(session) = self.session.take() {
         self.engine.end_session(session);
      }
   }
}

/// Send test logs to the test writer; safe to call from every test.
pub fn init_tracing() {
   let _ = tracing_subscriber::fmt()
      .with_test_writer()
      .with_max_level(tracing::Level::DEBUG)
      .try_init();
}
