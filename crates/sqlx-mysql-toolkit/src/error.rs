/// Result type alias for toolkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MySQL error number for `ER_TABLE_EXISTS_ERROR`.
pub const ER_TABLE_EXISTS_ERROR: u16 = 1050;

/// MySQL error number for `ER_NO_SUCH_TABLE`.
pub const ER_NO_SUCH_TABLE: u16 = 1146;

/// Error types for MySQL toolkit operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from SQLx that did not originate on the server (I/O, protocol, pool).
   #[error(transparent)]
   Sqlx(sqlx::Error),

   /// Error reported by the database server.
   #[error("[{number}] {message}")]
   Server {
      /// MySQL error number, e.g. 1146 for `ER_NO_SUCH_TABLE`.
      number: u16,
      /// SQLSTATE code, when the server sent one.
      sql_state: Option<String>,
      message: String,
   },

   /// Error from the connection manager.
   #[error(transparent)]
   ConnectionManager(#[from] sqlx_mysql_conn_mgr::Error),

   /// A query was issued on a client that is not open.
   #[error("client is not open")]
   NotOpen,

   /// MySQL type that cannot be mapped to JSON.
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),

   /// Generic error for operations that don't fit other categories.
   #[error("{0}")]
   Other(String),
}

impl From<sqlx::Error> for Error {
   fn from(err: sqlx::Error) -> Self {
      let server = err
         .as_database_error()
         .and_then(|db_err| db_err.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>())
         .map(|mysql_err| Error::Server {
            number: mysql_err.number(),
            sql_state: mysql_err.code().map(str::to_string),
            message: mysql_err.message().to_string(),
         });

      server.unwrap_or(Error::Sqlx(err))
   }
}

impl Error {
   /// Build a server error, as an engine would report it.
   pub fn server(number: u16, message: impl Into<String>) -> Self {
      Error::Server {
         number,
         sql_state: None,
         message: message.into(),
      }
   }

   /// MySQL error number, if the server reported the error.
   pub fn server_number(&self) -> Option<u16> {
      match self {
         Error::Server { number, .. } => Some(*number),
         _ => None,
      }
   }

   /// The statement tried to create a table that already exists.
   pub fn is_table_exists(&self) -> bool {
      self.server_number() == Some(ER_TABLE_EXISTS_ERROR)
   }

   /// The statement referenced a table that does not exist.
   pub fn is_no_such_table(&self) -> bool {
      self.server_number() == Some(ER_NO_SUCH_TABLE)
   }

   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Sqlx(_) => "SQLX_ERROR".to_string(),
         Error::Server { number, .. } => format!("MYSQL_{}", number),
         Error::ConnectionManager(_) => "CONNECTION_ERROR".to_string(),
         Error::NotOpen => "CLIENT_NOT_OPEN".to_string(),
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE".to_string(),
         Error::Other(_) => "ERROR".to_string(),
      }
   }
}
