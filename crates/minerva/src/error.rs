use std::fmt;

use tokio_postgres::{self, error::SqlState};

#[derive(thiserror::Error, Debug)]
pub enum DatabaseError {
    #[error("{0}")]
    Default(String),
    #[error("{0}")]
    UniqueViolation(String),
}

impl DatabaseError {
    #[must_use]
    pub fn from_msg(msg: String) -> DatabaseError {
        DatabaseError::Default(msg)
    }

    pub fn from_postgres_error(msg: &str, e: tokio_postgres::Error) -> DatabaseError {
        DatabaseError::Default(format!("{msg}: {}", postgres_error_to_string(e)))
    }
}

pub fn postgres_error_to_string(error: tokio_postgres::Error) -> String {
    match error.as_db_error() {
        Some(db_error) => match db_error.detail() {
            Some(detail) => format!("{}: {}", db_error.message(), detail),
            None => db_error.message().to_string(),
        },
        None => error.to_string(),
    }
}

impl From<tokio_postgres::Error> for DatabaseError {
    fn from(err: tokio_postgres::Error) -> DatabaseError {
        let unique_violation = err.code() == Some(&SqlState::UNIQUE_VIOLATION);
        let error_msg = postgres_error_to_string(err);

        if unique_violation {
            DatabaseError::UniqueViolation(error_msg)
        } else {
            DatabaseError::Default(error_msg)
        }
    }
}

/// Inconsistent or incomplete definitions: unknown source parts, relation
/// mismatches, granularities without a known mapping.
#[derive(Debug)]
pub struct ConfigurationError {
    pub msg: String,
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.msg)
    }
}

impl ConfigurationError {
    #[must_use]
    pub fn from_msg(msg: String) -> ConfigurationError {
        ConfigurationError { msg }
    }
}

#[derive(Debug)]
pub struct RuntimeError {
    pub msg: String,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.msg)
    }
}

impl RuntimeError {
    #[must_use]
    pub fn from_msg(msg: String) -> RuntimeError {
        RuntimeError { msg }
    }
}

impl From<String> for RuntimeError {
    fn from(msg: String) -> RuntimeError {
        RuntimeError { msg }
    }
}

/// Input that violates a precondition of the operation, like a timestamp
/// without timezone information.
#[derive(Debug)]
pub struct InputError {
    pub msg: String,
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.msg)
    }
}

impl InputError {
    #[must_use]
    pub fn from_msg(msg: String) -> InputError {
        InputError { msg }
    }
}

/// A formula references a trend that could not be resolved to a table.
#[derive(Debug, PartialEq, Eq)]
pub struct NoSuchTrendError {
    pub identifier: String,
}

impl fmt::Display for NoSuchTrendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No such trend '{}'", self.identifier)
    }
}

impl std::error::Error for NoSuchTrendError {}

#[derive(Debug)]
pub enum Error {
    Database(DatabaseError),
    Configuration(ConfigurationError),
    Runtime(RuntimeError),
    Input(InputError),
    NoSuchTrend(NoSuchTrendError),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            Error::NoSuchTrend(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Database(e) => write!(f, "{}", &e),
            Error::Configuration(e) => write!(f, "{}", &e),
            Error::Runtime(e) => write!(f, "{}", &e),
            Error::Input(e) => write!(f, "{}", &e),
            Error::NoSuchTrend(e) => write!(f, "{}", &e),
        }
    }
}

impl From<DatabaseError> for Error {
    fn from(err: DatabaseError) -> Error {
        Error::Database(err)
    }
}

impl From<ConfigurationError> for Error {
    fn from(err: ConfigurationError) -> Error {
        Error::Configuration(err)
    }
}

impl From<RuntimeError> for Error {
    fn from(err: RuntimeError) -> Error {
        Error::Runtime(err)
    }
}

impl From<InputError> for Error {
    fn from(err: InputError) -> Error {
        Error::Input(err)
    }
}

impl From<NoSuchTrendError> for Error {
    fn from(err: NoSuchTrendError) -> Error {
        Error::NoSuchTrend(err)
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Error {
        Error::Database(DatabaseError::from(err))
    }
}

impl From<String> for Error {
    fn from(err: String) -> Error {
        Error::Runtime(RuntimeError { msg: err })
    }
}
