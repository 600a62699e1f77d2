use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BlogError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(commitblog::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(commitblog::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(commitblog::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(commitblog::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Git error: {0}")]
    #[diagnostic(code(commitblog::git))]
    Git(String),

    #[error("Mail error: {0}")]
    #[diagnostic(code(commitblog::mail))]
    Mail(String),

    #[error("no handler for task kind: {0}")]
    #[diagnostic(code(commitblog::unknown_task))]
    UnknownTask(String),

    #[error("Bad request: {0}")]
    #[diagnostic(code(commitblog::bad_request))]
    BadRequest(String),

    #[error("{0}")]
    #[diagnostic(code(commitblog::other))]
    Other(String),
}
