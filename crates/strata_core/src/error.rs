use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("invalid identifier: {message}")]
    InvalidIdentifier { message: String },
    #[error("shard ddl failed for {table}: {message}")]
    ShardDdl { table: String, message: String },
    #[error("shard upsert failed for {table}: {message}")]
    ShardUpsert { table: String, message: String },
    #[error("view rebuild failed for {view}: {message}")]
    ViewRebuild { view: String, message: String },
    #[error("batch terminated: {message}")]
    BatchTerminated { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("validation error: {message}")]
    Validation { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
}

impl StrataError {
    pub fn invalid_identifier(message: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            message: message.into(),
        }
    }

    pub fn shard_ddl(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ShardDdl {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn shard_upsert(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ShardUpsert {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn view_rebuild(view: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ViewRebuild {
            view: view.into(),
            message: message.into(),
        }
    }

    pub fn terminated(message: impl Into<String>) -> Self {
        Self::BatchTerminated {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Errors that must unwind a whole batch instead of being folded into its result.
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier { .. } | Self::BatchTerminated { .. }
        )
    }
}

pub type StrataResult<T> = Result<T, StrataError>;

impl From<sea_orm::DbErr> for StrataError {
    fn from(value: sea_orm::DbErr) -> Self {
        StrataError::storage(value.to_string())
    }
}
