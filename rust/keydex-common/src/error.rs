use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        Error(ErrorKind::InvalidOperation { name: name.into() }.into())
    }

    pub fn invalid_format(element: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidFormat {
                element: element.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Io {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    pub fn hash_collision(bucket: u64) -> Error {
        Error(ErrorKind::HashCollision { bucket }.into())
    }

    pub fn aborted(context: impl Into<String>) -> Error {
        Error(
            ErrorKind::Aborted {
                context: context.into(),
            }
            .into(),
        )
    }

    /// Whether this error indicates a hash collision that can be resolved by
    /// rebuilding with a different salt.
    pub fn is_hash_collision(&self) -> bool {
        matches!(self.kind(), ErrorKind::HashCollision { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.kind(), ErrorKind::Aborted { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    /// Corrupt or inconsistent encoded structure: either a structural
    /// invariant violated during construction, or a damaged artifact
    /// discovered at lookup time.
    #[error("invalid format for '{element}': {message}")]
    InvalidFormat { element: String, message: String },

    #[error("IO error for '{context}': {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    /// Two distinct keys produced the same fingerprint within one bucket.
    /// Recoverable: rebuild with the next salt.
    #[error("hash collision in bucket {bucket}")]
    HashCollision { bucket: u64 },

    #[error("operation aborted: {context}")]
    Aborted { context: String },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io("", e)
    }
}
