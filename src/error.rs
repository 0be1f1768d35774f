//! Error taxonomy shared by tokenizing, compiling and rendering.

use std::fmt;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What went wrong.
#[derive(Debug, Error)]
pub enum ErrorKind {
    // Tokenize errors
    #[error("Unable to find closing bracket '{close}' opened near template position {offset}")]
    UnclosedDelimiter { close: String, offset: usize },
    #[error("Unclosed string in template")]
    UnclosedString,

    // Compile errors
    #[error("{0}")]
    UnparseableExpression(String),
    #[error("{tag} not expected after a {previous}")]
    UnexpectedTag { tag: String, previous: String },
    #[error("Unable to find an end tag for {tag}, expecting one of {expected}")]
    UnterminatedTag { tag: String, expected: String },
    #[error("Unable to parse logic tag '{0}'")]
    MalformedTag(String),
    #[error("Unexpected value before ':' of {0}")]
    InvalidObjectKey(String),

    // Runtime errors
    #[error("Missing value for key '{0}' in object definition.")]
    MissingObjectValue(String),
    #[error("Variable \"{0}\" does not exist.")]
    UndefinedVariable(String),
    #[error("Key \"{key}\" for {container} with keys \"{keys}\" does not exist.")]
    MissingKey {
        key: String,
        container: &'static str,
        keys: String,
    },
    #[error("Key \"{key}\" does not exist as the {container} is empty.")]
    EmptyContainerKey { key: String, container: &'static str },
    #[error("Unable to find filter {0}")]
    UnknownFilter(String),
    #[error("{0} function does not exist and is not defined in the context")]
    UnknownFunction(String),
    #[error("Test {0} is not defined.")]
    UnknownTest(String),
    #[error("{0}")]
    Runtime(String),

    // Resolution errors
    #[error("Unable to find template \"{0}\"")]
    TemplateNotFound(String),
    #[error("Unable to load template \"{name}\": {message}")]
    Load { name: String, message: String },
    #[error("Unable to use cached template \"{name}\": {message}")]
    Cache { name: String, message: String },

    #[error("Invalid data: {0}")]
    Data(#[from] serde_json::Error),

    #[error("You are using the engine in sync mode in combination with async extensions.")]
    SyncAsync,
}

/// An [`ErrorKind`] tagged with the id of the template it came from.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    template: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            template: None,
        }
    }

    /// Shorthand for a free-form runtime error, e.g. from a user filter.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime(message.into()))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Id of the innermost template the error was raised in, if known.
    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    /// Attach a template id unless one is already present.
    pub fn in_template(mut self, id: Option<&str>) -> Self {
        if self.template.is_none() {
            self.template = id.map(str::to_owned);
        }
        self
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::TemplateNotFound(_))
    }

    pub(crate) fn is_sync_async(&self) -> bool {
        matches!(self.kind, ErrorKind::SyncAsync)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.template {
            Some(id) => write!(f, "{} (in template \"{}\")", self.kind, id),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Data(err))
    }
}
