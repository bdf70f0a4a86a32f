#![forbid(unsafe_code)]

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    /// A row no longer matches the closed vocabularies. Only reachable when
    /// the database was edited outside the store.
    Corrupted(&'static str),
    NotFound {
        id: String,
    },
    AlreadyExists {
        entity: &'static str,
    },
    InvalidStatus {
        id: String,
        status: &'static str,
    },
    InvalidNeeds {
        id: String,
    },
    Conflict {
        id: String,
        expected: &'static str,
        actual: &'static str,
    },
}

impl StoreError {
    /// Stable wire kind; the tool server forwards this verbatim.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) | Self::Sql(_) | Self::Corrupted(_) => "internal",
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::InvalidStatus { .. } => "invalid_status",
            Self::InvalidNeeds { .. } => "invalid_needs",
            Self::Conflict { .. } => "conflict",
        }
    }

    /// What the agent can do about it. Ends up in the error envelope next to
    /// the message.
    pub fn recovery_hint(&self) -> Option<&'static str> {
        match self {
            Self::NotFound { .. } => Some("re-read the tree to discover live node ids"),
            Self::AlreadyExists { .. } => Some("a run seeds exactly one root; create children instead"),
            Self::InvalidStatus { .. } => {
                Some("re-read the node and pick an operation legal for its current status")
            }
            Self::InvalidNeeds { .. } => {
                Some("needs may only reference prior siblings or your own descendants")
            }
            Self::Conflict { .. } => Some("re-read the node and retry against its current status"),
            Self::InvalidInput(_) => Some("check the request arguments"),
            Self::Io(_) | Self::Sql(_) | Self::Corrupted(_) => None,
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::Corrupted(message) => write!(f, "store corrupted: {message}"),
            Self::NotFound { id } => write!(f, "node not found: {id}"),
            Self::AlreadyExists { entity } => write!(f, "{entity} already exists"),
            Self::InvalidStatus { id, status } => {
                write!(f, "node {id} is {status}")
            }
            Self::InvalidNeeds { id } => {
                write!(f, "needs target {id} is outside the permissible set")
            }
            Self::Conflict {
                id,
                expected,
                actual,
            } => write!(
                f,
                "concurrent transition on {id} (expected={expected}, actual={actual})"
            ),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}
