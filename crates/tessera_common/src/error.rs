use thiserror::Error;

/// Convenience alias for `Result<T, ProxyError>`.
pub type ProxyResult<T> = Result<T, ProxyError>;

// MySQL error numbers the proxy emits. 1045 (access denied) belongs to the
// wire/auth layer and must never be produced here.
pub const ER_CON_COUNT_ERROR: u16 = 1040;
pub const ER_UNKNOWN_COM_ERROR: u16 = 1047;
pub const ER_BAD_DB_ERROR: u16 = 1049;
pub const ER_SERVER_SHUTDOWN: u16 = 1053;
pub const ER_PARSE_ERROR: u16 = 1064;
pub const ER_UNKNOWN_ERROR: u16 = 1105;
pub const ER_UNKNOWN_CHARACTER_SET: u16 = 1115;
pub const ER_WRONG_VALUE_FOR_VAR: u16 = 1231;
pub const ER_OPTION_PREVENTS_STATEMENT: u16 = 1290;
pub const ER_QUERY_INTERRUPTED: u16 = 1317;
pub const ER_VARIABLE_IS_READONLY: u16 = 1621;
pub const ER_MALFORMED_PACKET: u16 = 1835;
pub const CR_SERVER_LOST: u16 = 2013;

pub const SS_UNKNOWN: &str = "HY000";
pub const SS_SYNTAX: &str = "42000";
pub const SS_QUERY_INTERRUPTED: &str = "70100";
pub const SS_SERVER_SHUTDOWN: &str = "08S01";

/// Error classification used for surfacing decisions.
///
/// - `UserError`  — bad input (SQL syntax, bad variable value); never retried
/// - `Config`     — namespace/rule misconfiguration; never retried
/// - `Routing`    — the statement cannot be routed/rewritten as asked
/// - `Dispatch`   — pool/backend acquisition trouble; reads may retry a replica
/// - `Execution`  — a backend MySQL error, surfaced with its own errno
/// - `Canceled`   — deadline or cancellation
/// - `Fatal`      — caught panic or invariant breach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Config,
    Routing,
    Dispatch,
    Execution,
    Canceled,
    Fatal,
}

/// Inline-expression engine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// Parse failure; `char_index` points at the offending byte.
    #[error("inline expression syntax error: {message} (expression: {expression:?}, char index: {char_index})")]
    Syntax {
        message: String,
        char_index: usize,
        expression: String,
    },

    #[error("inline script evaluation failed: {0}")]
    Eval(String),
}

/// Routing-table and shard-value-resolution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("unknown namespace: {0}")]
    NoSuchNamespace(String),

    #[error("database {0} is not allowed in this namespace")]
    NotAllowedDb(String),

    #[error("unknown database: {0}")]
    UnknownDb(String),

    #[error("sharding column {column} missing in insert into {table}")]
    ShardKeyMissing { table: String, column: String },

    #[error("shard value for column {column} is not a literal")]
    NonLiteralShardValue { column: String },

    #[error("sequence {0} is not registered")]
    UnknownSequence(String),
}

/// Statement-rewriter errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    #[error("unsupported rewrite: {0}")]
    Unsupported(String),

    #[error("limit offset {offset} + count {count} exceeds the configured max {max}")]
    LimitTooLarge { offset: u64, count: u64, max: u64 },
}

/// Planner errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("cannot build a plan for this statement: {0}")]
    Unsupported(String),

    #[error("statement resolved to an empty shard set")]
    EmptyShardSet,
}

/// Backend connection/pool errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("connection pool for slice {slice} exhausted")]
    PoolExhausted { slice: String },

    #[error("backend {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("lost connection to backend {endpoint} mid-result")]
    LostConnection { endpoint: String },

    #[error("backend error {errno} ({sqlstate}): {message}")]
    Mysql {
        errno: u16,
        sqlstate: String,
        message: String,
    },

    #[error("unknown slice: {0}")]
    UnknownSlice(String),
}

/// Session-executor errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("statement spans multiple shards inside a transaction")]
    TxCrossShard,

    #[error("transaction is poisoned; only ROLLBACK is accepted")]
    TxPoisoned,

    #[error("transaction finished partially; failed slices: {slices:?}")]
    TxPartial { slices: Vec<String> },

    #[error("command not supported")]
    CmdUnsupported,

    #[error("unknown character set: {0}")]
    UnknownCharset(String),

    #[error("variable {name} can't be set to the value of {value}")]
    WrongValueForVar { name: String, value: String },

    #[error("variable {0} is read only")]
    VariableReadonly(String),

    #[error("write statements are not allowed for a read-only user")]
    ReadOnlyUser,

    #[error("malformed packet")]
    MalformedPacket,

    #[error("unknown prepared statement id {0}")]
    UnknownStmtId(u32),

    #[error("sql matches the namespace blacklist")]
    Blacklisted,
}

/// Top-level error type every layer converts into.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("route error: {0}")]
    Route(#[from] RouteError),

    #[error("rewrite error: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("query execution was interrupted")]
    Canceled,

    #[error("query deadline exceeded")]
    DeadlineExceeded,

    #[error("Server shutdown in progress")]
    ServerShutdown,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Classify for surfacing decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::Script(_) | ProxyError::Parse(_) => ErrorKind::UserError,
            ProxyError::Route(RouteError::NoSuchNamespace(_)) => ErrorKind::Config,
            ProxyError::Route(RouteError::NotAllowedDb(_)) => ErrorKind::Config,
            ProxyError::Route(RouteError::UnknownDb(_)) => ErrorKind::Config,
            ProxyError::Route(RouteError::UnknownSequence(_)) => ErrorKind::Config,
            ProxyError::Route(_) => ErrorKind::Routing,
            ProxyError::Rewrite(_) | ProxyError::Plan(_) => ErrorKind::Routing,
            ProxyError::Backend(BackendError::Mysql { .. }) => ErrorKind::Execution,
            ProxyError::Backend(_) => ErrorKind::Dispatch,
            ProxyError::Exec(ExecError::WrongValueForVar { .. })
            | ProxyError::Exec(ExecError::UnknownCharset(_))
            | ProxyError::Exec(ExecError::VariableReadonly(_))
            | ProxyError::Exec(ExecError::ReadOnlyUser)
            | ProxyError::Exec(ExecError::Blacklisted)
            | ProxyError::Exec(ExecError::UnknownStmtId(_)) => ErrorKind::UserError,
            ProxyError::Exec(_) => ErrorKind::Execution,
            ProxyError::Canceled | ProxyError::DeadlineExceeded => ErrorKind::Canceled,
            ProxyError::ServerShutdown => ErrorKind::Dispatch,
            ProxyError::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Severity order used to pick which sub-query error a multi-shard
    /// dispatch surfaces: protocol trouble outranks backend SQL errors,
    /// which outrank local (pool/cancel) conditions.
    pub fn severity(&self) -> u8 {
        match self {
            ProxyError::Backend(BackendError::LostConnection { .. })
            | ProxyError::Exec(ExecError::MalformedPacket)
            | ProxyError::Internal(_) => 3,
            ProxyError::Backend(BackendError::Mysql { .. }) => 2,
            _ => 1,
        }
    }

    /// The MySQL error number this error is reported as.
    pub fn mysql_errno(&self) -> u16 {
        match self {
            ProxyError::Script(_) | ProxyError::Parse(_) => ER_PARSE_ERROR,
            ProxyError::Route(RouteError::NotAllowedDb(_)) => ER_BAD_DB_ERROR,
            ProxyError::Route(RouteError::UnknownDb(_)) => ER_BAD_DB_ERROR,
            ProxyError::Route(_) => ER_UNKNOWN_ERROR,
            ProxyError::Rewrite(_) | ProxyError::Plan(_) => ER_UNKNOWN_ERROR,
            ProxyError::Backend(BackendError::PoolExhausted { .. }) => ER_CON_COUNT_ERROR,
            ProxyError::Backend(BackendError::LostConnection { .. }) => CR_SERVER_LOST,
            ProxyError::Backend(BackendError::Mysql { errno, .. }) => *errno,
            ProxyError::Backend(_) => ER_UNKNOWN_ERROR,
            ProxyError::Exec(ExecError::CmdUnsupported) => ER_UNKNOWN_COM_ERROR,
            ProxyError::Exec(ExecError::UnknownCharset(_)) => ER_UNKNOWN_CHARACTER_SET,
            ProxyError::Exec(ExecError::WrongValueForVar { .. }) => ER_WRONG_VALUE_FOR_VAR,
            ProxyError::Exec(ExecError::VariableReadonly(_)) => ER_VARIABLE_IS_READONLY,
            ProxyError::Exec(ExecError::ReadOnlyUser) => ER_OPTION_PREVENTS_STATEMENT,
            ProxyError::Exec(ExecError::MalformedPacket) => ER_MALFORMED_PACKET,
            ProxyError::Exec(_) => ER_UNKNOWN_ERROR,
            ProxyError::Canceled | ProxyError::DeadlineExceeded => ER_QUERY_INTERRUPTED,
            ProxyError::ServerShutdown => ER_SERVER_SHUTDOWN,
            ProxyError::Internal(_) => ER_UNKNOWN_ERROR,
        }
    }

    /// The SQLSTATE paired with [`mysql_errno`](Self::mysql_errno).
    pub fn sqlstate(&self) -> &str {
        match self {
            ProxyError::Script(_) | ProxyError::Parse(_) => SS_SYNTAX,
            ProxyError::Route(RouteError::NotAllowedDb(_))
            | ProxyError::Route(RouteError::UnknownDb(_)) => SS_SYNTAX,
            ProxyError::Exec(ExecError::UnknownCharset(_)) => SS_SYNTAX,
            ProxyError::Exec(ExecError::WrongValueForVar { .. }) => SS_SYNTAX,
            ProxyError::Backend(BackendError::Mysql { sqlstate, .. }) => sqlstate,
            ProxyError::Canceled | ProxyError::DeadlineExceeded => SS_QUERY_INTERRUPTED,
            ProxyError::ServerShutdown => SS_SERVER_SHUTDOWN,
            _ => SS_UNKNOWN,
        }
    }

    /// Add context to the message, preserving classification where it
    /// matters (errno/sqlstate of backend errors survive untouched).
    pub fn with_context(self, ctx: impl Into<String>) -> Self {
        let ctx = ctx.into();
        match self {
            ProxyError::Internal(msg) => ProxyError::Internal(format!("{ctx}: {msg}")),
            ProxyError::Parse(msg) => ProxyError::Parse(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}
