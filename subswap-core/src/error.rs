use std::error::Error as StdError;
use std::fmt;

type Source = Box<dyn StdError + Send + Sync + 'static>;

/// The category of an [`Error`].
///
/// Every failure path of the engine maps to exactly one kind, so callers can branch on
/// [`Error::kind`] without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed hash, key, height or address supplied by the caller.
    InvalidParameters,
    /// A swap for this hash has already been recorded.
    DuplicateSwap,
    /// Unknown hash, address or key.
    NotFound,
    /// The preimage does not hash to the swap's payment hash.
    InvalidPreimage,
    /// The refund path is not yet valid at the current height.
    LockNotExpired,
    /// The deposit cannot pay the fee and still leave a spendable output.
    InsufficientFunds,
    /// The fee estimator could not produce a rate.
    FeeEstimationUnavailable,
    /// The chain client failed to answer a query.
    ChainQueryFailed,
    /// The signing wallet failed or produced an invalid signature.
    Signing,
    /// The record store failed or returned a corrupt record.
    Store,
    /// Publishing a transaction failed.
    Broadcast,
    /// The caller lacks the permissions required by an operation.
    PermissionDenied,
    /// A transaction could not be constructed.
    Transaction,
    /// The notification broker has been stopped.
    Subscription,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidParameters => "invalid parameters",
            ErrorKind::DuplicateSwap => "duplicate swap",
            ErrorKind::NotFound => "not found",
            ErrorKind::InvalidPreimage => "invalid preimage",
            ErrorKind::LockNotExpired => "lock not expired",
            ErrorKind::InsufficientFunds => "insufficient funds",
            ErrorKind::FeeEstimationUnavailable => "fee estimation unavailable",
            ErrorKind::ChainQueryFailed => "chain query failed",
            ErrorKind::Signing => "signing error",
            ErrorKind::Store => "store error",
            ErrorKind::Broadcast => "broadcast error",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::Transaction => "transaction error",
            ErrorKind::Subscription => "subscription error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: ErrorKind,
    source: Source,
    /// Outermost context last.
    context: Vec<String>,
}

impl Error {
    fn new(kind: ErrorKind, source: impl Into<Source>) -> Self {
        Self {
            inner: Box::new(ErrorImpl {
                kind,
                source: source.into(),
                context: Vec::new(),
            }),
        }
    }

    pub fn invalid_parameters(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::InvalidParameters, error)
    }

    pub fn duplicate_swap(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::DuplicateSwap, error)
    }

    pub fn not_found(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::NotFound, error)
    }

    pub fn invalid_preimage(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::InvalidPreimage, error)
    }

    pub fn lock_not_expired(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::LockNotExpired, error)
    }

    pub fn insufficient_funds(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::InsufficientFunds, error)
    }

    pub fn fee_estimation(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::FeeEstimationUnavailable, error)
    }

    pub fn chain_query(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::ChainQueryFailed, error)
    }

    pub fn signing(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::Signing, error)
    }

    pub fn store(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::Store, error)
    }

    pub fn broadcast(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::Broadcast, error)
    }

    pub fn permission_denied(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::PermissionDenied, error)
    }

    pub fn transaction(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::Transaction, error)
    }

    pub fn subscription(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::Subscription, error)
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    /// Whether the caller may reasonably try the same operation again later.
    ///
    /// The engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.inner.kind,
            ErrorKind::FeeEstimationUnavailable
                | ErrorKind::ChainQueryFailed
                | ErrorKind::LockNotExpired
                | ErrorKind::Broadcast
        )
    }

    fn with_context_message(mut self, context: String) -> Self {
        self.inner.context.push(context);
        self
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.inner.kind)
            .field("source", &self.inner.source)
            .field("context", &self.inner.context)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for context in self.inner.context.iter().rev() {
            write!(f, "{context}: ")?;
        }

        write!(f, "{}: {}", self.inner.kind, self.inner.source)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.source.as_ref())
    }
}

pub trait ErrorContext<T> {
    /// Wrap the error value with additional context.
    fn context<C>(self, context: C) -> Result<T, Error>
    where
        C: fmt::Display + Send + Sync + 'static;

    /// Wrap the error value with additional context that is evaluated lazily only once an error
    /// does occur.
    fn with_context<C, F>(self, f: F) -> Result<T, Error>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T> ErrorContext<T> for Result<T, Error> {
    fn context<C>(self, context: C) -> Result<T, Error>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|error| error.with_context_message(context.to_string()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T, Error>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|error| error.with_context_message(f().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_rendered_outermost_first() {
        let res: Result<(), Error> = Err(Error::not_found("no swap for hash"));

        let err = res
            .context("failed to load swap record")
            .with_context(|| format!("failed to redeem {}", 42))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            err.to_string(),
            "failed to redeem 42: failed to load swap record: not found: no swap for hash"
        );
    }

    #[test]
    fn only_external_conditions_are_retryable() {
        assert!(Error::chain_query("timeout").is_retryable());
        assert!(Error::fee_estimation("no data").is_retryable());
        assert!(Error::lock_not_expired("too early").is_retryable());
        assert!(!Error::invalid_preimage("wrong").is_retryable());
        assert!(!Error::duplicate_swap("exists").is_retryable());
        assert!(!Error::insufficient_funds("dust").is_retryable());
    }

    #[test]
    fn wraps_foreign_errors() {
        let parse_err = "zz".parse::<u32>().unwrap_err();
        let err = Error::invalid_parameters(parse_err);

        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("invalid parameters: "));
    }
}
