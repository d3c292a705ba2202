/// Result alias used across the gateway crates.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// All the ways a gateway operation can fail, classified so the REST layer
/// and the reply builder can derive an HTTP-style status without inspecting
/// message strings.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The message type tag was not one of the recognized kinds.
    #[error("unknown message type '{0}'")]
    UnknownMessageType(String),

    /// The message body failed structural decoding.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A user-supplied nonce could not be parsed as a number.
    #[error("invalid nonce supplied: {0}")]
    InvalidNonce(String),

    /// An address field failed validation.
    #[error("invalid '{field}' address: {detail}")]
    InvalidAddress {
        /// Which message field carried the bad value.
        field: &'static str,
        /// Parser detail for the client.
        detail: String,
    },

    /// Both a privacy group and a private-for list were supplied.
    #[error("privacyGroupId and privateFor are mutually exclusive")]
    PrivacyGroupConflict,

    /// The sender requested HD-wallet signing but no wallet is configured.
    #[error("HD wallet signing is not configured on this gateway")]
    HdWalletMissing,

    /// The HD-wallet provider could not resolve a signing key.
    #[error("HD wallet signing failed: {0}")]
    HdWallet(String),

    /// Solidity compilation failed; carries a stderr excerpt where available.
    #[error("failed to compile solidity: {0}")]
    Compile(String),

    /// The solc binary could not be located or its version probed.
    #[error("solidity compiler unavailable: {0}")]
    CompilerUnavailable(String),

    /// The wire transaction could not be assembled from the message.
    #[error("failed to build transaction: {0}")]
    TxBuild(String),

    /// The node rejected the send, or the send RPC failed.
    #[error("transaction send failed: {0}")]
    Send(String),

    /// Receipt polling kept failing until the wait budget was exhausted.
    #[error("error querying receipt ({retries} retries): {last_error}")]
    ReceiptCheck {
        /// Number of unsuccessful probes made.
        retries: u32,
        /// The last error observed before giving up.
        last_error: String,
    },

    /// The wait budget was exhausted with no receipt available.
    #[error("timed out waiting for transaction receipt")]
    ReceiptTimeout,

    /// A contract, ABI or registered name was not found.
    #[error("{0}")]
    NotFound(String),

    /// An event endpoint was called but no subscription manager is wired in.
    #[error("event support is not configured on this gateway")]
    EventsUnsupported,

    /// A registry file could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// A JSON-RPC call to the node failed.
    #[error("JSON/RPC error: {0}")]
    Rpc(String),

    /// The gateway is draining and no longer accepts or completes work.
    #[error("gateway is shutting down")]
    ShuttingDown,
}

impl GatewayError {
    /// The HTTP-style status class for this error, used both by the REST
    /// layer and in asynchronous error replies.
    pub fn status(&self) -> u16 {
        use GatewayError::*;
        match self {
            UnknownMessageType(_) | InvalidMessage(_) | InvalidNonce(_)
            | InvalidAddress { .. } | PrivacyGroupConflict | HdWalletMissing
            | HdWallet(_) | Compile(_) | CompilerUnavailable(_) | TxBuild(_)
            | Send(_) => 400,
            NotFound(_) => 404,
            EventsUnsupported => 405,
            ReceiptTimeout => 408,
            ReceiptCheck { .. } | Storage(_) | Rpc(_) => 500,
            ShuttingDown => 503,
        }
    }

    /// Shorthand for a storage failure wrapping an I/O error.
    pub fn storage(context: &str, err: std::io::Error) -> Self {
        GatewayError::Storage(format!("{context}: {err}"))
    }
}
