use bitcoin::Txid;

use crate::electrum::ConnectionTarget;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("electrum connection is not established")]
    NotConnected,

    #[error("electrum connection lost before a response arrived")]
    ConnectionLost,

    #[error("could not connect to {target}: {source}")]
    Connect {
        target: ConnectionTarget,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("invalid address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("not enough funds: need {needed} sat including fee, have {available} sat")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("no change address available in wallet")]
    NoChangeAddress,

    #[error("fee calculation error: {0}")]
    FeeCalculation(String),

    #[error("signature on input #{input} failed verification")]
    InvalidSignature { input: usize },

    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("unknown subscription channel: {0}")]
    UnknownChannel(String),

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("input {0} has no previous transaction attached")]
    MissingPrevTx(Txid),

    #[error("no key available for address {0}")]
    MissingKey(String),

    #[error("inputs are split between local and external keys")]
    MixedKeyCustody,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("external signer failed: {0}")]
    Signer(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failures reported by, or while talking to, the Electrum server.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The server answered with an `error` object. The message is kept verbatim
    /// since broadcast and fee-policy rejections carry diagnostic value.
    #[error("server error: {message}")]
    ServerError { code: Option<i64>, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn invalid_address(address: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.to_owned(),
            reason: reason.into(),
        }
    }

    /// Errors the user can act on (fund the wallet, pick another address)
    /// as opposed to network or server trouble.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress { .. }
                | Self::InsufficientFunds { .. }
                | Self::NoChangeAddress
                | Self::InvalidRecipient(_)
                | Self::MissingKey(_)
                | Self::MixedKeyCustody
                | Self::InvalidKey(_)
        )
    }
}
