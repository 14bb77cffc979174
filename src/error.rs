use thiserror::Error;

/// Coded failures shared by crawlers, gateways and settlement workers.
///
/// Callers receive these wrapped in `anyhow::Error` and classify them with
/// [`EngineError::classify`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("implement me{}", due(.0))]
    Unimplemented(Option<String>),
    #[error("rpc node error{}", due(.0))]
    RpcNode(Option<String>),
    #[error("api node error{}", due(.0))]
    ApiEndpoint(Option<String>),
    #[error("some missing on prepared data from database{}", due(.0))]
    MissingPreparedData(Option<String>),
    #[error("api return some not updated data{}", due(.0))]
    ApiDataNotUpdated(Option<String>),
    #[error("withdrawal transaction invalid{}", due(.0))]
    TxInvalid(Option<String>),
    #[error("send raw transaction failed{}", due(.0))]
    TxSentFailed(Option<String>),
    #[error("transaction can not be constructed because of fee{}", due(.0))]
    NotEnoughFee(Option<String>),
}

fn due(cause: &Option<String>) -> String {
    match cause {
        Some(reason) => format!(" due to {reason}"),
        None => String::new(),
    }
}

impl EngineError {
    pub fn code(&self) -> u32 {
        match self {
            EngineError::Unimplemented(_) => 1818,
            EngineError::RpcNode(_) | EngineError::ApiEndpoint(_) => 1819,
            EngineError::MissingPreparedData(_) => 1820,
            EngineError::ApiDataNotUpdated(_) => 1821,
            EngineError::TxInvalid(_) => 2818,
            EngineError::TxSentFailed(_) => 2819,
            EngineError::NotEnoughFee(_) => 2820,
        }
    }

    /// Attaches a cause, replacing any previous one.
    pub fn due(self, reason: impl Into<String>) -> Self {
        let reason = Some(reason.into());
        match self {
            EngineError::Unimplemented(_) => EngineError::Unimplemented(reason),
            EngineError::RpcNode(_) => EngineError::RpcNode(reason),
            EngineError::ApiEndpoint(_) => EngineError::ApiEndpoint(reason),
            EngineError::MissingPreparedData(_) => EngineError::MissingPreparedData(reason),
            EngineError::ApiDataNotUpdated(_) => EngineError::ApiDataNotUpdated(reason),
            EngineError::TxInvalid(_) => EngineError::TxInvalid(reason),
            EngineError::TxSentFailed(_) => EngineError::TxSentFailed(reason),
            EngineError::NotEnoughFee(_) => EngineError::NotEnoughFee(reason),
        }
    }

    /// Finds an engine error anywhere in the chain of `err`.
    pub fn classify(err: &anyhow::Error) -> Option<&EngineError> {
        err.chain().find_map(|cause| cause.downcast_ref::<EngineError>())
    }
}
