use thiserror::Error;

/**
 * \brief 整理流程的错误分类；均为终止性错误，不做自动重试。
 */
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrganizeError {
    #[error("No active document.")]
    NoActiveDocument,

    #[error("An organize run is already in progress.")]
    AlreadyRunning,

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("API error: {0}")]
    UpstreamApi(String),

    #[error("no response from LLM was received")]
    EmptyResponse,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("document access failed: {0}")]
    Document(String),
}

pub type OrganizeResult<T> = Result<T, OrganizeError>;
