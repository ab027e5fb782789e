//! PostgreSQL wire-protocol tags the client understands.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendTag {
    AuthenticationRequest,
    ParameterStatus,
    BackendKeyData,
    ReadyForQuery,
    ErrorResponse,
    NoticeResponse,
    RowDescription,
    DataRow,
    CommandComplete,
    EmptyQueryResponse,
    ParseComplete,
    BindComplete,
    NoData,
    ParameterDescription,
    Unknown(u8),
}

impl From<u8> for BackendTag {
    fn from(b: u8) -> Self {
        match b {
            b'R' => BackendTag::AuthenticationRequest,
            b'S' => BackendTag::ParameterStatus,
            b'K' => BackendTag::BackendKeyData,
            b'Z' => BackendTag::ReadyForQuery,
            b'E' => BackendTag::ErrorResponse,
            b'N' => BackendTag::NoticeResponse,
            b'T' => BackendTag::RowDescription,
            b'D' => BackendTag::DataRow,
            b'C' => BackendTag::CommandComplete,
            b'I' => BackendTag::EmptyQueryResponse,
            b'1' => BackendTag::ParseComplete,
            b'2' => BackendTag::BindComplete,
            b'n' => BackendTag::NoData,
            b't' => BackendTag::ParameterDescription,
            other => BackendTag::Unknown(other),
        }
    }
}

/// Sub-codes of AuthenticationRequest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    Ok,
    CleartextPassword,
    Md5Password,
    Sasl,
}

impl AuthType {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(AuthType::Ok),
            3 => Some(AuthType::CleartextPassword),
            5 => Some(AuthType::Md5Password),
            10 => Some(AuthType::Sasl),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    InTransaction,
    Failed,
}

impl From<u8> for TransactionStatus {
    fn from(b: u8) -> Self {
        match b {
            b'T' => TransactionStatus::InTransaction,
            b'E' => TransactionStatus::Failed,
            _ => TransactionStatus::Idle,
        }
    }
}
