use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeleterError {
    #[error("delete queue is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, DeleterError>;
