use crate::{client, filter, options, scan, schema};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] options::Error),
    #[error("client error: {0}")]
    Client(#[from] client::Error),
    #[error("schema resolution error: {0}")]
    Schema(#[from] schema::Error),
    #[error("filter pushdown error: {0}")]
    Filter(#[from] filter::Error),
    #[error("scan error: {0}")]
    Scan(#[from] scan::Error),
}
