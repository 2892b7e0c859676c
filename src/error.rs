use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowMapError {
    #[error("Schema: {0}")]
    Schema(String),

    #[error("No flows matched the filter, table left unchanged")]
    EmptyResult,

    #[error("Chart render failed: {0}")]
    ChartRender(String),

    #[error("Logo unreachable: {0}")]
    LogoUnreachable(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    General(String),
}
