use data_source::error::DataSourceError;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ConsumerError {
    #[error("data source: {0}")]
    DataSource(#[from] DataSourceError),
}

pub type ConsumerResult<T> = Result<T, ConsumerError>;
