use dbscope_data::DataError;

/// Extension trait for converting `sqlx::Error` into `DataError`.
///
/// Due to Rust's orphan rules, we can't implement `From<sqlx::Error> for DataError`
/// in this crate. Use `.into_data_error()` instead.
pub trait SqlxErrorExt {
    fn into_data_error(self) -> DataError;
}

impl SqlxErrorExt for sqlx::Error {
    fn into_data_error(self) -> DataError {
        match &self {
            sqlx::Error::RowNotFound => DataError::NotFound("no rows in result set".into()),
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => DataError::connection(self),
            _ => DataError::data_access(self),
        }
    }
}

/// Convenience alias for data-layer results using `DataError`.
pub type SqlxResult<T> = Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;
    use dbscope_data::ErrorKind;

    #[test]
    fn classifies_driver_errors() {
        assert_eq!(sqlx::Error::RowNotFound.into_data_error().kind(), ErrorKind::NotFound);
        assert_eq!(sqlx::Error::PoolTimedOut.into_data_error().kind(), ErrorKind::Connection);
        assert_eq!(sqlx::Error::PoolClosed.into_data_error().kind(), ErrorKind::Connection);
        assert_eq!(
            sqlx::Error::Protocol("unexpected message".into())
                .into_data_error()
                .kind(),
            ErrorKind::DataAccess
        );
    }
}
