use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A list field that needs at least one entry is empty.
    #[error("`{0}` must contain at least one column")]
    EmptyColumnList(&'static str),
    /// A column name is empty or only whitespace.
    #[error("`{field}` contains an empty column name")]
    EmptyColumnName { field: &'static str },
    /// A column is listed twice.
    #[error("`{field}` lists column `{column}` more than once")]
    DuplicateColumn { field: &'static str, column: String },
    /// The ordering column is also part of the business key.
    #[error("`order_by.column` `{0}` cannot also be a `partition_by` column")]
    OrderColumnInBusinessKey(String),
    /// A field holds a value outside its allowed range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}
