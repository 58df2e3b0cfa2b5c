use crate::schema::ValueKind;
use crate::types::BodyId;

/// A candidate table does not match the annotation schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// A column the schema marks as required is absent.
    #[error("Missing required \"{0}\" column")]
    MissingRequiredField(String),

    /// A column holds values of a kind its field does not accept.
    #[error(
        "Column \"{column}\" should be of type(s) {}, got {actual}",
        join_kinds(.expected)
    )]
    TypeMismatch {
        column: String,
        expected: Vec<ValueKind>,
        actual: ValueKind,
    },

    /// A non-nullable column contains an empty value.
    #[error("Column \"{0}\" does not allow empty values")]
    NullNotAllowed(String),

    /// Columns that name no field of the dataset.
    #[error("The following columns do not appear to be valid fields: {}", .0.join(", "))]
    UnknownField(Vec<String>),

    /// The schema declares a type this client cannot check.
    #[error("Column \"{column}\" declares unsupported schema type \"{declared}\"")]
    UnsupportedType { column: String, declared: String },

    /// The schema document itself could not be interpreted.
    #[error("Malformed annotation schema: {0}")]
    Malformed(String),
}

/// Identifier-level problems with a batch of annotation records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Body IDs repeat or are missing; every offender is listed.
    #[error(
        "Table contains duplicate or empty body IDs (duplicates: {duplicates:?}, empty rows: {null_rows:?})"
    )]
    DuplicateOrNullId {
        duplicates: Vec<BodyId>,
        null_rows: Vec<usize>,
    },

    /// Body IDs with neither an annotation nor a segment.
    #[error("Body IDs do not exist in the segmentation: {0:?}")]
    UnknownIdentifier(Vec<BodyId>),

    /// A body ID cell that does not parse as an integer.
    #[error("Row {row} has a body ID that is not an integer: {value}")]
    InvalidIdentifier { row: usize, value: String },

    /// Malformed input or options (empty column table, zero chunk size).
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

fn join_kinds(kinds: &[ValueKind]) -> String {
    kinds
        .iter()
        .map(ValueKind::as_str)
        .collect::<Vec<_>>()
        .join(" | ")
}
