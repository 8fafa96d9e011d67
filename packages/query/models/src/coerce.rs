//! Lenient deserialization of categorical values.
//!
//! Dimension values come back from the backend as strings, numbers or
//! booleans depending on the column type. Everything categorical is kept as
//! a `String` in its natural representation (`3`, `2.5`, `true`). A `null`
//! becomes the empty string so positions stay aligned with the schema, and
//! nested lists are flattened and joined with `,`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

/// A JSON scalar that can stand in for a categorical value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// A string value, kept as is.
    Text(String),
    /// A numeric value.
    Number(serde_json::Number),
    /// A boolean value.
    Flag(bool),
    /// A multi-valued cell.
    List(Vec<Self>),
    /// A missing value.
    Null,
}

impl From<Scalar> for String {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Text(s) => s,
            Scalar::Number(n) => n.to_string(),
            Scalar::Flag(b) => b.to_string(),
            Scalar::List(values) => values
                .into_iter()
                .map(Self::from)
                .filter(|value| !value.is_empty())
                .collect::<Vec<_>>()
                .join(","),
            Scalar::Null => Self::new(),
        }
    }
}

/// Deserializes a list of scalars into strings.
///
/// # Errors
///
/// Fails if the input is not a list.
pub fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<Scalar>::deserialize(deserializer)?;
    Ok(values.into_iter().map(String::from).collect())
}

/// Deserializes a map of scalar lists into a map of string lists.
///
/// # Errors
///
/// Fails if the input is not a map of lists.
pub fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = BTreeMap::<String, Vec<Scalar>>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .map(|(key, list)| (key, list.into_iter().map(String::from).collect()))
        .collect())
}
