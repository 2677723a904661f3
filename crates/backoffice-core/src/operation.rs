//! Operation definitions

use crate::schema::ValueSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named script with typed parameters and a typed result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    pub javascript_code: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ValueSchema>,
    #[serde(rename = "return")]
    pub return_schema: ValueSchema,
}

impl Operation {
    pub fn new(name: impl Into<String>, javascript_code: impl Into<String>, return_schema: ValueSchema) -> Self {
        Self {
            name: name.into(),
            javascript_code: javascript_code.into(),
            parameters: BTreeMap::new(),
            return_schema,
        }
    }

    /// Declare a parameter, replacing one with the same name
    pub fn with_parameter(mut self, name: impl Into<String>, schema: ValueSchema) -> Self {
        self.parameters.insert(name.into(), schema);
        self
    }
}
