use serde::{Deserialize, Serialize};

/// The error envelope every API failure carries.
///
/// Internal failures are logged server-side; the envelope never leaks their
/// detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resource: Option<String>,
}

impl BaseError {
    pub fn bad_payload() -> Self {
        Self::new("request body is invalid")
    }

    pub fn bad_path_parameter(param: impl Into<String>) -> Self {
        Self {
            field: Some(param.into()),
            ..Self::new("path parameter is invalid")
        }
    }

    pub fn invalid_field(field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            ..Self::new("invalid data in field")
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self {
            resource: Some(resource.into()),
            ..Self::new("not found")
        }
    }

    pub fn internal() -> Self {
        Self::new("internal server error")
    }

    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            field: None,
            resource: None,
        }
    }
}
