use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Extension key recording which deploy message produced a document.
pub const EXT_DEPLOYMENT_ID: &str = "x-kaleido-deployment-id";
/// Extension key recording the URL-escaped friendly name, when registered.
pub const EXT_REGISTERED_NAME: &str = "x-kaleido-registered-name";
/// Name of the shared sender parameter whose default the `from` query
/// parameter substitutes.
pub const FROM_PARAM: &str = "fromParam";

/// A minimal OpenAPI 2.0 document. The gateway only generates and mutates the
/// fields it owns; everything else round-trips through `paths`/`definitions`
/// untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenApiDocument {
    /// Always "2.0".
    pub swagger: String,
    /// Title, description and gateway extensions.
    pub info: OpenApiInfo,
    /// Serving host, when known at generation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Path prefix every operation is served under.
    #[serde(rename = "basePath", default, skip_serializing_if = "String::is_empty")]
    pub base_path: String,
    /// URL schemes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schemes: Vec<String>,
    /// Per-operation path items; opaque to the gateway.
    #[serde(default)]
    pub paths: BTreeMap<String, Value>,
    /// Shared parameter definitions, including the sender parameter.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, OpenApiParameter>,
    /// Model definitions; opaque to the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definitions: Option<Value>,
}

/// The `info` object of a generated document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenApiInfo {
    /// Contract or ABI name.
    #[serde(default)]
    pub title: String,
    /// Description parsed from the devdoc, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// API version string.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Vendor extensions (`x-…` keys).
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

/// A shared parameter definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenApiParameter {
    /// Wire name of the parameter.
    pub name: String,
    /// Where the parameter is carried (`query`, `header`, ...).
    #[serde(rename = "in")]
    pub location: String,
    /// Whether callers must supply it.
    #[serde(default)]
    pub required: bool,
    /// Simple type name.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub param_type: Option<String>,
    /// Default value; substituted by the `from` query parameter on fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Anything else the generator attached.
    #[serde(flatten)]
    pub rest: BTreeMap<String, Value>,
}

impl OpenApiDocument {
    /// The deploy-message id this document was generated from, if recorded.
    pub fn deployment_id(&self) -> Option<&str> {
        self.info.extensions.get(EXT_DEPLOYMENT_ID).and_then(Value::as_str)
    }

    /// The URL-escaped registered name, if this instance was registered.
    pub fn registered_name(&self) -> Option<&str> {
        self.info.extensions.get(EXT_REGISTERED_NAME).and_then(Value::as_str)
    }

    /// Record a vendor extension on the `info` object.
    pub fn set_extension(&mut self, key: &str, value: impl Into<Value>) {
        self.info.extensions.insert(key.to_string(), value.into());
    }

    /// Substitute the default of the shared sender parameter. Returns false
    /// when the document carries no such parameter.
    pub fn set_from_default(&mut self, from: &str) -> bool {
        match self.parameters.get_mut(FROM_PARAM) {
            Some(param) => {
                param.default = Some(Value::String(from.to_string()));
                true
            }
            None => false,
        }
    }
}
