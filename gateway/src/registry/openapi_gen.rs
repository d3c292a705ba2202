//! A compact ABI-to-OpenAPI generator. The full generator is an external
//! collaborator; this one produces the document skeleton the gateway owns:
//! title/description, base path, one path item per callable, and the shared
//! sender parameter.

use std::collections::BTreeMap;

use ethers::abi::{Abi, StateMutability};
use serde_json::{json, Value};
use url::Url;

use ethgate_core::{
    GatewayError, GatewayResult, OpenApiDocument, OpenApiGen, OpenApiInfo, OpenApiParameter,
    FROM_PARAM,
};

/// Generates OpenAPI 2.0 documents rooted at a configured base URL.
#[derive(Debug, Clone)]
pub struct Abi2OpenApi {
    host: String,
    base_path: String,
    schemes: Vec<String>,
}

impl Abi2OpenApi {
    /// Build a generator from the gateway's external base URL, e.g.
    /// `http://localhost:8080/api/v1`.
    pub fn new(base_url: &str) -> GatewayResult<Self> {
        let url = Url::parse(base_url)
            .map_err(|e| GatewayError::InvalidMessage(format!("base URL '{base_url}': {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => String::new(),
        };
        Ok(Self {
            host,
            base_path: url.path().trim_end_matches('/').to_string(),
            schemes: vec![url.scheme().to_string()],
        })
    }

    fn generate(
        &self,
        path: &str,
        name: &str,
        abi: &Abi,
        dev_doc: Option<&str>,
        factory: bool,
    ) -> OpenApiDocument {
        let mut paths = BTreeMap::new();
        if factory {
            paths.insert(
                "/".to_string(),
                json!({
                    "post": {
                        "operationId": "deploy",
                        "summary": "Deploy a new instance of the contract",
                        "parameters": [{"$ref": format!("#/parameters/{FROM_PARAM}")}],
                        "responses": {"200": {"description": "successful operation"}}
                    }
                }),
            );
        }
        for function in abi.functions() {
            let mut item = serde_json::Map::new();
            item.insert(
                "post".to_string(),
                json!({
                    "operationId": function.name,
                    "parameters": [{"$ref": format!("#/parameters/{FROM_PARAM}")}],
                    "responses": {"200": {"description": "successful operation"}}
                }),
            );
            if matches!(
                function.state_mutability,
                StateMutability::Pure | StateMutability::View
            ) {
                item.insert(
                    "get".to_string(),
                    json!({
                        "operationId": format!("{}_call", function.name),
                        "responses": {"200": {"description": "successful operation"}}
                    }),
                );
            }
            paths.insert(format!("/{}", function.name), Value::Object(item));
        }

        let mut parameters = BTreeMap::new();
        parameters.insert(
            FROM_PARAM.to_string(),
            OpenApiParameter {
                name: "from".to_string(),
                location: "query".to_string(),
                required: false,
                param_type: Some("string".to_string()),
                default: Some(Value::String(String::new())),
                rest: BTreeMap::new(),
            },
        );

        OpenApiDocument {
            swagger: "2.0".to_string(),
            info: OpenApiInfo {
                title: name.to_string(),
                description: description_from_devdoc(dev_doc),
                version: "1.0".to_string(),
                extensions: BTreeMap::new(),
            },
            host: Some(self.host.clone()).filter(|h| !h.is_empty()),
            base_path: format!("{}{}", self.base_path, path),
            schemes: self.schemes.clone(),
            paths,
            parameters,
            definitions: None,
        }
    }
}

impl OpenApiGen for Abi2OpenApi {
    fn instance_doc(
        &self,
        path: &str,
        name: &str,
        abi: &Abi,
        dev_doc: Option<&str>,
    ) -> OpenApiDocument {
        self.generate(path, name, abi, dev_doc, false)
    }

    fn factory_doc(
        &self,
        path: &str,
        name: &str,
        abi: &Abi,
        dev_doc: Option<&str>,
    ) -> OpenApiDocument {
        self.generate(path, name, abi, dev_doc, true)
    }
}

/// The devdoc `details` field becomes the document description.
fn description_from_devdoc(dev_doc: Option<&str>) -> Option<String> {
    let raw = dev_doc?.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed: Value = serde_json::from_str(raw).ok()?;
    parsed
        .get("details")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_abi() -> Abi {
        serde_json::from_str(
            r#"[
              {"type":"function","name":"set","inputs":[{"name":"x","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},
              {"type":"function","name":"get","inputs":[],"outputs":[{"name":"r","type":"uint256"}],"stateMutability":"view"}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn instance_documents_are_rooted_under_the_base_url_path() {
        let gen = Abi2OpenApi::new("http://localhost:8080/api/v1").unwrap();
        let doc = gen.instance_doc(
            "/contracts/0123456789abcdef0123456789abcdef01234567",
            "simplestorage",
            &storage_abi(),
            Some(r#"{"details": "simple storage example"}"#),
        );
        assert_eq!(doc.swagger, "2.0");
        assert_eq!(doc.info.title, "simplestorage");
        assert_eq!(
            doc.base_path,
            "/api/v1/contracts/0123456789abcdef0123456789abcdef01234567"
        );
        assert_eq!(doc.info.description.as_deref(), Some("simple storage example"));
        assert!(doc.paths.contains_key("/set"));
        // view functions are also exposed as GET
        assert!(doc.paths["/get"].get("get").is_some());
        assert!(doc.parameters.contains_key(FROM_PARAM));
    }

    #[test]
    fn factory_documents_carry_a_constructor_operation() {
        let gen = Abi2OpenApi::new("https://gw.example.com").unwrap();
        let doc = gen.factory_doc("/abis/abc-123", "simplestorage", &storage_abi(), None);
        assert_eq!(doc.base_path, "/abis/abc-123");
        assert_eq!(doc.schemes, vec!["https".to_string()]);
        assert!(doc.paths.contains_key("/"));
    }
}
