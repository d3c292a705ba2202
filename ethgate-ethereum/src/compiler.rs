use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use ethgate_core::{
    CompiledContract, CompiledSolidity, GatewayError, GatewayResult, SolidityCompiler,
};

/// Adapter around the `solc` binary. A version requirement selects a
/// versioned binary (`solc-<major>.<minor>`) when one is installed.
#[derive(Debug, Clone)]
pub struct SolcCompiler {
    default_binary: PathBuf,
}

impl Default for SolcCompiler {
    fn default() -> Self {
        Self {
            default_binary: PathBuf::from("solc"),
        }
    }
}

impl SolcCompiler {
    /// Use a specific default binary path.
    pub fn new(default_binary: impl Into<PathBuf>) -> Self {
        Self {
            default_binary: default_binary.into(),
        }
    }

    fn binary_for(&self, requested: Option<&str>) -> GatewayResult<PathBuf> {
        let Some(requested) = requested.filter(|r| !r.is_empty()) else {
            return Ok(self.default_binary.clone());
        };
        let version = Regex::new(r"^(\d+)\.(\d+)")
            .expect("static regex")
            .captures(requested)
            .ok_or_else(|| {
                GatewayError::CompilerUnavailable(format!(
                    "cannot parse requested compiler version '{requested}'"
                ))
            })?;
        Ok(PathBuf::from(format!("solc-{}.{}", &version[1], &version[2])))
    }

    async fn run_solc(
        &self,
        binary: &Path,
        dir: &Path,
        sources: &[String],
    ) -> GatewayResult<Value> {
        let mut cmd = Command::new(binary);
        cmd.current_dir(dir)
            .arg("--combined-json")
            .arg("abi,bin,devdoc,metadata")
            .arg("--optimize")
            .arg("--allow-paths")
            .arg(".")
            .args(sources);
        debug!(?binary, ?sources, "compiling solidity");
        let output = cmd.output().await.map_err(|e| {
            GatewayError::CompilerUnavailable(format!("{}: {e}", binary.display()))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.chars().take(1024).collect();
            return Err(GatewayError::Compile(excerpt));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| GatewayError::Compile(format!("cannot parse solc output: {e}")))
    }
}

#[async_trait]
impl SolidityCompiler for SolcCompiler {
    async fn compile_directory(
        &self,
        dir: &Path,
        sources: &[String],
        solc_version: Option<&str>,
    ) -> GatewayResult<HashMap<String, CompiledContract>> {
        let sources = if sources.is_empty() {
            root_sol_files(dir)?
        } else {
            sources.to_vec()
        };
        if sources.is_empty() {
            return Err(GatewayError::Compile(
                "no .sol files found in root; set a 'source' field to the relative path of your solidity".to_string(),
            ));
        }
        let binary = self.binary_for(solc_version)?;
        let combined = self.run_solc(&binary, dir, &sources).await?;
        parse_combined_json(&combined)
    }

    async fn compile_source(
        &self,
        solidity: &str,
        contract_name: Option<&str>,
        solc_version: Option<&str>,
    ) -> GatewayResult<CompiledSolidity> {
        let dir = tempfile::tempdir()
            .map_err(|e| GatewayError::storage("cannot create compile directory", e))?;
        let file = dir.path().join("input.sol");
        std::fs::write(&file, solidity)
            .map_err(|e| GatewayError::storage("cannot stage solidity", e))?;
        let contracts = self
            .compile_directory(dir.path(), &["input.sol".to_string()], solc_version)
            .await?;
        select_contract(contracts, contract_name)
    }
}

/// Select one contract out of a compiler run, by name when given, or when the
/// run produced exactly one. Ambiguity lists the candidates.
pub fn select_contract(
    contracts: HashMap<String, CompiledContract>,
    contract_name: Option<&str>,
) -> GatewayResult<CompiledSolidity> {
    let pick = |name: String, c: CompiledContract| CompiledSolidity {
        contract_name: name,
        compiler_version: c.compiler_version.clone(),
        abi: c.abi,
        compiled: c.bin,
        dev_doc: c.dev_doc,
    };

    if let Some(wanted) = contract_name.filter(|w| !w.is_empty()) {
        let wanted_short = wanted.rsplit(':').next().unwrap_or(wanted);
        for (key, contract) in contracts {
            let short = key.rsplit(':').next().unwrap_or(&key);
            if short == wanted_short || key == wanted {
                return Ok(pick(short.to_string(), contract));
            }
        }
        return Err(GatewayError::Compile(format!(
            "contract '{wanted}' not found in compiled output"
        )));
    }

    let mut names: Vec<String> = contracts.keys().cloned().collect();
    if names.len() == 1 {
        let key = names.remove(0);
        let short = key.rsplit(':').next().unwrap_or(&key).to_string();
        let contract = contracts.into_values().next().expect("len checked");
        return Ok(pick(short, contract));
    }
    names.sort();
    Err(GatewayError::Compile(format!(
        "more than one contract in the source; specify one of: {}",
        names.join(", ")
    )))
}

fn root_sol_files(dir: &Path) -> GatewayResult<Vec<String>> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| GatewayError::storage("cannot read upload", e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| GatewayError::storage("cannot read upload", e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".sol") && entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(name);
        }
    }
    files.sort();
    Ok(files)
}

/// Parse solc `--combined-json` output into per-contract records. Field
/// encodings moved between solc releases (objects vs embedded JSON strings);
/// both forms are accepted.
fn parse_combined_json(combined: &Value) -> GatewayResult<HashMap<String, CompiledContract>> {
    let version = combined
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let contracts = combined
        .get("contracts")
        .and_then(Value::as_object)
        .ok_or_else(|| GatewayError::Compile("solc output has no contracts".to_string()))?;

    let mut out = HashMap::new();
    for (key, body) in contracts {
        let abi_value = body.get("abi").cloned().unwrap_or(Value::Null);
        let abi_value = match abi_value {
            Value::String(s) => serde_json::from_str(&s)
                .map_err(|e| GatewayError::Compile(format!("{key}: bad ABI: {e}")))?,
            other => other,
        };
        let abi = serde_json::from_value(abi_value)
            .map_err(|e| GatewayError::Compile(format!("{key}: bad ABI: {e}")))?;
        let bin = body
            .get("bin")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let dev_doc = match body.get("devdoc") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        out.insert(
            key.clone(),
            CompiledContract {
                abi,
                bin,
                dev_doc,
                compiler_version: version.clone(),
            },
        );
    }
    info!(contracts = out.len(), version = %version, "solidity compiled");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn combined_fixture() -> Value {
        json!({
            "version": "0.5.16+commit.9c3226ce",
            "contracts": {
                "simplestorage.sol:simplestorage": {
                    "abi": "[{\"type\":\"function\",\"name\":\"get\",\"inputs\":[],\"outputs\":[{\"name\":\"r\",\"type\":\"uint256\"}],\"stateMutability\":\"view\"}]",
                    "bin": "6080604052",
                    "devdoc": "{\"details\":\"simple storage\"}"
                },
                "other.sol:helper": {
                    "abi": [],
                    "bin": "",
                    "devdoc": {}
                }
            }
        })
    }

    #[test]
    fn parses_both_combined_json_encodings() {
        let contracts = parse_combined_json(&combined_fixture()).unwrap();
        assert_eq!(contracts.len(), 2);
        let storage = &contracts["simplestorage.sol:simplestorage"];
        assert_eq!(storage.bin, "6080604052");
        assert_eq!(storage.compiler_version, "0.5.16+commit.9c3226ce");
        assert!(storage.abi.function("get").is_ok());
    }

    #[test]
    fn selects_contract_by_short_name() {
        let contracts = parse_combined_json(&combined_fixture()).unwrap();
        let picked = select_contract(contracts, Some("simplestorage")).unwrap();
        assert_eq!(picked.contract_name, "simplestorage");
        assert_eq!(picked.compiled, "6080604052");
    }

    #[test]
    fn ambiguous_selection_lists_candidates() {
        let contracts = parse_combined_json(&combined_fixture()).unwrap();
        let err = select_contract(contracts, None).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("simplestorage"));
        assert!(text.contains("helper"));
    }

    #[test]
    fn versioned_binaries_follow_the_requested_compiler() {
        let compiler = SolcCompiler::default();
        assert_eq!(
            compiler.binary_for(Some("0.5.16")).unwrap(),
            PathBuf::from("solc-0.5")
        );
        assert_eq!(compiler.binary_for(None).unwrap(), PathBuf::from("solc"));
        assert!(compiler.binary_for(Some("latest")).is_err());
    }
}
