//! Compiled contract artifacts (Hardhat, Truffle or Foundry JSON).

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, Bytes};
use anyhow::{Context, Result};
use serde::Deserialize;

/// Position of a library address inside creation bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReference {
    pub library: String,
    /// Byte offset into the bytecode.
    pub start: usize,
    /// Byte length, always 20 for an address.
    pub length: usize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    Hex(String),
    Object { object: String },
}

#[derive(Debug, Deserialize)]
struct RawLinkOffset {
    start: usize,
    length: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    #[serde(default)]
    contract_name: Option<String>,
    bytecode: RawBytecode,
    #[serde(default)]
    link_references: BTreeMap<String, BTreeMap<String, Vec<RawLinkOffset>>>,
}

/// Creation bytecode of one contract and the libraries it needs.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub contract_name: String,
    /// Hex without `0x`, possibly containing unlinked placeholders.
    bytecode: String,
    pub link_references: Vec<LinkReference>,
}

impl Artifact {
    pub fn from_json(name: &str, content: &str) -> Result<Self> {
        let raw: RawArtifact =
            serde_json::from_str(content).context(format!("Failed to parse artifact {name}"))?;

        let bytecode = match raw.bytecode {
            RawBytecode::Hex(hex) | RawBytecode::Object { object: hex } => hex,
        };
        let bytecode = bytecode.trim_start_matches("0x").to_string();
        if !bytecode.is_ascii() {
            anyhow::bail!("Bytecode of {name} is not valid hex");
        }

        let mut link_references: Vec<_> = raw
            .link_references
            .into_values()
            .flat_map(|libs| libs.into_iter())
            .flat_map(|(library, offsets)| {
                offsets.into_iter().map(move |o| LinkReference {
                    library: library.clone(),
                    start: o.start,
                    length: o.length,
                })
            })
            .collect();

        // Truffle artifacts carry no offsets, only `__Name_____` placeholders.
        if link_references.is_empty() {
            link_references = find_placeholders(&bytecode);
        }

        Ok(Self {
            contract_name: raw.contract_name.unwrap_or_else(|| name.to_string()),
            bytecode,
            link_references,
        })
    }

    /// Names of the libraries referenced by the bytecode.
    pub fn required_libraries(&self) -> Vec<&str> {
        let mut libs: Vec<_> = self.link_references.iter().map(|r| r.library.as_str()).collect();
        libs.sort_unstable();
        libs.dedup();
        libs
    }

    /// Creation bytecode with every link reference substituted.
    ///
    /// Fails if a referenced library has no address in `libraries`.
    pub fn linked_bytecode(&self, libraries: &HashMap<String, Address>) -> Result<Bytes> {
        let mut code = self.bytecode.clone();

        for reference in &self.link_references {
            let address = libraries.get(&reference.library).with_context(|| {
                format!(
                    "Library {} is not linked into {}",
                    reference.library, self.contract_name
                )
            })?;
            let start = reference.start * 2;
            let end = start + reference.length * 2;
            if code.get(start..end).is_none() || reference.length != 20 {
                anyhow::bail!(
                    "Invalid link reference for {} in {} at offset {}",
                    reference.library,
                    self.contract_name,
                    reference.start
                );
            }
            code.replace_range(start..end, &hex::encode(address.as_slice()));
        }

        let bytes = hex::decode(&code)
            .with_context(|| format!("Bytecode of {} is not valid hex", self.contract_name))?;
        Ok(bytes.into())
    }
}

/// Find `__Name___...` (40 hex chars wide) placeholders left by the compiler.
fn find_placeholders(bytecode: &str) -> Vec<LinkReference> {
    const WIDTH: usize = 40;
    let code = bytecode.as_bytes();
    let mut references = Vec::new();
    let mut cursor = 0;

    while let Some(pos) = code[cursor..].windows(2).position(|w| w == b"__") {
        let start = cursor + pos;
        let end = start + WIDTH;
        let Some(slot) = code.get(start..end) else {
            break;
        };
        let name = String::from_utf8_lossy(slot);
        let name = name.trim_matches('_');
        // Offsets must be byte aligned
        if !name.is_empty() && start % 2 == 0 && !name.starts_with('$') {
            references.push(LinkReference {
                library: name.to_string(),
                start: start / 2,
                length: WIDTH / 2,
            });
        }
        cursor = end;
    }

    references
}

/// Directory of compiled artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the artifact named `name`.
    ///
    /// Looks at `<root>/<name>.json` (Truffle layout) first, then searches the
    /// tree (Hardhat's `<root>/<source>.sol/<name>.json` layout).
    pub fn load(&self, name: &str) -> Result<Artifact> {
        let file_name = format!("{name}.json");
        let direct = self.root.join(&file_name);
        let path = if direct.is_file() {
            direct
        } else {
            find_file(&self.root, &file_name)?.with_context(|| {
                format!(
                    "Artifact {} not found under {}",
                    file_name,
                    self.root.display()
                )
            })?
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Artifact::from_json(name, &content)
    }
}

fn find_file(dir: &Path, file_name: &str) -> Result<Option<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            if let Some(found) = find_file(&path, file_name)? {
                return Ok(Some(found));
            }
        } else if path.file_name().is_some_and(|f| f == file_name) {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn lib() -> Address {
        Address::repeat_byte(0x11)
    }

    #[test]
    fn test_hardhat_link_references() {
        let json = r#"{
            "contractName": "TickStateFake",
            "bytecode": "0x60000000000000000000000000000000000000000000600055",
            "linkReferences": {
                "contracts/TickState.sol": { "TickState": [ { "start": 2, "length": 20 } ] }
            }
        }"#;
        let artifact = Artifact::from_json("TickStateFake", json).unwrap();
        assert_eq!(artifact.required_libraries(), vec!["TickState"]);

        let unlinked = artifact.linked_bytecode(&HashMap::new());
        assert!(unlinked.is_err(), "Linking must fail without library address");

        let libs = HashMap::from([("TickState".to_string(), lib())]);
        let code = artifact.linked_bytecode(&libs).unwrap();
        assert_eq!(&code[2..22], lib().as_slice());
        assert_eq!(code[22], 0x60);
    }

    #[test]
    fn test_truffle_placeholders() {
        let placeholder = format!("{:_<40}", "__TickState");
        let json = format!(r#"{{ "bytecode": "0x6000{placeholder}6000" }}"#);
        let artifact = Artifact::from_json("Consumer", &json).unwrap();

        assert_eq!(artifact.contract_name, "Consumer");
        assert_eq!(artifact.link_references.len(), 1);
        assert_eq!(artifact.link_references[0].start, 2);

        let libs = HashMap::from([("TickState".to_string(), lib())]);
        let code = artifact.linked_bytecode(&libs).unwrap();
        assert_eq!(code.len(), 2 + 20 + 2);
    }

    #[test]
    fn test_non_ascii_bytecode_is_rejected() {
        let placeholder = format!("{:_<40}", "__TickStäte");
        let json = format!(r#"{{ "bytecode": "0x6000{placeholder}é6000" }}"#);
        assert!(Artifact::from_json("Consumer", &json).is_err());

        let references = find_placeholders(&format!("6000{placeholder}é"));
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].start, 2);
    }

    #[test]
    fn test_link_reference_off_char_boundary_fails() {
        let artifact = Artifact {
            contract_name: "Consumer".to_string(),
            bytecode: format!("6é{}", "0".repeat(40)),
            link_references: vec![LinkReference {
                library: "TickState".to_string(),
                start: 1,
                length: 20,
            }],
        };
        let libs = HashMap::from([("TickState".to_string(), lib())]);
        assert!(artifact.linked_bytecode(&libs).is_err());
    }

    #[test]
    fn test_foundry_object_bytecode() {
        let json = r#"{ "bytecode": { "object": "0x6001" } }"#;
        let artifact = Artifact::from_json("Governor", json).unwrap();
        assert!(artifact.required_libraries().is_empty());
        assert_eq!(
            artifact.linked_bytecode(&HashMap::new()).unwrap().to_vec(),
            vec![0x60, 0x01]
        );
    }

    #[test]
    fn test_store_searches_nested_directories() {
        let dir = TempDir::new("mocdex-artifacts").unwrap();
        let nested = dir.path().join("contracts/Governor.sol");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("Governor.json"), r#"{ "bytecode": "0x00" }"#).unwrap();

        let store = ArtifactStore::new(dir.path());
        assert!(store.load("Governor").is_ok());
        assert!(store.load("Stopper").is_err());
    }
}
