//! Loading cluster bodies and pod manifests from disk.

use core::error::Error;
use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use serde::de::DeserializeOwned;

#[derive(Debug, derive_more::Display)]
pub enum DocumentError {
    #[display("Failed to read {path}")]
    Read { path: String },
    #[display("Failed to parse {path}")]
    Parse { path: String },
}

impl Error for DocumentError {}

/// Reads a JSON or YAML document, picking the format from the file extension.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T, Report<DocumentError>> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).change_context(DocumentError::Read {
        path: display.clone(),
    })?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&raw).change_context(DocumentError::Parse { path: display })
    } else {
        serde_yaml::from_str(&raw).change_context(DocumentError::Parse { path: display })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::Map;
    use serde_json::Value;
    use similar_asserts::assert_eq;

    use super::*;

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .expect("should create temp file");
        file.write_all(content.as_bytes())
            .expect("should write temp file");
        file
    }

    #[test]
    fn yaml_and_json_bodies_load_the_same() {
        let yaml = write_temp(".yaml", "name: c1\nnodePools:\n  - name: pool\n");
        let json = write_temp(".json", r#"{"name": "c1", "nodePools": [{"name": "pool"}]}"#);

        let from_yaml: Map<String, Value> = load_document(yaml.path()).expect("yaml should load");
        let from_json: Map<String, Value> = load_document(json.path()).expect("json should load");

        assert_eq!(from_yaml, from_json);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load_document::<Map<String, Value>>(Path::new("/nonexistent/body.yaml"))
            .expect_err("missing file should fail");
        assert!(matches!(err.current_context(), DocumentError::Read { .. }));
    }
}
