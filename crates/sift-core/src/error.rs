use thiserror::Error;

/// Top-level error type for the sift system.
///
/// Variants follow the failure taxonomy of the build and query pipelines:
/// build-fatal errors (`Corpus`, `Embedding`, `Index`), startup errors
/// (`Startup`, `Config`) and index/metadata desynchronisation (`Consistency`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SiftError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Corpus error: {0}")]
    Corpus(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Startup error: {0}")]
    Startup(String),

    #[error("Index/metadata consistency violation: key {key} outside metadata of length {metadata_len}")]
    Consistency { key: u64, metadata_len: usize },

    #[error("Search error: {0}")]
    Search(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for SiftError {
    fn from(err: toml::de::Error) -> Self {
        SiftError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SiftError {
    fn from(err: toml::ser::Error) -> Self {
        SiftError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SiftError {
    fn from(err: serde_json::Error) -> Self {
        SiftError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for SiftError {
    fn from(err: serde_yaml::Error) -> Self {
        SiftError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for sift operations.
pub type Result<T> = std::result::Result<T, SiftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SiftError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_consistency_display_names_key_and_length() {
        let err = SiftError::Consistency {
            key: 7,
            metadata_len: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("key 7"));
        assert!(msg.contains("length 3"));
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(SiftError, &str)> = vec![
            (
                SiftError::Corpus("chunk_a.yaml: missing url".to_string()),
                "Corpus error: chunk_a.yaml: missing url",
            ),
            (
                SiftError::Embedding("model offline".to_string()),
                "Embedding error: model offline",
            ),
            (
                SiftError::Index("dimension mismatch".to_string()),
                "Index error: dimension mismatch",
            ),
            (
                SiftError::Startup("metadata.json missing".to_string()),
                "Startup error: metadata.json missing",
            ),
            (
                SiftError::Search("timed out".to_string()),
                "Search error: timed out",
            ),
            (
                SiftError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let sift_err: SiftError = io_err.into();
        assert!(matches!(sift_err, SiftError::Io(_)));
        assert!(sift_err.to_string().starts_with("I/O error:"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let sift_err: SiftError = err.unwrap_err().into();
        assert!(matches!(sift_err, SiftError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let sift_err: SiftError = err.unwrap_err().into();
        assert!(matches!(sift_err, SiftError::Serialization(_)));
    }

    #[test]
    fn test_error_from_serde_yaml() {
        let err: std::result::Result<serde_yaml::Value, _> = serde_yaml::from_str("a: [b");
        let sift_err: SiftError = err.unwrap_err().into();
        assert!(matches!(sift_err, SiftError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let _value = io_result?;
            Ok("success".to_string())
        }

        assert_eq!(inner().unwrap(), "success");
    }
}
