use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum SerdeFormatError {
    #[error("Failed to get file extension for '{0}'")]
    MissingFileExtension(String),
    #[error("Unsupported file extension for file: {0}")]
    UnsupportedFileExtension(String),
    #[error("YAML serialization failed")]
    Yaml(#[from] serde_yml::Error),
    #[error("JSON serialization failed")]
    Json(#[from] serde_json::Error),
    #[error("Payload is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("Failed to access '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type SerdeFormatResult<T> = Result<T, SerdeFormatError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerdeFormat {
    Yaml,
    Json,
}

impl SerdeFormat {
    pub fn from_file_name(file_name: &str) -> SerdeFormatResult<Self> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| SerdeFormatError::MissingFileExtension(file_name.to_string()))?;

        if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") {
            Ok(Self::Yaml)
        } else if ext.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else {
            Err(SerdeFormatError::UnsupportedFileExtension(
                file_name.to_string(),
            ))
        }
    }
}

pub fn serialize<T: Serialize>(value: &T, format: SerdeFormat) -> SerdeFormatResult<Vec<u8>> {
    let text = match format {
        SerdeFormat::Yaml => serde_yml::to_string(value)?,
        SerdeFormat::Json => serde_json::to_string_pretty(value)?,
    };
    Ok(text.into_bytes())
}

pub fn deserialize<T: DeserializeOwned>(
    serialized: &[u8],
    format: SerdeFormat,
) -> SerdeFormatResult<T> {
    let text = std::str::from_utf8(serialized)?;
    match format {
        SerdeFormat::Yaml => Ok(serde_yml::from_str(text)?),
        SerdeFormat::Json => Ok(serde_json::from_str(text)?),
    }
}

/// Reads `path`, picking the format from its extension.
pub fn load_file<T: DeserializeOwned>(path: &Path) -> SerdeFormatResult<T> {
    let format = SerdeFormat::from_file_name(&path.to_string_lossy())?;
    let bytes = std::fs::read(path).map_err(|e| SerdeFormatError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    deserialize(&bytes, format)
}

/// Writes `value` to `path`, picking the format from its extension.
pub fn save_file<T: Serialize>(value: &T, path: &Path) -> SerdeFormatResult<()> {
    let format = SerdeFormat::from_file_name(&path.to_string_lossy())?;
    let bytes = serialize(value, format)?;
    std::fs::write(path, bytes).map_err(|e| SerdeFormatError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        overlap: usize,
    }

    #[test]
    fn test_format_from_file_name() {
        assert_eq!(
            SerdeFormat::from_file_name("run.YML").unwrap(),
            SerdeFormat::Yaml
        );
        assert_eq!(
            SerdeFormat::from_file_name("run.json").unwrap(),
            SerdeFormat::Json
        );
        assert!(matches!(
            SerdeFormat::from_file_name("run"),
            Err(SerdeFormatError::MissingFileExtension(_))
        ));
        assert!(matches!(
            SerdeFormat::from_file_name("run.toml"),
            Err(SerdeFormatError::UnsupportedFileExtension(_))
        ));
    }

    #[test]
    fn test_yaml_and_json_agree() {
        let value = Sample {
            name: "scope".to_string(),
            overlap: 12,
        };
        for format in [SerdeFormat::Yaml, SerdeFormat::Json] {
            let bytes = serialize(&value, format).unwrap();
            let back: Sample = deserialize(&bytes, format).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn test_invalid_json_is_error() {
        let result: SerdeFormatResult<Sample> = deserialize(b"{ not json", SerdeFormat::Json);
        assert!(matches!(result, Err(SerdeFormatError::Json(_))));
    }
}
