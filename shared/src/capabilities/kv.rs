use crux_kv::error::KeyValueError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::marker::PhantomData;
use thiserror::Error;

const MAX_KEY_LENGTH: usize = 512;
const MAX_VALUE_SIZE: usize = 64 * 1024;
const MAX_PREFIX_LENGTH: usize = 64;

/// Reply to a snapshot read, with the shell's error already mapped.
pub type KvReadResult = Result<Option<Vec<u8>>, KvError>;
/// Reply to a snapshot write or delete.
pub type KvWriteResult = Result<(), KvError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvKey {
    namespace: KeyNamespace,
    key: String,
}

impl KvKey {
    pub fn new(namespace: KeyNamespace, key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(Self { namespace, key })
    }

    /// The flat key the shell stores under, e.g. `widget:trip_snapshot`.
    pub fn raw(&self) -> String {
        format!("{}:{}", self.namespace.prefix(), self.key)
    }

    fn validate_key(key: &str) -> Result<(), KvError> {
        let invalid = |reason: &str| KvError::InvalidKey {
            key: key.chars().take(50).collect(),
            reason: reason.to_string(),
        };

        if key.trim().is_empty() {
            return Err(invalid("key cannot be empty"));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(invalid("key exceeds maximum length"));
        }
        if key.contains("..") {
            return Err(invalid("key cannot contain path traversal sequences"));
        }
        if key.starts_with('/') || key.starts_with('\\') {
            return Err(invalid("key cannot start with path separator"));
        }
        if key.chars().any(char::is_control) {
            return Err(invalid("key contains control characters"));
        }

        Ok(())
    }
}

/// Key prefix in the shell's store (SharedPreferences on Android, App Group
/// `UserDefaults` on iOS).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyNamespace {
    Widget,
    Custom(String),
}

impl KeyNamespace {
    pub fn prefix(&self) -> &str {
        match self {
            KeyNamespace::Widget => "widget",
            KeyNamespace::Custom(s) => s.as_str(),
        }
    }

    pub fn custom(prefix: impl Into<String>) -> Result<Self, KvError> {
        let prefix = prefix.into();
        let invalid = |key: String, reason: String| KvError::InvalidKey { key, reason };

        if prefix.is_empty() {
            return Err(invalid(prefix, "custom namespace cannot be empty".into()));
        }
        if prefix.len() > MAX_PREFIX_LENGTH {
            return Err(invalid(
                prefix,
                format!("custom namespace exceeds maximum length of {MAX_PREFIX_LENGTH} bytes"),
            ));
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(invalid(
                prefix,
                "custom namespace contains invalid characters".into(),
            ));
        }
        Ok(KeyNamespace::Custom(prefix))
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error: {message} (code: {code:?}, retryable: {retryable})")]
    Storage {
        code: StorageErrorCode,
        message: String,
        retryable: bool,
    },

    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl KvError {
    pub fn is_retryable(&self) -> bool {
        match self {
            KvError::Storage { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn storage(code: StorageErrorCode, message: impl Into<String>) -> Self {
        let retryable = code.is_retryable();
        Self::Storage {
            code,
            message: message.into(),
            retryable,
        }
    }
}

impl From<KeyValueError> for KvError {
    fn from(e: KeyValueError) -> Self {
        match e {
            KeyValueError::Timeout => KvError::storage(StorageErrorCode::Busy, "store timed out"),
            KeyValueError::Io { message } => KvError::storage(StorageErrorCode::IoError, message),
            other => KvError::storage(StorageErrorCode::Unknown, format!("{other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageErrorCode {
    Unknown,
    Busy,
    IoError,
}

impl StorageErrorCode {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageErrorCode::Busy | StorageErrorCode::IoError)
    }
}

/// JSON-encoded values of one type under one namespace, layered on the
/// `crux_kv` capability.
pub struct TypedKvStore<T> {
    namespace: KeyNamespace,
    _phantom: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> TypedKvStore<T> {
    pub fn new(namespace: KeyNamespace) -> Self {
        Self {
            namespace,
            _phantom: PhantomData,
        }
    }

    pub fn key(&self, key: impl Into<String>) -> Result<KvKey, KvError> {
        KvKey::new(self.namespace.clone(), key)
    }

    pub fn encode(&self, value: &T) -> Result<Vec<u8>, KvError> {
        let data = serde_json::to_vec(value).map_err(|e| KvError::Serialization {
            message: e.to_string(),
        })?;
        if data.len() > MAX_VALUE_SIZE {
            return Err(KvError::ValueTooLarge {
                size: data.len(),
                max: MAX_VALUE_SIZE,
            });
        }
        Ok(data)
    }

    /// Decodes the reply to a read. A missing value is `Ok(None)`.
    pub fn decode(&self, result: KvReadResult) -> Result<Option<T>, KvError> {
        match result? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| KvError::Serialization {
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }
}
