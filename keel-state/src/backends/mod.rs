//! Backend implementations

mod local;
mod memory;
mod s3;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use s3::S3Backend;

use std::sync::Arc;

use crate::backend::{BackendConfig, BackendError, BackendResult, KvBackend};

/// Create a backend from configuration
///
/// This function dispatches to the appropriate backend implementation
/// based on the backend_type in the configuration.
pub async fn create_backend(config: &BackendConfig) -> BackendResult<Arc<dyn KvBackend>> {
    match config.backend_type.as_str() {
        "memory" => Ok(Arc::new(MemoryBackend::new())),
        "local" => {
            let backend = LocalBackend::from_config(config)?;
            Ok(Arc::new(backend))
        }
        "s3" => {
            let backend = S3Backend::from_config(config).await?;
            backend.init().await?;
            Ok(Arc::new(backend))
        }
        other => Err(BackendError::unsupported_backend(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_backend() {
        let config = BackendConfig::new("unsupported");

        let result = create_backend(&config).await;
        assert!(result.is_err());

        if let Err(BackendError::UnsupportedBackend(name)) = result {
            assert_eq!(name, "unsupported");
        } else {
            panic!("Expected UnsupportedBackend error");
        }
    }

    #[tokio::test]
    async fn test_create_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = BackendConfig::new("local")
            .with_attribute("path", dir.path().to_string_lossy().into_owned());

        let backend = create_backend(&config).await.unwrap();
        backend.put_if_absent("state/a", b"{}".to_vec()).await.unwrap();
        assert!(dir.path().join("state").join("a.json").exists());
    }

    #[tokio::test]
    async fn test_create_memory_backend() {
        let backend = create_backend(&BackendConfig::new("memory")).await.unwrap();
        assert!(backend.list("").await.unwrap().is_empty());
    }
}
