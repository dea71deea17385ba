use crate::error::ChannelError;
use crate::session::Session;
use crate::transport::MessageTransport;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

/// Upload a local file to the server's shared folder. Returns the server's
/// confirmation message.
pub async fn upload(
    transport: &dyn MessageTransport,
    session: &Session,
    path: &Path,
) -> Result<String, ChannelError> {
    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_string(),
        None => return Err(ChannelError::Validation("Please select a file.".into())),
    };
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ChannelError::Validation(format!("Cannot read {}: {}", path.display(), e)))?;

    let reply = transport
        .post_file(&session.endpoint("/upload"), &filename, bytes)
        .await?;

    info!("Uploaded {}", filename);
    Ok(reply
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("File uploaded successfully")
        .to_string())
}

/// List the files available for download.
pub async fn list_files(
    transport: &dyn MessageTransport,
    session: &Session,
) -> Result<Vec<String>, ChannelError> {
    let body = transport.get_json(&session.endpoint("/list-files")).await?;

    let files = body
        .get("files")
        .and_then(Value::as_array)
        .ok_or_else(|| ChannelError::Decode("invalid file list structure".into()))?;

    Ok(files
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

/// Download a named file into `dest_dir`; returns the written path.
pub async fn download(
    transport: &dyn MessageTransport,
    session: &Session,
    name: &str,
    dest_dir: &Path,
) -> Result<PathBuf, ChannelError> {
    if name.trim().is_empty() {
        return Err(ChannelError::Validation("Please select a file.".into()));
    }
    // Keep only the final component so a funny server-side name cannot
    // escape the destination directory.
    let local_name = match Path::new(name).file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return Err(ChannelError::Validation("Please select a file.".into())),
    };

    let url = session.endpoint(&format!("/download/{}", urlencoding::encode(name)));
    let bytes = transport.get_bytes(&url).await?;

    let dest = dest_dir.join(local_name);
    tokio::fs::write(&dest, bytes)
        .await
        .map_err(|e| ChannelError::Transport(format!("Cannot write {}: {}", dest.display(), e)))?;

    info!("Downloaded {} to {}", name, dest.display());
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct CannedTransport {
        uploads: Mutex<Vec<(String, String, usize)>>,
        gets: Mutex<Vec<String>>,
    }

    impl CannedTransport {
        fn new() -> Self {
            Self {
                uploads: Mutex::new(Vec::new()),
                gets: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessageTransport for CannedTransport {
        async fn subscribe(
            &self,
            _url: &str,
        ) -> Result<crate::transport::FrameStream, ChannelError> {
            unimplemented!()
        }

        async fn get_json(&self, _url: &str) -> Result<Value, ChannelError> {
            Ok(json!({"files": ["notes.txt", "cat.png"]}))
        }

        async fn post_json(&self, _url: &str, _body: &Value) -> Result<Value, ChannelError> {
            unimplemented!()
        }

        async fn post_file(
            &self,
            url: &str,
            filename: &str,
            bytes: Vec<u8>,
        ) -> Result<Value, ChannelError> {
            self.uploads
                .lock()
                .unwrap()
                .push((url.to_string(), filename.to_string(), bytes.len()));
            Ok(json!({"message": "File uploaded successfully"}))
        }

        async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ChannelError> {
            self.gets.lock().unwrap().push(url.to_string());
            Ok(b"payload".to_vec())
        }
    }

    fn session() -> Session {
        Session::new("alice", "127.0.0.1").unwrap()
    }

    #[tokio::test]
    async fn uploads_by_basename() {
        let transport = CannedTransport::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let msg = upload(&transport, &session(), &path).await.unwrap();
        assert_eq!(msg, "File uploaded successfully");

        let uploads = transport.uploads.lock().unwrap();
        assert_eq!(uploads[0].0, "http://127.0.0.1:12345/upload");
        assert_eq!(uploads[0].1, "report.txt");
        assert_eq!(uploads[0].2, 5);
    }

    #[tokio::test]
    async fn upload_of_missing_file_is_a_validation_error() {
        let transport = CannedTransport::new();
        let err = upload(&transport, &session(), Path::new("/no/such/file"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Validation(_)));
        assert!(transport.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_files() {
        let transport = CannedTransport::new();
        let files = list_files(&transport, &session()).await.unwrap();
        assert_eq!(files, ["notes.txt", "cat.png"]);
    }

    #[tokio::test]
    async fn downloads_with_encoded_name() {
        let transport = CannedTransport::new();
        let dir = tempfile::tempdir().unwrap();

        let dest = download(&transport, &session(), "my notes.txt", dir.path())
            .await
            .unwrap();
        assert_eq!(
            transport.gets.lock().unwrap()[0],
            "http://127.0.0.1:12345/download/my%20notes.txt"
        );
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"payload");
        assert_eq!(dest.file_name().unwrap(), "my notes.txt");
    }

    #[tokio::test]
    async fn empty_selection_is_a_validation_error() {
        let transport = CannedTransport::new();
        let dir = tempfile::tempdir().unwrap();
        let err = download(&transport, &session(), "  ", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Validation(_)));
        assert!(transport.gets.lock().unwrap().is_empty());
    }
}
