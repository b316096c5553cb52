use super::http::ApiTransport;
use crate::error::TransportError;
use crate::model::{FileEntry, MonitorConfig};
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct ListReply {
    entries: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct ReadReply {
    content: String,
}

#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AckReply {
    #[serde(default)]
    success: bool,
}

/// Client for the executor's project file service.
#[derive(Debug, Clone)]
pub(crate) struct FileClient {
    transport: ApiTransport,
}

impl FileClient {
    pub fn new(cfg: &MonitorConfig) -> Result<Self> {
        Ok(Self {
            transport: ApiTransport::new(cfg)?,
        })
    }

    /// Entries directly under `path` (`""` is the project root), directories first.
    pub async fn list(&self, path: &str) -> Result<Vec<FileEntry>, TransportError> {
        let url = self.transport.url("/api/files");
        let req = self.transport.http.get(&url).query(&[("path", path)]);
        let reply: ListReply = self.transport.execute(req, &url).await?.into_transport()?;
        Ok(reply.entries)
    }

    pub async fn read(&self, path: &str) -> Result<String, TransportError> {
        let url = self.transport.url("/api/file");
        let req = self.transport.http.get(&url).query(&[("path", path)]);
        let reply: ReadReply = self.transport.execute(req, &url).await?.into_transport()?;
        Ok(reply.content)
    }

    pub async fn write(&self, path: &str, content: &str) -> Result<bool, TransportError> {
        let url = self.transport.url("/api/file");
        let req = self
            .transport
            .http
            .put(&url)
            .query(&[("path", path)])
            .json(&WriteRequest { content });
        let reply: AckReply = self.transport.execute(req, &url).await?.into_transport()?;
        Ok(reply.success)
    }

    pub async fn delete(&self, path: &str) -> Result<bool, TransportError> {
        let url = self.transport.url("/api/file");
        let req = self.transport.http.delete(&url).query(&[("path", path)]);
        let reply: AckReply = self.transport.execute(req, &url).await?.into_transport()?;
        Ok(reply.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::http::tests::test_config;
    use crate::model::FileKind;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn list_decodes_entries() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/files")
            .match_query(Matcher::UrlEncoded("path".into(), "scripts".into()))
            .with_status(200)
            .with_body(
                json!({"entries": [
                    {"name": "lib", "size": 0, "modtime": 1700000000, "type": "dir"},
                    {"name": "main.py", "size": 120, "modtime": 1700000001, "type": "file"}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let files = FileClient::new(&test_config(&server.url())).unwrap();
        let entries = files.list("scripts").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, FileKind::Dir);
        assert_eq!(entries[1].name, "main.py");
        assert_eq!(entries[1].size, 120);
    }

    #[tokio::test]
    async fn read_missing_file_reports_executor_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/file")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"error":"File not found: nope.py"}"#)
            .create_async()
            .await;

        let files = FileClient::new(&test_config(&server.url())).unwrap();
        let err = files.read("nope.py").await.unwrap_err();
        assert_eq!(err.to_string(), "executor returned HTTP 404: File not found: nope.py");
    }

    #[tokio::test]
    async fn write_puts_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/api/file")
            .match_query(Matcher::UrlEncoded("path".into(), "main.py".into()))
            .match_body(Matcher::Json(json!({"content": "print('hi')\n"})))
            .with_status(200)
            .with_body(r#"{"path":"main.py","success":true}"#)
            .create_async()
            .await;

        let files = FileClient::new(&test_config(&server.url())).unwrap();
        assert!(files.write("main.py", "print('hi')\n").await.unwrap());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn delete_sends_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/api/file")
            .match_query(Matcher::UrlEncoded("path".into(), "old.py".into()))
            .with_status(200)
            .with_body(r#"{"path":"old.py","success":true}"#)
            .create_async()
            .await;

        let files = FileClient::new(&test_config(&server.url())).unwrap();
        assert!(files.delete("old.py").await.unwrap());
        mock.assert_async().await;
    }
}
