use crate::error::ChannelError;
use crate::session::Session;
use crate::transport::MessageTransport;
use serde_json::{json, Value};
use tracing::warn;

/// An AI model offered by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
}

/// Fetch the models the backend offers.
///
/// The `models` array may hold bare strings or objects carrying a `name`
/// field; both forms occur in the wild and both are accepted. Entries in
/// neither form are skipped. The first model is the caller's default pick.
pub async fn list_models(
    transport: &dyn MessageTransport,
    session: &Session,
) -> Result<Vec<ModelInfo>, ChannelError> {
    let body = transport
        .get_json(&session.endpoint("/api/models"))
        .await?;

    let entries = match body.get("models").and_then(Value::as_array) {
        Some(entries) => entries,
        None => {
            return Err(ChannelError::Decode(
                "invalid models data structure".into(),
            ))
        }
    };

    let mut models = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry
            .as_str()
            .or_else(|| entry.get("name").and_then(Value::as_str));
        match name {
            Some(name) => models.push(ModelInfo { name: name.to_string() }),
            None => warn!("Skipping model entry without a name: {}", entry),
        }
    }
    Ok(models)
}

/// Ask the backend to generate a reply for a prompt; returns the full
/// response text.
pub async fn generate(
    transport: &dyn MessageTransport,
    session: &Session,
    model: &str,
    prompt: &str,
) -> Result<String, ChannelError> {
    let request = json!({ "model": model, "prompt": prompt });
    let body = transport
        .post_json(&session.endpoint("/api/generate"), &request)
        .await?;

    body.get("response")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ChannelError::Decode("no response field in AI reply".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CannedTransport {
        models_body: Value,
        requests: Mutex<Vec<Value>>,
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
            Ok(self.models_body.clone())
        }

        async fn post_json(&self, _url: &str, body: &Value) -> Result<Value, ChannelError> {
            self.requests.lock().unwrap().push(body.clone());
            Ok(json!({"response": "  hello there"}))
        }

        async fn post_file(
            &self,
            _url: &str,
            _filename: &str,
            _bytes: Vec<u8>,
        ) -> Result<Value, ChannelError> {
            unimplemented!()
        }

        async fn get_bytes(&self, _url: &str) -> Result<Vec<u8>, ChannelError> {
            unimplemented!()
        }
    }

    fn canned(models_body: Value) -> CannedTransport {
        CannedTransport {
            models_body,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn session() -> Session {
        Session::new("alice", "127.0.0.1").unwrap()
    }

    #[tokio::test]
    async fn accepts_string_and_object_model_entries() {
        let transport = canned(json!({
            "models": ["llama3", {"name": "mistral"}, {"id": 7}]
        }));
        let models = list_models(&transport, &session()).await.unwrap();
        let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["llama3", "mistral"]);
    }

    #[tokio::test]
    async fn rejects_missing_models_array() {
        let transport = canned(json!({"models": "nope"}));
        assert!(matches!(
            list_models(&transport, &session()).await,
            Err(ChannelError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn generate_sends_model_and_prompt() {
        let transport = canned(json!({}));
        let answer = generate(&transport, &session(), "llama3", "hi")
            .await
            .unwrap();
        assert_eq!(answer, "  hello there");

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0], json!({"model": "llama3", "prompt": "hi"}));
    }
}
