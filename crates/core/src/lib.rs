pub mod chat {
    use futures::Stream;
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};
    use std::pin::Pin;
    use thiserror::Error;

    #[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum Role {
        System,
        User,
        Assistant,
    }

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
    pub struct Message {
        pub role: Role,
        pub content: String,
    }

    impl Message {
        pub fn system<S: Into<String>>(content: S) -> Self {
            Self { role: Role::System, content: content.into() }
        }

        pub fn user<S: Into<String>>(content: S) -> Self {
            Self { role: Role::User, content: content.into() }
        }

        pub fn assistant<S: Into<String>>(content: S) -> Self {
            Self { role: Role::Assistant, content: content.into() }
        }
    }

    /// Input to the completion operations. `messages` stays untyped so the
    /// validator can reject shapes a typed list could never hold.
    #[derive(Clone, Debug, Default, Serialize, Deserialize)]
    pub struct CompletionProps {
        pub model: Option<String>,
        pub messages: Option<Value>,
    }

    impl CompletionProps {
        pub fn from_messages(model: Option<&str>, messages: &[Message]) -> Self {
            let list: Vec<Value> = messages
                .iter()
                .map(|m| json!({"role": m.role, "content": m.content}))
                .collect();
            Self {
                model: model.map(str::to_string),
                messages: Some(Value::Array(list)),
            }
        }
    }

    #[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ValidationError {
        #[error("messages is required!")]
        MissingMessages,
        #[error("invalid message format!")]
        InvalidFormat,
    }

    const KNOWN_ROLES: [&str; 3] = ["system", "user", "assistant"];

    /// Checks a candidate conversation before any network call. Stops at the
    /// first offending element. Empty content is valid, unknown keys are
    /// ignored.
    pub fn validate_conversation(messages: Option<&Value>) -> Result<(), ValidationError> {
        let list = messages
            .and_then(Value::as_array)
            .ok_or(ValidationError::MissingMessages)?;
        if list.is_empty() {
            return Err(ValidationError::MissingMessages);
        }
        for entry in list {
            let role = entry
                .get("role")
                .and_then(Value::as_str)
                .ok_or(ValidationError::InvalidFormat)?;
            if !KNOWN_ROLES.contains(&role) {
                return Err(ValidationError::InvalidFormat);
            }
            if !entry.get("content").is_some_and(Value::is_string) {
                return Err(ValidationError::InvalidFormat);
            }
        }
        Ok(())
    }

    #[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum Status {
        Success,
        Error,
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct EnvelopeData {
        pub status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub result: Option<Message>,
    }

    /// Uniform outcome of a completion call. Failures ride in the envelope
    /// instead of being raised.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct Envelope {
        pub code: u16,
        pub data: EnvelopeData,
    }

    impl Envelope {
        pub fn success(result: Message) -> Self {
            Self {
                code: 200,
                data: EnvelopeData {
                    status: Status::Success,
                    message: None,
                    result: Some(result),
                },
            }
        }

        pub fn bad_request<S: Into<String>>(message: S) -> Self {
            Self {
                code: 400,
                data: EnvelopeData {
                    status: Status::Error,
                    message: Some(message.into()),
                    result: None,
                },
            }
        }

        pub fn internal_error<S: Into<String>>(message: S) -> Self {
            Self {
                code: 500,
                data: EnvelopeData {
                    status: Status::Error,
                    message: Some(message.into()),
                    result: None,
                },
            }
        }

        pub fn is_success(&self) -> bool {
            self.data.status == Status::Success
        }
    }

    #[derive(Error, Debug)]
    pub enum ClientError {
        #[error("timeout: {0}")]
        Timeout(String),
        #[error("network: {0}")]
        Network(String),
        #[error("status: {0}")]
        Status(String),
        #[error("decode: {0}")]
        Decode(String),
        #[error("other: {0}")]
        Other(String),
    }

    /// Progress events mirrored over a channel observer. `Snapshot` carries
    /// the whole reply accumulated so far, once per received chunk.
    #[derive(Clone, Debug)]
    pub enum StreamUpdate {
        Loading(bool),
        Awaiting(bool),
        Snapshot(Message),
    }

    /// Live view over a running streaming completion. Notifications are
    /// fire-and-forget and must not block the decode loop.
    pub trait StreamObserver {
        fn on_loading(&mut self, _loading: bool) {}
        fn on_awaiting(&mut self, _awaiting: bool) {}
        fn on_message(&mut self, _message: &Message) {}
    }

    impl StreamObserver for () {}

    impl StreamObserver for std::sync::mpsc::Sender<StreamUpdate> {
        fn on_loading(&mut self, loading: bool) {
            let _ = self.send(StreamUpdate::Loading(loading));
        }

        fn on_awaiting(&mut self, awaiting: bool) {
            let _ = self.send(StreamUpdate::Awaiting(awaiting));
        }

        fn on_message(&mut self, message: &Message) {
            let _ = self.send(StreamUpdate::Snapshot(message.clone()));
        }
    }

    pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<Message, ClientError>> + Send>>;
}

#[cfg(test)]
mod tests {
    use super::chat::*;
    use serde_json::json;

    #[test]
    fn test_validate_missing_messages() {
        assert_eq!(
            validate_conversation(None),
            Err(ValidationError::MissingMessages)
        );
        assert_eq!(
            validate_conversation(Some(&json!([]))),
            Err(ValidationError::MissingMessages)
        );
        assert_eq!(
            validate_conversation(Some(&json!("hello"))),
            Err(ValidationError::MissingMessages)
        );
        assert_eq!(
            validate_conversation(Some(&json!({"role": "user", "content": "hi"}))),
            Err(ValidationError::MissingMessages)
        );
    }

    #[test]
    fn test_validate_rejects_unknown_role() {
        let msgs = json!([{"role": "robot", "content": "hi"}]);
        assert_eq!(
            validate_conversation(Some(&msgs)),
            Err(ValidationError::InvalidFormat)
        );
        // role matching is case-sensitive
        let msgs = json!([{"role": "User", "content": "hi"}]);
        assert_eq!(
            validate_conversation(Some(&msgs)),
            Err(ValidationError::InvalidFormat)
        );
        let msgs = json!([{"role": 3, "content": "hi"}]);
        assert_eq!(
            validate_conversation(Some(&msgs)),
            Err(ValidationError::InvalidFormat)
        );
    }

    #[test]
    fn test_validate_rejects_bad_content() {
        for content in [json!(42), json!(null), json!({"text": "hi"}), json!(["hi"])] {
            let msgs = json!([{"role": "user", "content": content}]);
            assert_eq!(
                validate_conversation(Some(&msgs)),
                Err(ValidationError::InvalidFormat)
            );
        }
        let msgs = json!([{"role": "user"}]);
        assert_eq!(
            validate_conversation(Some(&msgs)),
            Err(ValidationError::InvalidFormat)
        );
        let msgs = json!([{"content": "hi"}]);
        assert_eq!(
            validate_conversation(Some(&msgs)),
            Err(ValidationError::InvalidFormat)
        );
    }

    #[test]
    fn test_validate_accepts_dialogue_with_empty_content() {
        let msgs = json!([
            {"role": "system", "content": "be brief"},
            {"role": "user", "content": "hello"},
            {"role": "assistant", "content": ""},
            {"role": "user", "content": "go on", "name": "ignored"}
        ]);
        assert_eq!(validate_conversation(Some(&msgs)), Ok(()));
    }

    #[test]
    fn test_validate_fails_on_first_bad_element() {
        let msgs = json!([
            {"role": "user", "content": "fine"},
            {"role": "robot", "content": "bad"}
        ]);
        assert_eq!(
            validate_conversation(Some(&msgs)),
            Err(ValidationError::InvalidFormat)
        );
    }

    #[test]
    fn test_envelope_wire_shape() {
        let env = Envelope::success(Message::assistant("Hi"));
        assert!(env.is_success());
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(
            v,
            json!({
                "code": 200,
                "data": {
                    "status": "success",
                    "result": {"role": "assistant", "content": "Hi"}
                }
            })
        );

        let env = Envelope::bad_request("messages is required!");
        assert!(!env.is_success());
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(
            v,
            json!({
                "code": 400,
                "data": {"status": "error", "message": "messages is required!"}
            })
        );

        let env = Envelope::internal_error("boom");
        assert_eq!(env.code, 500);
        assert_eq!(env.data.status, Status::Error);
    }

    #[test]
    fn test_props_from_messages_pass_validation() {
        let props = CompletionProps::from_messages(
            Some("meta-llama/Llama-2-70b-chat-hf"),
            &[Message::system("be brief"), Message::user("hi")],
        );
        assert_eq!(props.model.as_deref(), Some("meta-llama/Llama-2-70b-chat-hf"));
        assert_eq!(
            props.messages,
            Some(json!([
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
            ]))
        );
        assert_eq!(validate_conversation(props.messages.as_ref()), Ok(()));
    }

    #[test]
    fn test_validation_error_display() {
        assert_eq!(
            ValidationError::MissingMessages.to_string(),
            "messages is required!"
        );
        assert_eq!(
            ValidationError::InvalidFormat.to_string(),
            "invalid message format!"
        );
    }

    #[test]
    fn test_channel_observer_forwards_updates() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut obs = tx;
        obs.on_loading(false);
        obs.on_awaiting(true);
        obs.on_message(&Message::assistant("partial"));
        obs.on_awaiting(false);
        drop(obs);

        let got: Vec<StreamUpdate> = rx.iter().collect();
        assert_eq!(got.len(), 4);
        assert!(matches!(got[0], StreamUpdate::Loading(false)));
        assert!(matches!(got[1], StreamUpdate::Awaiting(true)));
        assert!(matches!(&got[2], StreamUpdate::Snapshot(m) if m.content == "partial"));
        assert!(matches!(got[3], StreamUpdate::Awaiting(false)));
    }
}
