// Message codec
//
// Text encoding of OCPP-J frames:
// - `[2, id, action, payload]`
// - `[3, id, payload]`
// - `[4, id, code, description, details]`
// Decoding never panics; anything malformed is a ProtocolError.

use serde_json::{json, Value};

use crate::protocol::messages::{ErrorCode, Frame, MessageType};
use crate::protocol::ProtocolError;

/// Message codec
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    /// Largest accepted inbound frame, in bytes
    max_frame_size: usize,
}

impl MessageCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn encode_call(&self, id: &str, action: &str, payload: &Value) -> String {
        json!([MessageType::Call.discriminator(), id, action, payload]).to_string()
    }

    pub fn encode_result(&self, id: &str, payload: &Value) -> String {
        json!([MessageType::CallResult.discriminator(), id, payload]).to_string()
    }

    pub fn encode_error(&self, id: &str, code: ErrorCode, description: &str, details: &Value) -> String {
        json!([
            MessageType::CallError.discriminator(),
            id,
            code.as_str(),
            description,
            details
        ])
        .to_string()
    }

    pub fn encode(&self, frame: &Frame) -> String {
        match frame {
            Frame::Call { id, action, payload } => self.encode_call(id, action, payload),
            Frame::CallResult { id, payload } => self.encode_result(id, payload),
            Frame::CallError {
                id,
                code,
                description,
                details,
            } => self.encode_error(id, *code, description, details),
        }
    }

    pub fn decode(&self, text: &str) -> Result<Frame, ProtocolError> {
        if text.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: text.len(),
                max_size: self.max_frame_size,
            });
        }

        let value: Value = serde_json::from_str(text)?;
        let Value::Array(mut items) = value else {
            return Err(ProtocolError::NotAnArray);
        };

        let discriminator = items
            .first()
            .ok_or(ProtocolError::MissingField { position: 0, name: "messageTypeId" })?;
        let message_type = discriminator
            .as_u64()
            .and_then(MessageType::from_discriminator)
            .ok_or_else(|| ProtocolError::UnknownMessageType(discriminator.to_string()))?;

        match message_type {
            MessageType::Call => {
                let id = string_at(&items, 1, "messageId")?;
                let action = string_at(&items, 2, "action")?;
                let payload = take_at(&mut items, 3, "payload")?;
                Ok(Frame::Call { id, action, payload })
            }
            MessageType::CallResult => {
                let id = string_at(&items, 1, "messageId")?;
                let payload = take_at(&mut items, 2, "payload")?;
                Ok(Frame::CallResult { id, payload })
            }
            MessageType::CallError => {
                let id = string_at(&items, 1, "messageId")?;
                let code = string_at(&items, 2, "errorCode")?;
                let description = string_at(&items, 3, "errorDescription")?;
                // some charge points leave the details out entirely
                let details = take_at(&mut items, 4, "errorDetails")
                    .unwrap_or_else(|_| Value::Object(Default::default()));
                Ok(Frame::CallError {
                    id,
                    code: ErrorCode::parse_lenient(&code),
                    description,
                    details,
                })
            }
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

fn string_at(items: &[Value], position: usize, name: &'static str) -> Result<String, ProtocolError> {
    match items.get(position) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ProtocolError::InvalidField { position, name }),
        None => Err(ProtocolError::MissingField { position, name }),
    }
}

fn take_at(items: &mut [Value], position: usize, name: &'static str) -> Result<Value, ProtocolError> {
    items
        .get_mut(position)
        .map(Value::take)
        .ok_or(ProtocolError::MissingField { position, name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_call_shape() {
        let codec = MessageCodec::default();
        let text = codec.encode_call("abc", "Reset", &json!({"type": "Hard"}));
        assert_eq!(text, r#"[2,"abc","Reset",{"type":"Hard"}]"#);
    }

    #[test]
    fn test_encode_error_shape() {
        let codec = MessageCodec::default();
        let text = codec.encode_error("1", ErrorCode::NotImplemented, "Unknown action", &json!({}));
        assert_eq!(text, r#"[4,"1","NotImplemented","Unknown action",{}]"#);
    }

    #[test]
    fn test_decode_each_frame_type() {
        let codec = MessageCodec::default();

        let call = codec.decode(r#"[2,"m1","Heartbeat",{}]"#).unwrap();
        assert_eq!(
            call,
            Frame::Call { id: "m1".into(), action: "Heartbeat".into(), payload: json!({}) }
        );

        let result = codec.decode(r#"[3,"m1",{"status":"Accepted"}]"#).unwrap();
        assert_eq!(
            result,
            Frame::CallResult { id: "m1".into(), payload: json!({"status": "Accepted"}) }
        );

        let error = codec.decode(r#"[4,"m1","FormatViolation","bad",{"x":1}]"#).unwrap();
        assert_eq!(
            error,
            Frame::CallError {
                id: "m1".into(),
                code: ErrorCode::FormationViolation,
                description: "bad".into(),
                details: json!({"x": 1}),
            }
        );
    }

    #[test]
    fn test_call_error_without_details() {
        let codec = MessageCodec::default();
        let frame = codec.decode(r#"[4,"m1","InternalError","boom"]"#).unwrap();
        assert!(matches!(frame, Frame::CallError { details, .. } if details == json!({})));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let codec = MessageCodec::default();

        assert!(matches!(codec.decode("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(codec.decode(r#"{"a":1}"#), Err(ProtocolError::NotAnArray)));
        assert!(matches!(codec.decode("[]"), Err(ProtocolError::MissingField { position: 0, .. })));
        assert!(matches!(codec.decode(r#"[5,"m1",{}]"#), Err(ProtocolError::UnknownMessageType(_))));
        assert!(matches!(codec.decode(r#"["2","m1","A",{}]"#), Err(ProtocolError::UnknownMessageType(_))));
        assert!(matches!(
            codec.decode(r#"[2,"m1","Heartbeat"]"#),
            Err(ProtocolError::MissingField { position: 3, .. })
        ));
        assert!(matches!(
            codec.decode(r#"[3,17,{}]"#),
            Err(ProtocolError::InvalidField { position: 1, .. })
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let codec = MessageCodec::new(16);
        let result = codec.decode(r#"[2,"m1","Heartbeat",{"padding":"xxxxxxxx"}]"#);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { max_size: 16, .. })));
    }

    #[test]
    fn test_encode_decode_frame() {
        let codec = MessageCodec::default();
        let frame = Frame::error("9", ErrorCode::SecurityError, "nope");
        assert_eq!(codec.decode(&codec.encode(&frame)).unwrap(), frame);
    }

    proptest! {
        #[test]
        fn decode_never_panics(input in ".{0,200}") {
            let _ = MessageCodec::default().decode(&input);
        }

        #[test]
        fn unknown_discriminators_are_rejected(kind in 0u64..100) {
            prop_assume!(!(2..=4).contains(&kind));
            let text = format!(r#"[{},"m1","A",{{}}]"#, kind);
            let is_unknown_type = matches!(
                MessageCodec::default().decode(&text),
                Err(ProtocolError::UnknownMessageType(_))
            );
            prop_assert!(is_unknown_type);
        }
    }
}
