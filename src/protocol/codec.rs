//! Message Codec
//!
//! JSON text <-> [`ServerMessage`] / [`Reply`]. Decoding validates the
//! `request` discriminator and the fields each known kind requires; unknown
//! kinds are kept rather than rejected.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::message::{
    GameResult, InitInfo, Reply, Request, RequestKind, ServerMessage, StateSync, UnknownMessage,
};
use crate::game::state::GameState;

/// Field naming the message kind.
pub const DISCRIMINATOR: &str = "request";

/// Field carrying the thread id.
pub const THREAD_FIELD: &str = "thread";

/// Field carrying the state snapshot.
pub const STATE_FIELD: &str = "state";

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Text is not a valid message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A value could not be turned into JSON.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

fn malformed(detail: impl Into<String>) -> CodecError {
    CodecError::MalformedMessage(detail.into())
}

fn parse_object(text: &str) -> Result<Map<String, Value>, CodecError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(body)) => Ok(body),
        Ok(_) => Err(malformed("message is not a JSON object")),
        Err(e) => Err(malformed(format!("invalid JSON: {}", e))),
    }
}

/// Remove and deserialize a required field.
fn take_field<T: DeserializeOwned>(
    body: &mut Map<String, Value>,
    kind: &str,
    name: &str,
) -> Result<T, CodecError> {
    let value = body
        .remove(name)
        .ok_or_else(|| malformed(format!("`{}` message lacks `{}`", kind, name)))?;
    serde_json::from_value(value)
        .map_err(|e| malformed(format!("bad `{}` in `{}` message: {}", name, kind, e)))
}

/// Parse wire text into a message.
pub fn decode(text: &str) -> Result<ServerMessage, CodecError> {
    let mut body = parse_object(text)?;
    let kind = match body.remove(DISCRIMINATOR) {
        Some(Value::String(kind)) => kind,
        Some(other) => {
            return Err(malformed(format!("`{}` is not a string: {}", DISCRIMINATOR, other)))
        }
        None => return Err(malformed(format!("missing `{}` discriminator", DISCRIMINATOR))),
    };

    match kind.as_str() {
        "init" => serde_json::from_value::<InitInfo>(Value::Object(body))
            .map(ServerMessage::Init)
            .map_err(|e| malformed(format!("bad `init` message: {}", e))),
        "shutdown" => Ok(ServerMessage::Shutdown),
        "state" => Ok(ServerMessage::State(StateSync {
            state: take_field::<GameState>(&mut body, &kind, STATE_FIELD)?,
        })),
        "result" => {
            let state = take_field::<GameState>(&mut body, &kind, STATE_FIELD)?;
            let winners = take_field::<Vec<usize>>(&mut body, &kind, "winners")?;
            Ok(ServerMessage::Result(GameResult { state, winners }))
        }
        _ => {
            let request_kind = RequestKind::from(kind.as_str());
            if !body.contains_key(THREAD_FIELD) && !request_kind.is_known() {
                return Ok(ServerMessage::Unknown(UnknownMessage { kind, body }));
            }
            let thread = take_field::<u64>(&mut body, &kind, THREAD_FIELD)?;
            let state = take_field::<GameState>(&mut body, &kind, STATE_FIELD)?;
            Ok(ServerMessage::Request(Request {
                kind: request_kind,
                thread,
                state,
                fields: body,
            }))
        }
    }
}

fn state_value(state: &GameState) -> Result<Value, CodecError> {
    serde_json::to_value(state).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Serialize a message to wire text. `decode(encode(m)) == m`.
pub fn encode(message: &ServerMessage) -> Result<String, CodecError> {
    let mut body = match message {
        ServerMessage::Init(info) => match serde_json::to_value(info) {
            Ok(Value::Object(body)) => body,
            Ok(_) => Map::new(),
            Err(e) => return Err(CodecError::Encode(e.to_string())),
        },
        ServerMessage::Shutdown => Map::new(),
        ServerMessage::State(sync) => {
            let mut body = Map::new();
            body.insert(STATE_FIELD.into(), state_value(&sync.state)?);
            body
        }
        ServerMessage::Result(result) => {
            let mut body = Map::new();
            body.insert(STATE_FIELD.into(), state_value(&result.state)?);
            body.insert("winners".into(), Value::from(result.winners.clone()));
            body
        }
        ServerMessage::Request(request) => {
            let mut body = request.fields.clone();
            body.insert(THREAD_FIELD.into(), Value::from(request.thread));
            body.insert(STATE_FIELD.into(), state_value(&request.state)?);
            body
        }
        ServerMessage::Unknown(unknown) => unknown.body.clone(),
    };
    body.insert(DISCRIMINATOR.into(), Value::from(message.kind()));
    Ok(Value::Object(body).to_string())
}

/// Serialize a reply: `{"<kind>": value, "thread": id}`.
pub fn encode_reply(reply: &Reply) -> String {
    let mut body = Map::new();
    body.insert(reply.kind.as_str().to_string(), reply.value.clone());
    body.insert(THREAD_FIELD.into(), Value::from(reply.thread));
    Value::Object(body).to_string()
}

/// Parse a reply produced by [`encode_reply`].
pub fn decode_reply(text: &str) -> Result<Reply, CodecError> {
    let mut body = parse_object(text)?;
    let thread = take_field::<u64>(&mut body, "reply", THREAD_FIELD)?;
    if body.len() != 1 {
        return Err(malformed(format!(
            "reply must carry exactly one answer, found {} fields",
            body.len()
        )));
    }
    let (kind, value) = body
        .into_iter()
        .next()
        .ok_or_else(|| malformed("reply carries no answer"))?;
    Ok(Reply {
        thread,
        kind: RequestKind::from(kind.as_str()),
        value,
    })
}
