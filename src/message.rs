//! Wire envelope types.
//!
//! One plain struct per message kind, encoded as an externally-tagged
//! client/server union.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Literal "erase this field" sentinel understood by the server and by
/// [`is_null`].
pub const NULL_SENTINEL: &str = "\u{2421}";

/// True iff `value` is the null-sentinel string.
#[must_use]
pub fn is_null(value: &str) -> bool {
    value == NULL_SENTINEL
}

pub type ParamsMap = BTreeMap<String, Value>;

// ── Server → client ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ctrl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub code: u16,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ParamsMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<chrono::DateTime<chrono::Utc>>,
}

impl Ctrl {
    /// Reads a string-valued entry out of `params`, e.g. `param("what")`.
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.as_ref()?.get(key)?.as_str()
    }

    #[must_use]
    pub fn param_bool(&self, key: &str) -> bool {
        self.params
            .as_ref()
            .and_then(|p| p.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    #[must_use]
    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.params.as_ref()?.get(key)?.as_i64()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Data {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub seq: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<ParamsMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

/// A single credential method/value pair, as carried in `meta.cred` and used
/// by `acc`/`login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub meth: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<String>,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cred: Option<Vec<Credential>>,
}

impl Meta {
    /// The `updated` timestamp embedded in `desc`, if present.
    #[must_use]
    pub fn updated(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.desc
            .as_ref()?
            .get("updated")?
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pres {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    pub what: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    pub topic: String,
    pub what: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
}

/// One decoded server frame. Externally tagged on the wire (`{"ctrl": {...}}`
/// etc.), so exactly one recognized tag is required, never zero, never two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    #[serde(rename = "ctrl")]
    Ctrl(Ctrl),
    #[serde(rename = "data")]
    Data(Data),
    #[serde(rename = "meta")]
    Meta(Meta),
    #[serde(rename = "pres")]
    Pres(Pres),
    #[serde(rename = "info")]
    Info(Info),
}

impl ServerMessage {
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Ctrl(c) => c.id.as_deref(),
            Self::Data(d) => d.id.as_deref(),
            Self::Meta(m) => m.id.as_deref(),
            Self::Pres(_) | Self::Info(_) => None,
        }
    }

    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Ctrl(c) => c.topic.as_deref(),
            Self::Data(d) => Some(&d.topic),
            Self::Meta(m) => Some(&m.topic),
            Self::Pres(p) => Some(&p.topic),
            Self::Info(i) => Some(&i.topic),
        }
    }
}

// ── Client → server ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Hi {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ua: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Acc {
    pub id: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default)]
    pub login: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cred: Option<Vec<Credential>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Login {
    pub id: String,
    pub scheme: String,
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cred: Option<Vec<Credential>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Sub {
    pub id: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Leave {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub unsub: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Pub {
    pub id: String,
    pub topic: String,
    #[serde(default, rename = "noecho")]
    pub no_echo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<ParamsMap>,
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Get {
    pub id: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub what: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Set {
    pub id: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// `del` target selector: message-id, range list, from/to, credential,
/// user, or account-wide delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelWhat {
    Msg,
    Topic,
    Sub,
    Cred,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Del {
    pub id: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub what: Option<DelWhat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delseq: Option<Vec<SeqRange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cred: Option<Credential>,
    #[serde(default)]
    pub hard: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeqRange {
    pub low: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hi: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Note {
    pub topic: String,
    pub what: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
}

/// One outbound client frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    #[serde(rename = "hi")]
    Hi(Hi),
    #[serde(rename = "acc")]
    Acc(Acc),
    #[serde(rename = "login")]
    Login(Login),
    #[serde(rename = "sub")]
    Sub(Sub),
    #[serde(rename = "leave")]
    Leave(Leave),
    #[serde(rename = "pub")]
    Pub(Pub),
    #[serde(rename = "get")]
    Get(Get),
    #[serde(rename = "set")]
    Set(Set),
    #[serde(rename = "del")]
    Del(Del),
    #[serde(rename = "note")]
    Note(Note),
}

impl ClientMessage {
    /// The message-id this frame carries, if any (`note` never has one).
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Hi(m) => Some(&m.id),
            Self::Acc(m) => Some(&m.id),
            Self::Login(m) => Some(&m.id),
            Self::Sub(m) => Some(&m.id),
            Self::Leave(m) => Some(&m.id),
            Self::Pub(m) => Some(&m.id),
            Self::Get(m) => Some(&m.id),
            Self::Set(m) => Some(&m.id),
            Self::Del(m) => Some(&m.id),
            Self::Note(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_null_recognizes_sentinel_only() {
        assert!(is_null(NULL_SENTINEL));
        assert!(!is_null("null"));
        assert!(!is_null(""));
    }

    #[test]
    fn hi_serializes_without_null_fields() {
        let hi = ClientMessage::Hi(Hi {
            id: "1".into(),
            ver: Some("0".into()),
            ua: Some("app (os; en);tinode-core/x".into()),
            dev: None,
            lang: Some("en".into()),
        });
        let json = serde_json::to_string(&hi).unwrap();
        assert!(json.starts_with(r#"{"hi":"#));
        assert!(!json.contains("\"dev\""));
    }

    #[test]
    fn ctrl_hello_fixture_decodes() {
        let raw = r#"{"ctrl":{"id":"1","code":201,"text":"Created","params":{"ver":"0.20","build":"abc"}}}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ServerMessage::Ctrl(ctrl) => {
                assert_eq!(ctrl.id.as_deref(), Some("1"));
                assert_eq!(ctrl.code, 201);
                assert!(ctrl.is_success());
                assert_eq!(ctrl.param_str("ver"), Some("0.20"));
                assert_eq!(ctrl.param_str("build"), Some("abc"));
            },
            other => panic!("expected ctrl, got {other:?}"),
        }
    }

    #[test]
    fn rejects_frame_with_no_recognized_tag() {
        let raw = r#"{"bogus":{}}"#;
        assert!(serde_json::from_str::<ServerMessage>(raw).is_err());
    }

    #[test]
    fn rejects_frame_with_two_tags() {
        let raw = r#"{"ctrl":{"code":200,"text":"ok"},"data":{"topic":"grpX","seq":1}}"#;
        assert!(serde_json::from_str::<ServerMessage>(raw).is_err());
    }

    #[test]
    fn evicted_ctrl_fixture() {
        let raw = r#"{"ctrl":{"code":205,"text":"evicted","topic":"grpX","params":{"unsub":true}}}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        let ServerMessage::Ctrl(ctrl) = msg else {
            panic!("expected ctrl");
        };
        assert_eq!(ctrl.code, 205);
        assert!(ctrl.param_bool("unsub"));
        assert_eq!(ctrl.topic.as_deref(), Some("grpX"));
    }
}
