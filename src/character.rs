//! Persona definition
//!
//! Loads the character file that both behaviors speak through. Loading is
//! all-or-nothing: a file either validates completely or yields a
//! [`SchemaError`], never a partially filled character.
//!
//! Accepted layout (camelCase keys, snake_case aliases also accepted):
//!
//! ```json
//! {
//!   "name": "Oracle", "handle": "@oracle",
//!   "bio": ["..."], "knowledge": ["..."], "topics": ["..."],
//!   "messageExamples": [["hello", {"user": "oracle", "content": {"text": "greetings"}}]],
//!   "style": {"all": ["..."], "chat": ["..."], "post": ["..."]},
//!   "phrases": {"prophecies": ["..."], "revelations": ["..."], "warnings": ["..."]}
//! }
//! ```

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Persona validation errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to read persona file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid persona JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {0} must not be empty")]
    EmptyField(&'static str),

    #[error("Unknown style key: {0}")]
    UnknownStyleKey(String),

    #[error("Unknown phrase key: {0}")]
    UnknownPhraseKey(String),

    #[error("Malformed message example #{index}: {reason}")]
    MalformedExample { index: usize, reason: String },

    #[error("Handle already registered: {0}")]
    DuplicateHandle(String),
}

/// Where a style rule applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleContext {
    All,
    Chat,
    Post,
}

impl StyleContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Chat => "chat",
            Self::Post => "post",
        }
    }
}

impl FromStr for StyleContext {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "chat" => Ok(Self::Chat),
            "post" => Ok(Self::Post),
            other => Err(SchemaError::UnknownStyleKey(other.to_string())),
        }
    }
}

/// Signature phrase families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhraseCategory {
    Prophecies,
    Revelations,
    Warnings,
}

impl PhraseCategory {
    pub const ALL: [PhraseCategory; 3] = [Self::Prophecies, Self::Revelations, Self::Warnings];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prophecies => "prophecies",
            Self::Revelations => "revelations",
            Self::Warnings => "warnings",
        }
    }
}

impl FromStr for PhraseCategory {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prophecies" => Ok(Self::Prophecies),
            "revelations" => Ok(Self::Revelations),
            "warnings" => Ok(Self::Warnings),
            other => Err(SchemaError::UnknownPhraseKey(other.to_string())),
        }
    }
}

impl fmt::Display for PhraseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of an example exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleMessage {
    /// Speaker, when the file names one
    pub user: Option<String>,
    pub text: String,
}

/// Stimulus and the persona's response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleExchange {
    pub stimulus: ExampleMessage,
    pub response: ExampleMessage,
}

/// A validated persona
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Character {
    pub name: String,
    pub handle: String,
    pub bio: Vec<String>,
    pub knowledge: Vec<String>,
    pub message_examples: Vec<ExampleExchange>,
    pub post_examples: Vec<String>,
    pub topics: Vec<String>,
    pub style: BTreeMap<StyleContext, Vec<String>>,
    pub adjectives: Vec<String>,
    pub phrases: BTreeMap<PhraseCategory, Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCharacter {
    name: Option<String>,
    handle: Option<String>,
    bio: Option<Vec<String>>,
    knowledge: Option<Vec<String>>,
    #[serde(alias = "message_examples")]
    message_examples: Option<Vec<Value>>,
    #[serde(default, alias = "post_examples")]
    post_examples: Vec<String>,
    topics: Option<Vec<String>>,
    style: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    adjectives: Vec<String>,
    phrases: Option<BTreeMap<String, Vec<String>>>,
}

impl Character {
    /// Parse and validate a persona from JSON text
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let raw: RawCharacter = serde_json::from_str(json)?;

        let name = required(raw.name, "name")?;
        let handle = required(raw.handle, "handle")?;
        if name.trim().is_empty() {
            return Err(SchemaError::EmptyField("name"));
        }
        if normalize_handle(&handle).is_empty() {
            return Err(SchemaError::EmptyField("handle"));
        }

        let mut style = BTreeMap::new();
        for (key, rules) in required(raw.style, "style")? {
            style.insert(key.parse::<StyleContext>()?, rules);
        }

        let mut phrases = BTreeMap::new();
        for (key, lines) in required(raw.phrases, "phrases")? {
            phrases.insert(key.parse::<PhraseCategory>()?, lines);
        }

        let message_examples = required(raw.message_examples, "messageExamples")?
            .iter()
            .enumerate()
            .map(|(index, pair)| parse_exchange(index, pair))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: name.trim().to_string(),
            handle: handle.trim().to_string(),
            bio: required(raw.bio, "bio")?,
            knowledge: required(raw.knowledge, "knowledge")?,
            message_examples,
            post_examples: raw.post_examples,
            topics: required(raw.topics, "topics")?,
            style,
            adjectives: raw.adjectives,
            phrases,
        })
    }

    /// Load and validate a persona file
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let character = Self::from_json_str(&content)?;
        info!("Loaded persona {} ({}) from {:?}", character.name, character.handle, path);
        Ok(character)
    }

    /// Style rules for a context, general rules first
    pub fn style_rules(&self, context: StyleContext) -> Vec<&str> {
        let general = self.style.get(&StyleContext::All).into_iter().flatten();
        let specific = match context {
            StyleContext::All => None,
            other => self.style.get(&other),
        };
        general
            .chain(specific.into_iter().flatten())
            .map(String::as_str)
            .collect()
    }

    pub fn phrases(&self, category: PhraseCategory) -> &[String] {
        self.phrases.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Handle without a leading `@`, lowercased
    pub fn handle_key(&self) -> String {
        normalize_handle(&self.handle)
    }
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, SchemaError> {
    value.ok_or(SchemaError::MissingField(field))
}

fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}

fn parse_exchange(index: usize, pair: &Value) -> Result<ExampleExchange, SchemaError> {
    let malformed = |reason: &str| SchemaError::MalformedExample {
        index,
        reason: reason.to_string(),
    };

    let items = pair
        .as_array()
        .ok_or_else(|| malformed("expected a [stimulus, response] array"))?;
    if items.len() != 2 {
        return Err(malformed(&format!("expected 2 messages, found {}", items.len())));
    }

    let message = |value: &Value| -> Result<ExampleMessage, SchemaError> {
        match value {
            Value::String(text) => Ok(ExampleMessage {
                user: None,
                text: text.clone(),
            }),
            Value::Object(obj) => {
                let text = obj
                    .get("content")
                    .and_then(|c| c.get("text"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("message object needs content.text"))?;
                Ok(ExampleMessage {
                    user: obj.get("user").and_then(Value::as_str).map(str::to_string),
                    text: text.to_string(),
                })
            }
            _ => Err(malformed("message must be a string or an object")),
        }
    };

    Ok(ExampleExchange {
        stimulus: message(&items[0])?,
        response: message(&items[1])?,
    })
}

/// Handles in use by this process
#[derive(Default)]
pub struct CharacterRegistry {
    characters: Mutex<HashMap<String, Arc<Character>>>,
}

impl CharacterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persona; its handle must not be taken
    pub fn register(&self, character: Character) -> Result<Arc<Character>, SchemaError> {
        let key = character.handle_key();
        let mut characters = self.characters.lock();
        if characters.contains_key(&key) {
            return Err(SchemaError::DuplicateHandle(character.handle));
        }
        let character = Arc::new(character);
        characters.insert(key, Arc::clone(&character));
        Ok(character)
    }

    pub fn get(&self, handle: &str) -> Option<Arc<Character>> {
        self.characters.lock().get(&normalize_handle(handle)).cloned()
    }

    pub fn remove(&self, handle: &str) -> Option<Arc<Character>> {
        self.characters.lock().remove(&normalize_handle(handle))
    }

    pub fn len(&self) -> usize {
        self.characters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reload `persona` from `path` and move its registry entry along with it.
    ///
    /// Nothing changes if the file is invalid or its handle belongs to
    /// another registered persona.
    pub fn reload(&self, persona: &SharedCharacter, path: &Path) -> Result<Arc<Character>, SchemaError> {
        let character = Character::load(path)?;
        let old_key = persona.current().handle_key();
        let new_key = character.handle_key();

        let mut characters = self.characters.lock();
        if new_key != old_key && characters.contains_key(&new_key) {
            return Err(SchemaError::DuplicateHandle(character.handle));
        }

        let character = Arc::new(character);
        characters.remove(&old_key);
        characters.insert(new_key, Arc::clone(&character));
        persona.replace(Arc::clone(&character));
        info!("Reloaded persona {} from {}", character.handle, path.display());
        Ok(character)
    }
}

/// Persona shared with the behaviors; reload swaps the whole object
#[derive(Clone)]
pub struct SharedCharacter {
    inner: Arc<RwLock<Arc<Character>>>,
}

impl SharedCharacter {
    pub fn new(character: impl Into<Arc<Character>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(character.into())),
        }
    }

    /// Snapshot of the current persona
    pub fn current(&self) -> Arc<Character> {
        self.inner.read().clone()
    }

    /// Swap in a new persona, returning the previous one
    pub fn replace(&self, character: impl Into<Arc<Character>>) -> Arc<Character> {
        std::mem::replace(&mut *self.inner.write(), character.into())
    }

    /// Reload from disk; the current persona is kept if the file is invalid
    pub fn reload(&self, path: &Path) -> Result<Arc<Character>, SchemaError> {
        let character = Character::load(path)?;
        self.replace(character);
        Ok(self.current())
    }
}
