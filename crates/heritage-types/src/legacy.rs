//! Comment shapes found in the old flat-file `comments.json`.
//!
//! The file grew by accretion: early entries are bare strings, later ones are
//! objects with a single `media` file name, and the last generation nests its
//! replies inline. Everything is folded into [`LegacyShape`] at parse time so
//! the rest of the code never touches untyped JSON.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Whole legacy document: project id -> comments in display order.
pub type LegacyDocument = BTreeMap<String, Vec<LegacyShape>>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawLegacyShape")]
pub enum LegacyShape {
    PlainText(String),
    MediaShape {
        text: String,
        media: Option<String>,
    },
    ThreadedShape {
        text: String,
        media: Option<String>,
        replies: Vec<LegacyShape>,
    },
}

impl LegacyShape {
    pub fn text(&self) -> &str {
        match self {
            Self::PlainText(text) => text,
            Self::MediaShape { text, .. } | Self::ThreadedShape { text, .. } => text,
        }
    }

    pub fn media(&self) -> Option<&str> {
        match self {
            Self::PlainText(_) => None,
            Self::MediaShape { media, .. } | Self::ThreadedShape { media, .. } => media.as_deref(),
        }
    }

    pub fn replies(&self) -> &[LegacyShape] {
        match self {
            Self::ThreadedShape { replies, .. } => replies,
            _ => &[],
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLegacyShape {
    Text(String),
    Object {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        media: Option<String>,
        #[serde(default)]
        replies: Option<Vec<LegacyShape>>,
    },
}

impl From<RawLegacyShape> for LegacyShape {
    fn from(raw: RawLegacyShape) -> Self {
        match raw {
            RawLegacyShape::Text(text) => LegacyShape::PlainText(text),
            RawLegacyShape::Object {
                text,
                media,
                replies,
            } => {
                let text = text.unwrap_or_default();
                // Old writers stored `""` for "no file".
                let media = media.filter(|m| !m.trim().is_empty());
                match replies {
                    Some(replies) => LegacyShape::ThreadedShape {
                        text,
                        media,
                        replies,
                    },
                    None => LegacyShape::MediaShape { text, media },
                }
            }
        }
    }
}
