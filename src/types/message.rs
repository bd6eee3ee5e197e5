//! Conversation messages and generation modes

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// Author of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Image bytes attached to a turn (e.g. a photographed worksheet)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// MIME type, e.g. `image/png`
    pub media_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl ImageAttachment {
    pub fn new(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            data,
        }
    }

    /// Guess the media type from a file extension, defaulting to PNG
    pub fn media_type_for_path(path: &std::path::Path) -> &'static str {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("jpg" | "jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => "image/png",
        }
    }

    /// Base64 payload as vendors expect it inline
    pub fn base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    /// `data:` URL form used by OpenAI-style image parts
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64())
    }
}

mod base64_bytes {
    use super::BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// One turn of the conversation history. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageAttachment>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            image: None,
        }
    }

    #[must_use]
    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }
}

/// Service tier of a single generation request
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum GenerationMode {
    /// One call to the cheapest, fastest provider
    Fast,
    /// Every configured provider in parallel
    #[default]
    Regular,
    /// Every configured provider in parallel, stronger model tier
    Expert,
}

impl GenerationMode {
    /// Whether this mode fans out to every configured provider
    pub const fn is_multi_provider(self) -> bool {
        matches!(self, Self::Regular | Self::Expert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_mode_parses_case_insensitively() {
        assert_eq!("FAST".parse::<GenerationMode>().ok(), Some(GenerationMode::Fast));
        assert_eq!(
            "expert".parse::<GenerationMode>().ok(),
            Some(GenerationMode::Expert)
        );
        assert!("turbo".parse::<GenerationMode>().is_err());
        assert_eq!(GenerationMode::Regular.to_string(), "regular");
    }

    #[test]
    fn test_image_data_url() {
        let image = ImageAttachment::new("image/png", vec![1, 2, 3]);
        assert_eq!(image.data_url(), "data:image/png;base64,AQID");
    }

    #[test]
    fn test_media_type_guess() {
        assert_eq!(
            ImageAttachment::media_type_for_path(Path::new("worksheet.JPG")),
            "image/jpeg"
        );
        assert_eq!(
            ImageAttachment::media_type_for_path(Path::new("scan")),
            "image/png"
        );
    }

    #[test]
    fn test_message_serializes_image_as_base64() {
        let message = Message::user("solve").with_image(ImageAttachment::new("image/png", vec![1, 2, 3]));
        let json = serde_json::to_value(&message).expect("message should serialize");
        assert_eq!(json["image"]["data"], "AQID");
        let back: Message = serde_json::from_value(json).expect("message should deserialize");
        assert_eq!(back, message);
    }
}
