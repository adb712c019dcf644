//! The build configuration, as read from the `owrtfile` and passed on to the
//! image builder inside the build environment.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A build request: an optional mirror, and the images to build.
///
/// `image` and `images` may both be set. They are passed on as they are,
/// it's up to the image builder to make sense of them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    #[serde(rename(serialize = "Mirror", deserialize = "mirror"), alias = "Mirror")]
    pub mirror: String,

    #[serde(rename(serialize = "Images", deserialize = "images"), alias = "Images")]
    pub images: Option<Vec<ImageSpec>>,

    #[serde(rename(serialize = "Image", deserialize = "image"), alias = "Image")]
    pub image: ImageSpec,
}

/// One image to build. None of the fields are validated here.
///
/// Sequences that are absent in the input are serialized as `null`, empty
/// ones as `[]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSpec {
    #[serde(rename(serialize = "Release", deserialize = "release"), alias = "Release")]
    pub release: String,

    #[serde(rename(serialize = "Target", deserialize = "target"), alias = "Target")]
    pub target: String,

    #[serde(rename(serialize = "Profile", deserialize = "profile"), alias = "Profile")]
    pub profile: String,

    #[serde(rename(serialize = "Packages", deserialize = "packages"), alias = "Packages")]
    pub packages: Option<Vec<String>>,

    #[serde(rename(serialize = "Files", deserialize = "files"), alias = "Files")]
    pub files: Option<Vec<String>>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("config is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("config is not valid TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

impl BuildConfig {
    /// Parses a TOML document. Unknown keys are ignored, missing ones are
    /// left at their defaults.
    pub fn from_bytes(b: &[u8]) -> Result<Self, ParseError> {
        Ok(toml::from_str(std::str::from_utf8(b)?)?)
    }

    /// Produces the JSON document consumed by the image builder.
    /// The output only depends on the contents of `self`.
    ///
    /// Strings are escaped like Go's `encoding/json` does, so `<`, `>`, `&`,
    /// U+2028 and U+2029 are written as `\uXXXX` escapes.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut out = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut out, HtmlSafeFormatter);
        self.serialize(&mut ser)?;
        Ok(out)
    }
}

/// Compact JSON, escaping characters that are unsafe inside HTML.
struct HtmlSafeFormatter;

impl serde_json::ser::Formatter for HtmlSafeFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> std::io::Result<()>
    where
        W: ?Sized + std::io::Write,
    {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            let escaped = match c {
                '<' => "\\u003c",
                '>' => "\\u003e",
                '&' => "\\u0026",
                '\u{2028}' => "\\u2028",
                '\u{2029}' => "\\u2029",
                _ => continue,
            };
            writer.write_all(fragment[start..i].as_bytes())?;
            writer.write_all(escaped.as_bytes())?;
            start = i + c.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}
