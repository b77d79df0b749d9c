//! Textual encodings for cached values.
//!
//! Each value type selects exactly one encoding through
//! [`CacheValue::Encoding`]. The choice is made once, at the impl site, so
//! there is no runtime probing of what a value "supports".

use crate::error::{CacheError, CacheResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::str::FromStr;

/// A way of turning `V` into text and back.
pub trait Encoding<V> {
    /// Short name used in error messages.
    const NAME: &'static str;

    /// Encodes a value.
    fn encode(value: &V) -> CacheResult<String>;

    /// Decodes a value previously produced by [`Encoding::encode`].
    fn decode(text: &str) -> CacheResult<V>;
}

/// Uses the type's own text form (`Display` + `FromStr`).
#[derive(Debug)]
pub enum Text {}

impl<V> Encoding<V> for Text
where
    V: Display + FromStr,
    V::Err: Display,
{
    const NAME: &'static str = "text";

    fn encode(value: &V) -> CacheResult<String> {
        Ok(value.to_string())
    }

    fn decode(text: &str) -> CacheResult<V> {
        text.parse()
            .map_err(|e| CacheError::codec(<Self as Encoding<V>>::NAME, e))
    }
}

/// Stores raw bytes as standard base64.
#[derive(Debug)]
pub enum Binary {}

impl<V> Encoding<V> for Binary
where
    V: AsRef<[u8]> + From<Vec<u8>>,
{
    const NAME: &'static str = "binary";

    fn encode(value: &V) -> CacheResult<String> {
        Ok(STANDARD.encode(value.as_ref()))
    }

    fn decode(text: &str) -> CacheResult<V> {
        STANDARD
            .decode(text)
            .map(V::from)
            .map_err(|e| CacheError::codec(<Self as Encoding<V>>::NAME, e))
    }
}

/// Generic structured fallback through serde JSON.
#[derive(Debug)]
pub enum Json {}

impl<V> Encoding<V> for Json
where
    V: Serialize + DeserializeOwned,
{
    const NAME: &'static str = "json";

    fn encode(value: &V) -> CacheResult<String> {
        serde_json::to_string(value).map_err(|e| CacheError::codec(<Self as Encoding<V>>::NAME, e))
    }

    fn decode(text: &str) -> CacheResult<V> {
        serde_json::from_str(text).map_err(|e| CacheError::codec(<Self as Encoding<V>>::NAME, e))
    }
}

/// A value that can live in any cache backend.
///
/// Pick the most specific encoding the type supports: [`Text`] when it has a
/// lossless text form, [`Binary`] when it is a byte buffer, otherwise [`Json`].
///
/// ```
/// use drivefs_cache::{CacheValue, Json};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// struct Entry {
///     id: String,
///     size: u64,
/// }
///
/// impl CacheValue for Entry {
///     type Encoding = Json;
/// }
///
/// let entry = Entry { id: "abc".into(), size: 3 };
/// let text = entry.encode().unwrap();
/// assert_eq!(Entry::decode(&text).unwrap(), entry);
/// ```
pub trait CacheValue: Clone + Send + Sync + 'static {
    /// Encoding used for this type.
    type Encoding: Encoding<Self>;

    /// Encodes `self` with the type's encoding.
    fn encode(&self) -> CacheResult<String> {
        <Self::Encoding as Encoding<Self>>::encode(self)
    }

    /// Decodes a value with the type's encoding.
    fn decode(text: &str) -> CacheResult<Self> {
        <Self::Encoding as Encoding<Self>>::decode(text)
    }
}

macro_rules! text_values {
    ($($ty:ty),* $(,)?) => {
        $(impl CacheValue for $ty {
            type Encoding = Text;
        })*
    };
}

text_values!(String, bool, u32, u64, i32, i64);

impl CacheValue for Vec<u8> {
    type Encoding = Binary;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        parents: Vec<String>,
    }

    impl CacheValue for Record {
        type Encoding = Json;
    }

    #[test]
    fn test_text_uses_display_form() {
        assert_eq!(42u64.encode().unwrap(), "42");
        assert_eq!(u64::decode("42").unwrap(), 42);
        assert_eq!("plain".to_string().encode().unwrap(), "plain");
    }

    #[test]
    fn test_text_decode_error_names_encoding() {
        let err = u64::decode("not a number").unwrap_err();
        assert!(matches!(err, CacheError::Codec { encoding: "text", .. }));
    }

    #[test]
    fn test_binary_is_base64() {
        let bytes = vec![0u8, 159, 146, 150];
        let text = bytes.encode().unwrap();
        assert_eq!(text, "AJ+Slg==");
        assert_eq!(Vec::<u8>::decode(&text).unwrap(), bytes);
    }

    #[test]
    fn test_binary_rejects_garbage() {
        let err = Vec::<u8>::decode("%%%").unwrap_err();
        assert!(matches!(err, CacheError::Codec { encoding: "binary", .. }));
    }

    #[test]
    fn test_json_fallback() {
        let record = Record {
            name: "a/b".to_string(),
            parents: vec!["root".to_string()],
        };
        let text = record.encode().unwrap();
        assert!(text.starts_with('{'));
        assert_eq!(Record::decode(&text).unwrap(), record);
    }
}
