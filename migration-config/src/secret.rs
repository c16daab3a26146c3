use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

/// A [`SecretString`] read from configuration.
///
/// `Debug` output stays redacted. The value is only exposed on demand or when
/// the configuration is serialized back.
#[derive(Clone, Debug, Deserialize)]
#[serde(from = "String")]
pub struct SerializableSecretString(SecretString);

impl SerializableSecretString {
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<String> for SerializableSecretString {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl Serialize for SerializableSecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}
