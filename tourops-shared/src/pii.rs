use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::ops::Deref;

/// A wrapper for passenger-identifying data that masks its value in Debug and Display output.
///
/// Serialization passes the real value through: the wrapper exists to keep names out of
/// `tracing` output like `info!("{:?}", booking)`, not out of API responses.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Masked<T>(pub T);

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Deref for Masked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> From<T> for Masked<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T> Masked<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted_but_json_is_not() {
        let names = Masked(vec!["Ada Lovelace".to_string()]);
        assert_eq!(format!("{:?}", names), "********");
        assert_eq!(serde_json::to_string(&names).unwrap(), r#"["Ada Lovelace"]"#);
        assert_eq!(names.len(), 1);
    }
}
