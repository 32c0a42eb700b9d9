use std::fmt;

/// Object types stored in the key-value store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectType {
    State,
    Session,
    ProviderSession,
    AccessToken,
    RefreshToken,
    Active,
}

impl ObjectType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Session => "session",
            Self::ProviderSession => "providerSession",
            Self::AccessToken => "accessToken",
            Self::RefreshToken => "refreshToken",
            Self::Active => "active",
        }
    }

    /// Companion objects share ids with their primary, so their ids carry
    /// the type as a prefix.
    #[must_use]
    pub const fn is_primary(self) -> bool {
        matches!(self, Self::State | Self::Session)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds `<prefix>:<type>:<id>` keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn key(&self, kind: ObjectType, id: &str) -> String {
        if kind.is_primary() {
            format!("{}:{kind}:{id}", self.prefix)
        } else {
            format!("{}:{kind}:{kind}_{id}", self.prefix)
        }
    }

    /// Prefix matching every key of `kind`.
    #[must_use]
    pub fn scan_prefix(&self, kind: ObjectType) -> String {
        format!("{}:{kind}:", self.prefix)
    }

    /// Inverse of [`KeySpace::key`].
    #[must_use]
    pub fn id_from_key<'a>(&self, kind: ObjectType, key: &'a str) -> Option<&'a str> {
        let rest = key
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(':')?
            .strip_prefix(kind.as_str())?
            .strip_prefix(':')?;
        if kind.is_primary() {
            Some(rest)
        } else {
            rest.strip_prefix(kind.as_str())?.strip_prefix('_')
        }
    }
}
