//! Subscriber identity values.
//!
//! A [`ClientIdentity`] names one logical consumer of one destination. Two
//! identities are the same subscriber when their destination and client id
//! match; the optional filter expression rides along but never takes part in
//! equality or hashing.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::errors::IdentityError;

/// Name of a change-capture stream that clients subscribe to.
///
/// Always non-empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    /// Create a destination, rejecting the empty string.
    pub fn new(name: impl Into<String>) -> Result<Self, IdentityError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdentityError::Missing);
        }
        Ok(Self(name))
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for Destination {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Destination {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Destination {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric identifier of a consumer within a destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientId(i16);

impl ClientId {
    /// Wrap a raw client id.
    #[must_use]
    pub const fn new(id: i16) -> Self {
        Self(id)
    }

    /// The raw numeric value.
    #[must_use]
    pub const fn get(self) -> i16 {
        self.0
    }
}

impl std::str::FromStr for ClientId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(IdentityError::Missing);
        }
        s.parse::<i16>()
            .map(Self)
            .map_err(|_| IdentityError::InvalidClientId { value: s.to_owned() })
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical subscriber: `(destination, client_id)` plus an optional filter.
#[derive(Clone, Debug, Serialize)]
pub struct ClientIdentity {
    destination: Destination,
    client_id: ClientId,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
}

impl ClientIdentity {
    /// Build an identity from already-validated parts.
    ///
    /// An empty filter string is normalised to `None`.
    #[must_use]
    pub fn new(destination: Destination, client_id: ClientId, filter: Option<String>) -> Self {
        Self {
            destination,
            client_id,
            filter: filter.filter(|f| !f.is_empty()),
        }
    }

    /// Build an identity from the raw strings carried by a request packet.
    ///
    /// Empty `destination` or `client_id` yields [`IdentityError::Missing`];
    /// a client id that is not a 16-bit integer yields
    /// [`IdentityError::InvalidClientId`].
    pub fn parse(destination: &str, client_id: &str, filter: Option<&str>) -> Result<Self, IdentityError> {
        if destination.is_empty() || client_id.is_empty() {
            return Err(IdentityError::Missing);
        }
        let destination = Destination::new(destination)?;
        let client_id = client_id.parse::<ClientId>()?;
        Ok(Self::new(destination, client_id, filter.map(str::to_owned)))
    }

    /// Destination this subscriber reads from.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Client id within the destination.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Filter expression supplied at subscribe time, if any.
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }
}

impl PartialEq for ClientIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.destination == other.destination && self.client_id == other.client_id
    }
}

impl Eq for ClientIdentity {}

impl Hash for ClientIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.destination.hash(state);
        self.client_id.hash(state);
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.destination, self.client_id)
    }
}
