// SPDX-License-Identifier: MIT

//! SELinux security contexts (`user:role:type:mls`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid SELinux context {0:?}")]
pub struct ContextParseError(String);

/// A 4-tuple `(user, role, type, mls)`. `mls` may itself contain `:`
/// characters (e.g. `s0:c0.c255`), so it always absorbs everything after
/// the third colon rather than being split further.
///
/// Equality and hashing are string-wise, matching the original's
/// `__eq__`/`__hash__` delegating to `str(self)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SELinuxContext {
    pub user: String,
    pub role: String,
    pub ty: String,
    pub mls: String,
}

impl SELinuxContext {
    pub fn new(
        user: impl Into<String>,
        role: impl Into<String>,
        ty: impl Into<String>,
        mls: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            role: role.into(),
            ty: ty.into(),
            mls: mls.into(),
        }
    }

    /// Construct a synthetic `u:r:<type>:s0` context, used throughout
    /// subject inflation where only the type matters.
    pub fn for_type(ty: impl Into<String>) -> Self {
        Self::new("u", "r", ty, "s0")
    }

    /// Construct a synthetic `u:object_r:<type>:s0` context, used for
    /// dataflow object nodes (§4.6) materialized from a bare type name
    /// rather than a concrete file's stored label.
    pub fn for_object(ty: impl Into<String>) -> Self {
        Self::new("u", "object_r", ty, "s0")
    }
}

impl FromStr for SELinuxContext {
    type Err = ContextParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(4, ':');
        let user = parts.next().ok_or_else(|| ContextParseError(s.to_owned()))?;
        let role = parts.next().ok_or_else(|| ContextParseError(s.to_owned()))?;
        let ty = parts.next().ok_or_else(|| ContextParseError(s.to_owned()))?;
        let mls = parts.next().ok_or_else(|| ContextParseError(s.to_owned()))?;

        Ok(Self::new(user, role, ty, mls))
    }
}

impl fmt::Display for SELinuxContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.user, self.role, self.ty, self.mls)
    }
}
