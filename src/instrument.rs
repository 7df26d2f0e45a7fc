use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::FeedError;

/// The tenant dimension matching state is isolated under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountGroup(pub String);

impl AccountGroup {
    pub fn new(name: impl Into<String>) -> Self {
        AccountGroup(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AccountGroup {
    fn default() -> Self {
        AccountGroup("default".to_string())
    }
}

impl fmt::Display for AccountGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const SEPARATOR: char = '/';

/// Identifies one matching state: an instrument within an account group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstrumentKey {
    pub account_group: AccountGroup,
    pub ticker: String,
}

impl InstrumentKey {
    pub fn new(account_group: impl Into<String>, ticker: impl Into<String>) -> Self {
        InstrumentKey {
            account_group: AccountGroup::new(account_group),
            ticker: ticker.into(),
        }
    }

    /// Returns the usual string code, e.g "desk-a/HSBC"
    pub fn code(&self) -> String {
        format!("{}{SEPARATOR}{}", self.account_group, self.ticker)
    }

    /// Fails unless both parts are non-empty and free of `/`, i.e. unless
    /// [`code`](Self::code) parses back to this key.
    pub fn check(&self) -> Result<(), FeedError> {
        let well_formed = |part: &str| !part.is_empty() && !part.contains(SEPARATOR);
        if well_formed(self.account_group.as_str()) && well_formed(&self.ticker) {
            Ok(())
        } else {
            Err(FeedError::BadKey(self.code()))
        }
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.account_group, self.ticker)
    }
}

impl FromStr for InstrumentKey {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (group, ticker) = s
            .split_once(SEPARATOR)
            .ok_or_else(|| FeedError::BadKey(s.to_string()))?;
        let key = InstrumentKey::new(group, ticker);
        key.check()?;
        Ok(key)
    }
}

impl TryFrom<String> for InstrumentKey {
    type Error = FeedError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<InstrumentKey> for String {
    fn from(key: InstrumentKey) -> Self {
        key.code()
    }
}
