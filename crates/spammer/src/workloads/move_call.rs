//! Entry-function call payload.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// A call to `package::module::function` with no type arguments or arguments.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MoveCall {
    pub package: String,
    pub module: String,
    pub function: String,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid call target {0:?}, expected package::module::function")]
pub struct MoveCallParseError(String);

impl FromStr for MoveCall {
    type Err = MoveCallParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split("::").collect();
        match parts.as_slice() {
            [package, module, function]
                if !package.is_empty() && !module.is_empty() && !function.is_empty() =>
            {
                Ok(Self {
                    package: package.to_string(),
                    module: module.to_string(),
                    function: function.to_string(),
                })
            }
            _ => Err(MoveCallParseError(s.to_string())),
        }
    }
}

impl fmt::Display for MoveCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.package, self.module, self.function)
    }
}
