// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error type for congestion control configuration.
//!
//! The per-sample control path never fails. Errors are only produced when
//! parsing configuration or host state names.

use strum_macros::EnumIter;

/// Congestion control error.
#[derive(Clone, Debug, PartialEq, Eq, EnumIter)]
pub enum Error {
    /// The configuration is invalid.
    InvalidConfig(String),

    /// The host reported a congestion state that cannot be recognized.
    InvalidState(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::convert::From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidConfig(format!("{}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn error_display() {
        let names: Vec<String> = Error::iter().map(|e| e.to_string()).collect();
        assert_eq!(names, ["InvalidConfig(\"\")", "InvalidState(\"\")"]);

        let e = Error::InvalidState("recover".into());
        assert_eq!(format!("{}", e), "InvalidState(\"recover\")");
    }

    #[test]
    fn json_error() {
        use std::error::Error;
        let e = serde_json::from_str::<u32>("x").unwrap_err();
        let e = super::Error::from(e);

        assert!(matches!(e, super::Error::InvalidConfig(_)));
        assert!(format!("{}", e).starts_with("InvalidConfig("));
        assert!(e.source().is_none());
    }
}
