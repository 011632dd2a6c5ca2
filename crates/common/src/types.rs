use std::fmt;

/// Domain error code carried in every response envelope.
///
/// The numeric value goes on the wire as `code`; [`ServerErrCode::text`] is the
/// prefix of the rendered `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ServerErrCode {
    Ok = 0,
    BadParam = 1,
    NotFound = 2,
    EngineUnavailable = 3,
    StoreQueryFailed = 4,
    Internal = 5,
    EncodeJsonFailed = 6,
    DiscoveryUnavailable = 7,
}

impl ServerErrCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn text(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadParam => "E_BAD_PARAM",
            Self::NotFound => "E_NOT_FOUND",
            Self::EngineUnavailable => "E_ENGINE_UNAVAILABLE",
            Self::StoreQueryFailed => "E_STORE_QUERY_FAILED",
            Self::Internal => "E_INTERNAL",
            Self::EncodeJsonFailed => "E_ENCODE_JSON_FAILED",
            Self::DiscoveryUnavailable => "E_DISCOVERY_UNAVAILABLE",
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for ServerErrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_is_zero() {
        assert_eq!(ServerErrCode::Ok.code(), 0);
        assert_eq!(ServerErrCode::Ok.text(), "OK");
        assert!(ServerErrCode::Ok.is_ok());
    }

    #[test]
    fn display_matches_text() {
        assert_eq!(ServerErrCode::BadParam.to_string(), "E_BAD_PARAM");
        assert_eq!(
            ServerErrCode::EncodeJsonFailed.to_string(),
            ServerErrCode::EncodeJsonFailed.text()
        );
        assert!(!ServerErrCode::NotFound.is_ok());
    }
}
