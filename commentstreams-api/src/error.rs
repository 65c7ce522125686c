use anyhow::{anyhow, Context};
use serde_json::json;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Parent comment does not exist")]
    ParentNotFound,

    #[error("Failed storing comment")]
    PersistFailure,

    #[error("Page is not a comment")]
    NotAComment,

    #[error("Invalid CSRF token")]
    InvalidCsrfToken,

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::ParentNotFound => StatusCode::NOT_FOUND,
            Error::PersistFailure => StatusCode::INTERNAL_SERVER_ERROR,
            Error::NotAComment => StatusCode::NOT_FOUND,
            Error::InvalidCsrfToken => StatusCode::FORBIDDEN,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Key of the localized message clients should display
    pub fn message_key(&self) -> &'static str {
        match self {
            Error::Unknown(_) => "commentstreams-api-error-unknown",
            Error::PermissionDenied => "commentstreams-api-error-post-permissions",
            Error::ParentNotFound => "commentstreams-api-error-post-parentpagedoesnotexist",
            Error::PersistFailure => "commentstreams-api-error-post",
            Error::NotAComment => "commentstreams-api-error-notacomment",
            Error::InvalidCsrfToken => "commentstreams-api-error-badtoken",
            Error::NullByteInString(_) => "commentstreams-api-error-nullbyte",
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        let code = self.message_key();
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
                "code": code,
            }),
            Error::PermissionDenied => json!({
                "message": "you do not have permission to post comments",
                "type": "permission-denied",
                "code": code,
            }),
            Error::ParentNotFound => json!({
                "message": "the comment you are replying to does not exist",
                "type": "parent-not-found",
                "code": code,
            }),
            Error::PersistFailure => json!({
                "message": "the reply could not be saved",
                "type": "persist-failure",
                "code": code,
            }),
            Error::NotAComment => json!({
                "message": "the page is not a comment",
                "type": "not-a-comment",
                "code": code,
            }),
            Error::InvalidCsrfToken => json!({
                "message": "invalid or missing csrf token",
                "type": "bad-token",
                "code": code,
            }),
            Error::NullByteInString(s) => json!({
                "message": "there was a null byte in argument string",
                "type": "null-byte",
                "code": code,
                "string": s,
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(String::from(
                    data.get("message")
                        .and_then(|msg| msg.as_str())
                        .unwrap_or(""),
                )),
                "permission-denied" => Error::PermissionDenied,
                "parent-not-found" => Error::ParentNotFound,
                "persist-failure" => Error::PersistFailure,
                "not-a-comment" => Error::NotAComment,
                "bad-token" => Error::InvalidCsrfToken,
                "null-byte" => Error::NullByteInString(String::from(
                    data.get("string").and_then(|s| s.as_str()).ok_or_else(|| {
                        anyhow!("error is a null-byte-in-string without a string")
                    })?,
                )),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}
