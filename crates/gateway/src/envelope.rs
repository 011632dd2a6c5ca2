//! The JSON envelope every handler answers with:
//! `{"code": <int>, "message": <string>, "data": <any>, "extra": {..} | null}`.

use {
    axum::{
        body::Bytes,
        http::{HeaderValue, StatusCode, header},
        response::{IntoResponse, Response},
    },
    serde::Serialize,
    serde_json::{Map, Value},
    tracing::error,
};

use booster_common::ServerErrCode;

/// Post-processing hook applied to the encoded body (wrapping, signing).
pub type WrapFn = Box<dyn FnOnce(Bytes) -> Bytes + Send>;

/// Last-resort body if even the fallback envelope cannot be encoded.
const FALLBACK_BODY: &[u8] = br#"{"code":6,"message":"E_ENCODE_JSON_FAILED","data":null,"extra":null}"#;

/// Everything a handler needs to answer a request.
pub struct RestResponse<T = Value> {
    /// HTTP status; 200 when unset.
    pub http_code: Option<StatusCode>,
    pub err_code: ServerErrCode,
    pub message: String,
    pub data: Option<T>,
    pub extra: Option<Map<String, Value>>,
    pub wrap: Option<WrapFn>,
}

/// A response after normalization and encoding, ready to be written.
#[derive(Debug)]
pub struct Rendered {
    pub status: StatusCode,
    pub body: Bytes,
}

#[derive(Serialize)]
struct Body<'a, T> {
    code: i32,
    message: &'a str,
    data: Option<&'a T>,
    extra: Option<&'a Map<String, Value>>,
}

impl<T> RestResponse<T> {
    pub fn new(err_code: ServerErrCode) -> Self {
        Self {
            http_code: None,
            err_code,
            message: String::new(),
            data: None,
            extra: None,
            wrap: None,
        }
    }

    pub fn ok(data: T) -> Self {
        Self::new(ServerErrCode::Ok).with_data(data)
    }

    pub fn error(err_code: ServerErrCode, message: impl Into<String>) -> Self {
        Self::new(err_code).with_message(message)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.http_code = Some(status);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    pub fn with_wrap(mut self, wrap: impl FnOnce(Bytes) -> Bytes + Send + 'static) -> Self {
        self.wrap = Some(Box::new(wrap));
        self
    }
}

impl<T: Serialize> RestResponse<T> {
    /// Normalize and encode the envelope.
    ///
    /// Never fails: an encode error is logged and replaced by an
    /// `E_ENCODE_JSON_FAILED` envelope without payload.
    pub fn render(self) -> Rendered {
        let status = self.http_code.unwrap_or(StatusCode::OK);
        let message = render_message(self.err_code, &self.message);

        match encode(
            self.err_code,
            &message,
            self.data.as_ref(),
            self.extra.as_ref(),
        ) {
            Ok(body) => {
                let body = match self.wrap {
                    Some(wrap) => wrap(body),
                    None => body,
                };
                Rendered { status, body }
            },
            Err(e) => {
                error!(code = %ServerErrCode::EncodeJsonFailed, error = %e, "failed to encode response");
                #[cfg(feature = "metrics")]
                metrics::counter!("booster_gateway_envelope_encode_failures_total").increment(1);
                fallback()
            },
        }
    }
}

impl<T: Serialize> IntoResponse for RestResponse<T> {
    fn into_response(self) -> Response {
        let Rendered { status, body } = self.render();
        (
            status,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            body,
        )
            .into_response()
    }
}

/// `text` alone, or `text | message` when a message is present.
pub fn render_message(code: ServerErrCode, message: &str) -> String {
    if message.is_empty() {
        code.text().to_string()
    } else {
        format!("{} | {message}", code.text())
    }
}

fn encode<T: Serialize>(
    code: ServerErrCode,
    message: &str,
    data: Option<&T>,
    extra: Option<&Map<String, Value>>,
) -> serde_json::Result<Bytes> {
    let body = Body {
        code: code.code(),
        message,
        data,
        extra,
    };
    serde_json::to_vec(&body).map(Bytes::from)
}

/// The encode-failure envelope. It has no payload and no hook, so it cannot
/// fail to encode in practice; the static body covers the impossible case.
fn fallback() -> Rendered {
    let code = ServerErrCode::EncodeJsonFailed;
    let message = render_message(code, "");
    let body = encode::<()>(code, &message, None, None)
        .unwrap_or_else(|_| Bytes::from_static(FALLBACK_BODY));
    Rendered {
        status: StatusCode::OK,
        body,
    }
}
