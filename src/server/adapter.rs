use crate::TabError;
use crate::server::protocol::{Response, error_codes};
use serde::Serialize;
use serde_json::json;

fn map_error_code(err: &TabError) -> i32 {
    match err {
        TabError::AttachFailed(_) | TabError::NotAttached(_) => error_codes::ATTACH_FAILED,
        TabError::TargetNotFound(_) => error_codes::TARGET_NOT_FOUND,
        TabError::JsonError(_) => error_codes::INVALID_PARAMS,
        _ => error_codes::BROWSER_ERROR,
    }
}

pub trait ToResponse {
    fn to_response(self, id: u64) -> Response;
}

impl<T: Serialize> ToResponse for crate::Result<T> {
    fn to_response(self, id: u64) -> Response {
        match self {
            Ok(result) => match serde_json::to_value(&result) {
                Ok(value) => Response::success(id, value),
                Err(e) => Response::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
            },
            Err(e) => {
                let suggestions = e.suggestions();
                let response = Response::error(id, map_error_code(&e), e.to_string());
                if suggestions.is_empty() {
                    response
                } else {
                    response.with_data(json!({ "suggestions": suggestions }))
                }
            }
        }
    }
}

macro_rules! opt_str {
    ($params:expr, $name:literal) => {
        $params.get($name).and_then(|v| v.as_str())
    };
}

macro_rules! opt_u64 {
    ($params:expr, $name:literal) => {
        $params.get($name).and_then(|v| v.as_u64())
    };
}

macro_rules! opt_bool {
    ($params:expr, $name:literal, $default:expr) => {
        $params
            .get($name)
            .and_then(|v| v.as_bool())
            .unwrap_or($default)
    };
}

pub(crate) use opt_bool;
pub(crate) use opt_str;
pub(crate) use opt_u64;
