//! HTTP binding: translates oneM2M-over-HTTP requests to canonical request
//! records and back, and provides the outbound [`RequestSender`] used for
//! notifications and CSE-to-CSE forwarding.
//!
//! Header mapping follows TS-0009: `X-M2M-Origin`, `X-M2M-RI`, `X-M2M-RVI`
//! and friends; `/~/` and `/_/` path prefixes select SP-relative and
//! absolute addressing.

use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::response::Response as AxumResponse;
use axum::Router;
use http::{HeaderMap, Method, StatusCode};
use serde_json::Value;

use ocse_core::{
    time, CseError, FilterCriteria, FilterOperation, FilterUsage, Operation, Origin,
    ReleaseVersion, Request, Response, ResponseStatusCode, ResponseType, ResultContent,
};
use ocse_service::Cse;

mod sender;

pub use sender::HttpSender;

/// Maximum accepted body size (1 MiB, far above any sane primitive).
const BODY_LIMIT: usize = 1 << 20;

/// Build the axum application for a CSE.
pub fn router(cse: Cse) -> Router {
    Router::new().fallback(handle).with_state(cse)
}

/// Serve the HTTP binding until the CSE shuts down.
pub async fn serve(cse: Cse, listen: &str) -> Result<(), CseError> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| CseError::internal(format!("cannot bind {listen}: {e}")))?;
    let token = cse.shutdown_token();
    let app = router(cse);
    tracing::info!(listen = %listen, "HTTP binding listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .map_err(|e| CseError::internal(format!("http server failed: {e}")))
}

async fn handle(State(cse): State<Cse>, http_request: axum::extract::Request) -> AxumResponse {
    let (parts, body) = http_request.into_parts();
    let bytes = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response("", &CseError::bad_request("request body too large"));
        }
    };

    let request = match build_request(&cse, &parts.method, &parts.uri, &parts.headers, &bytes) {
        Ok(request) => request,
        Err((rqi, err)) => return error_response(&rqi, &err),
    };

    let response = cse.process(request).await;
    wire_response(&response)
}

/// Translate an HTTP request into the canonical record.
fn build_request(
    cse: &Cse,
    method: &Method,
    uri: &http::Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Request, (String, CseError)> {
    let rqi = header(headers, "X-M2M-RI").unwrap_or_default();
    if rqi.is_empty() {
        return Err((
            String::new(),
            CseError::bad_request("X-M2M-RI header is mandatory"),
        ));
    }
    let fail = |err: CseError| (rqi.clone(), err);

    let from = header(headers, "X-M2M-Origin").unwrap_or_default();
    let rvi = match header(headers, "X-M2M-RVI") {
        Some(raw) => Some(ReleaseVersion::parse(&raw).ok_or_else(|| {
            fail(CseError::release_version_not_supported(format!(
                "unknown release version: {raw}"
            )))
        })?),
        None => None,
    };

    let content_type = header(headers, "content-type").unwrap_or_default();
    if content_type.starts_with("application/cbor")
        || content_type.contains("onem2m-res+cbor")
    {
        return Err(fail(CseError::new(
            ResponseStatusCode::UnsupportedMediaType,
            "cbor serialization is not supported",
        )));
    }
    let ty = content_type_ty(&content_type);

    let to = path_to_address(uri.path());
    let query = uri.query().unwrap_or("");
    let params = QueryParams::parse(query).map_err(|e| fail(e))?;

    let op = match *method {
        Method::POST => {
            if ty.is_some() {
                Operation::Create
            } else {
                Operation::Notify
            }
        }
        Method::GET => {
            if params.fc.fu == Some(FilterUsage::Discovery) {
                Operation::Discovery
            } else {
                Operation::Retrieve
            }
        }
        Method::PUT => Operation::Update,
        Method::DELETE => Operation::Delete,
        Method::PATCH => {
            if cse.config().http.allow_patch_for_delete {
                Operation::Delete
            } else {
                return Err(fail(CseError::operation_not_allowed(
                    "PATCH is not enabled on this CSE",
                )));
            }
        }
        _ => {
            return Err(fail(CseError::operation_not_allowed(format!(
                "unsupported method {method}"
            ))));
        }
    };

    let pc = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice::<Value>(body)
                .map_err(|e| fail(CseError::bad_request(format!("malformed content: {e}"))))?,
        )
    };

    let rtu = header(headers, "X-M2M-RTU")
        .map(|raw| raw.split('&').map(str::to_string).collect())
        .unwrap_or_default();

    Ok(Request {
        op,
        to,
        from,
        rqi,
        rvi,
        ty,
        pc,
        rcn: params.rcn,
        rt: params.rt.unwrap_or_default(),
        rtu,
        fc: params.fc,
        drt: params.drt,
        atrl: params.atrl,
        ot: header(headers, "X-M2M-OT"),
        rqet: header(headers, "X-M2M-RET"),
        rset: header(headers, "X-M2M-RST"),
        ec: header(headers, "X-M2M-EC"),
        vsi: header(headers, "X-M2M-VSI"),
        hc: 0,
        origin: Origin::Http,
    })
}

/// Translate a canonical response to HTTP.
fn wire_response(response: &Response) -> AxumResponse {
    let status =
        StatusCode::from_u16(response.rsc.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = http::Response::builder()
        .status(status)
        .header("X-M2M-RSC", response.rsc.code().to_string())
        .header("X-M2M-RI", response.rqi.as_str());
    let body = match &response.pc {
        Some(pc) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(pc.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).expect("static response construction")
}

fn error_response(rqi: &str, err: &CseError) -> AxumResponse {
    wire_response(&Response::from_error(rqi.to_string(), err))
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// `/~/id-in/...` is SP-relative, `/_/sp/...` is absolute, anything else is
/// CSE-relative.
fn path_to_address(path: &str) -> String {
    let path = path.strip_prefix('/').unwrap_or(path);
    if let Some(rest) = path.strip_prefix("~/") {
        format!("/{rest}")
    } else if let Some(rest) = path.strip_prefix("_/") {
        format!("//{rest}")
    } else {
        path.to_string()
    }
}

/// The `ty` parameter of a oneM2M content type (`application/json;ty=3`).
fn content_type_ty(content_type: &str) -> Option<u32> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if key.trim() == "ty" {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

#[derive(Default)]
struct QueryParams {
    rcn: Option<ResultContent>,
    rt: Option<ResponseType>,
    drt: Option<u8>,
    atrl: Vec<String>,
    fc: FilterCriteria,
}

impl QueryParams {
    fn parse(query: &str) -> Result<Self, CseError> {
        let mut params = QueryParams::default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "rcn" => {
                    let code: u8 = value
                        .parse()
                        .map_err(|_| CseError::bad_request("invalid rcn"))?;
                    params.rcn = Some(
                        ResultContent::from_code(code)
                            .ok_or_else(|| CseError::bad_request("invalid rcn"))?,
                    );
                }
                "rt" => {
                    let code: u8 = value
                        .parse()
                        .map_err(|_| CseError::bad_request("invalid rt"))?;
                    params.rt = Some(
                        ResponseType::from_code(code)
                            .ok_or_else(|| CseError::bad_request("invalid rt"))?,
                    );
                }
                "fu" => {
                    let code: u8 = value
                        .parse()
                        .map_err(|_| CseError::bad_request("invalid fu"))?;
                    params.fc.fu = Some(
                        FilterUsage::from_code(code)
                            .ok_or_else(|| CseError::bad_request("invalid fu"))?,
                    );
                }
                "fo" => {
                    let code: u8 = value
                        .parse()
                        .map_err(|_| CseError::bad_request("invalid fo"))?;
                    params.fc.fo = FilterOperation::from_code(code)
                        .ok_or_else(|| CseError::bad_request("invalid fo"))?;
                }
                "drt" => {
                    params.drt = value.parse().ok();
                }
                "ty" => {
                    let ty: u32 = value
                        .parse()
                        .map_err(|_| CseError::bad_request("invalid ty filter"))?;
                    params.fc.ty.push(ty);
                }
                "lbl" => params.fc.lbl.push(value),
                "atrl" => params.atrl.push(value),
                "crb" => params.fc.crb = Some(value),
                "cra" => params.fc.cra = Some(value),
                "ms" => params.fc.ms = Some(value),
                "us" => params.fc.us = Some(value),
                "exb" => params.fc.exb = Some(value),
                "exa" => params.fc.exa = Some(value),
                "arp" => params.fc.arp = Some(value),
                "sza" => {
                    params.fc.sza = Some(
                        value
                            .parse()
                            .map_err(|_| CseError::bad_request("invalid sza"))?,
                    );
                }
                "szb" => {
                    params.fc.szb = Some(
                        value
                            .parse()
                            .map_err(|_| CseError::bad_request("invalid szb"))?,
                    );
                }
                "lim" => {
                    params.fc.lim = Some(
                        value
                            .parse()
                            .map_err(|_| CseError::bad_request("invalid lim"))?,
                    );
                }
                "lvl" => {
                    params.fc.lvl = Some(
                        value
                            .parse()
                            .map_err(|_| CseError::bad_request("invalid lvl"))?,
                    );
                }
                "ofst" => {
                    params.fc.ofst = Some(
                        value
                            .parse()
                            .map_err(|_| CseError::bad_request("invalid ofst"))?,
                    );
                }
                // Unknown parameters act as attribute filters.
                other => {
                    params
                        .fc
                        .attr
                        .insert(other.to_string(), attr_value(&value));
                }
            }
        }
        Ok(params)
    }
}

/// Attribute filter values arrive as strings; coerce the obvious scalars.
fn attr_value(raw: &str) -> Value {
    if raw == "true" {
        return Value::Bool(true);
    }
    if raw == "false" {
        return Value::Bool(false);
    }
    if let Ok(n) = raw.parse::<u64>() {
        return Value::from(n);
    }
    Value::from(raw)
}

/// Compute the remaining time budget of a request (for outbound timeouts).
pub(crate) fn remaining_budget(rqet: Option<&str>, default: Duration) -> Duration {
    match rqet.and_then(|ts| time::parse_timestamp(ts).ok()) {
        Some(deadline) => (deadline - time::now())
            .to_std()
            .unwrap_or(Duration::from_millis(1)),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_prefixes() {
        assert_eq!(path_to_address("/cse-in/ae1"), "cse-in/ae1");
        assert_eq!(path_to_address("/~/id-in/cnt1"), "/id-in/cnt1");
        assert_eq!(path_to_address("/_/sp.example/id-in/cnt1"), "//sp.example/id-in/cnt1");
    }

    #[test]
    fn ty_from_content_type() {
        assert_eq!(content_type_ty("application/json;ty=3"), Some(3));
        assert_eq!(content_type_ty("application/json; ty=23"), Some(23));
        assert_eq!(content_type_ty("application/json"), None);
        assert_eq!(content_type_ty("application/json;charset=utf-8"), None);
    }

    #[test]
    fn query_known_and_attribute_params() {
        let params = QueryParams::parse("rcn=4&fu=1&ty=3&ty=4&lbl=tag&lim=10&mni=5&rr=true")
            .unwrap();
        assert_eq!(params.rcn, Some(ResultContent::AttributesChildResources));
        assert_eq!(params.fc.fu, Some(FilterUsage::Discovery));
        assert_eq!(params.fc.ty, vec![3, 4]);
        assert_eq!(params.fc.lbl, vec!["tag"]);
        assert_eq!(params.fc.lim, Some(10));
        assert_eq!(params.fc.attr["mni"], 5);
        assert_eq!(params.fc.attr["rr"], true);
    }

    #[test]
    fn query_rejects_bad_values() {
        assert!(QueryParams::parse("rcn=99").is_err());
        assert!(QueryParams::parse("fu=banana").is_err());
        assert!(QueryParams::parse("lim=-2").is_err());
    }
}
