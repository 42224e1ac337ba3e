use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use ocse_core::{
    time, CseError, Operation, Request, RequestSender, Response, ResponseStatusCode,
};

use crate::remaining_budget;

/// Outbound HTTP: notifications, transit forwarding, liveness probes.
pub struct HttpSender {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpSender {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_timeout,
        }
    }

    /// Absolute URL for a primitive sent towards `target` (a peer's point of
    /// access, or a notification URL which is used as-is).
    fn url_for(&self, target: &str, request: &Request) -> String {
        if request.to == target || request.to.starts_with("http") {
            return target.to_string();
        }
        let base = target.trim_end_matches('/');
        if let Some(rest) = request.to.strip_prefix("//") {
            format!("{base}/_/{rest}")
        } else if let Some(rest) = request.to.strip_prefix('/') {
            format!("{base}/~/{rest}")
        } else {
            format!("{base}/{}", request.to)
        }
    }
}

#[async_trait]
impl RequestSender for HttpSender {
    async fn send(&self, target: &str, request: &Request) -> Result<Response, CseError> {
        let method = match request.op {
            Operation::Create | Operation::Notify => reqwest::Method::POST,
            Operation::Retrieve | Operation::Discovery => reqwest::Method::GET,
            Operation::Update => reqwest::Method::PUT,
            Operation::Delete => reqwest::Method::DELETE,
        };
        let url = self.url_for(target, request);
        let timeout = remaining_budget(request.rqet.as_deref(), self.default_timeout);

        let mut builder = self
            .client
            .request(method, &url)
            .timeout(timeout)
            .header("X-M2M-Origin", request.from.as_str())
            .header("X-M2M-RI", request.rqi.as_str());
        if let Some(rvi) = request.rvi {
            builder = builder.header("X-M2M-RVI", rvi.as_str());
        }
        if let Some(ot) = &request.ot {
            builder = builder.header("X-M2M-OT", ot.as_str());
        }
        if let Some(pc) = &request.pc {
            let content_type = match (request.op, request.ty) {
                (Operation::Create, Some(ty)) => format!("application/json;ty={ty}"),
                _ => "application/json".to_string(),
            };
            builder = builder.header("Content-Type", content_type).json(pc);
        }

        let http_response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                CseError::timeout(format!("request to {url} timed out"))
            } else {
                CseError::unreachable(format!("cannot reach {url}: {err}"))
            }
        })?;

        let rsc = http_response
            .headers()
            .get("X-M2M-RSC")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u16>().ok())
            .and_then(ResponseStatusCode::from_code)
            .unwrap_or_else(|| rsc_from_http(http_response.status().as_u16()));
        let rqi = http_response
            .headers()
            .get("X-M2M-RI")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| request.rqi.clone());

        let body = http_response
            .bytes()
            .await
            .map_err(|err| CseError::unreachable(format!("broken response from {url}: {err}")))?;
        let pc = if body.is_empty() {
            None
        } else {
            serde_json::from_slice::<Value>(&body).ok()
        };

        Ok(Response {
            rsc,
            rqi,
            pc,
            from: None,
            to: None,
            ot: Some(time::now_timestamp()),
        })
    }
}

/// Fallback mapping when a peer omits `X-M2M-RSC`.
fn rsc_from_http(status: u16) -> ResponseStatusCode {
    match status {
        200 => ResponseStatusCode::Ok,
        201 => ResponseStatusCode::Created,
        202 => ResponseStatusCode::Accepted,
        400 => ResponseStatusCode::BadRequest,
        403 => ResponseStatusCode::OriginatorHasNoPrivilege,
        404 => ResponseStatusCode::NotFound,
        405 => ResponseStatusCode::OperationNotAllowed,
        408 => ResponseStatusCode::RequestTimeout,
        409 => ResponseStatusCode::Conflict,
        415 => ResponseStatusCode::UnsupportedMediaType,
        501 => ResponseStatusCode::NotImplemented,
        _ => ResponseStatusCode::InternalServerError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(op: Operation, to: &str) -> Request {
        Request::builder(op, to, "/id-in").build()
    }

    #[test]
    fn url_mapping() {
        let sender = HttpSender::new(Duration::from_secs(5));
        // notification target used verbatim
        let req = request(Operation::Notify, "http://host:1400/notify");
        assert_eq!(
            sender.url_for("http://host:1400/notify", &req),
            "http://host:1400/notify"
        );
        // SP-relative forwarding
        let req = request(Operation::Retrieve, "/id-mn/cse-mn/ae1");
        assert_eq!(
            sender.url_for("http://peer:8080", &req),
            "http://peer:8080/~/id-mn/cse-mn/ae1"
        );
        // absolute forwarding
        let req = request(Operation::Retrieve, "//sp.example/id-mn/x");
        assert_eq!(
            sender.url_for("http://peer:8080/", &req),
            "http://peer:8080/_/sp.example/id-mn/x"
        );
        // CSE-relative (registrar CREATE)
        let req = request(Operation::Create, "cse-in");
        assert_eq!(
            sender.url_for("http://peer:8080", &req),
            "http://peer:8080/cse-in"
        );
    }

    #[test]
    fn http_status_fallback() {
        assert_eq!(rsc_from_http(201), ResponseStatusCode::Created);
        assert_eq!(rsc_from_http(404), ResponseStatusCode::NotFound);
        assert_eq!(rsc_from_http(599), ResponseStatusCode::InternalServerError);
    }
}
