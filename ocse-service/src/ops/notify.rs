use ocse_core::{CseError, Operation, Request, Response, ResponseStatusCode};
use ocse_model::{Resource, ResourceType};

use crate::Cse;

impl Cse {
    /// Execute a NOTIFY against a local target: relay to the AE's points of
    /// access, park it on a polling channel, or hand it to the hosting CSE.
    pub(crate) async fn op_notify(
        &self,
        request: &Request,
        target: &Resource,
    ) -> Result<Response, CseError> {
        let pc = request
            .pc
            .as_ref()
            .ok_or_else(|| CseError::bad_request("primitive content is mandatory for NOTIFY"))?;

        match target.ty() {
            ResourceType::Ae => {
                let poa = target.get_str_list("poa");
                let mut last_err: Option<CseError> = None;
                for url in &poa {
                    let outbound = Request::builder(
                        Operation::Notify,
                        url.as_str(),
                        self.inner.config.cse_id.as_str(),
                    )
                    .pc(pc.clone())
                    .rqi(request.rqi.as_str())
                    .rqet(self.request_deadline())
                    .build();
                    match self.inner.sender.send(url, &outbound).await {
                        Ok(response) if response.is_success() => {
                            return Ok(Response::new(response.rsc, request.rqi.clone()));
                        }
                        Ok(response) => {
                            last_err = Some(CseError::new(
                                response.rsc,
                                format!("notification target answered {}", response.rsc),
                            ));
                        }
                        Err(err) => last_err = Some(err),
                    }
                }
                // An AE without reachable points of access may still poll.
                if self.polling_enqueue(target.ri(), pc.clone()) {
                    return Ok(Response::new(ResponseStatusCode::Ok, request.rqi.clone()));
                }
                Err(last_err.unwrap_or_else(|| {
                    CseError::unreachable("AE has no point of access and no polling channel")
                }))
            }
            ResourceType::Csr => {
                let csi = target
                    .get_str("csi")
                    .ok_or_else(|| CseError::internal("remoteCSE without csi"))?;
                self.forward_request(csi, request).await.map(|response| {
                    Response::new(response.rsc, request.rqi.clone())
                })
            }
            ResourceType::CseBase => {
                // Notifications addressed to the CSE itself (e.g. async
                // response delivery) terminate here.
                tracing::debug!(rqi = %request.rqi, "notification received by hosting CSE");
                Ok(Response::new(ResponseStatusCode::Ok, request.rqi.clone()))
            }
            other => Err(CseError::operation_not_allowed(format!(
                "{other} resources cannot be notified"
            ))),
        }
    }
}
