use serde_json::{json, Value};

use ocse_core::{CseError, Request, Response, ResponseStatusCode};
use ocse_model::Resource;

use crate::Cse;

impl Cse {
    /// Re-dispatch a request received on a group's fan-out point to every
    /// member, in parallel, and aggregate the per-member outcomes.
    ///
    /// `rest` is the path below `fopt`, appended to each member address.
    pub(crate) async fn fanout(
        &self,
        request: &Request,
        group: &Resource,
        rest: Option<&str>,
    ) -> Result<Response, CseError> {
        // Fan-out access is governed by the member policies when set,
        // otherwise by the group resource itself.
        let macp = group.get_str_list("macp");
        if macp.is_empty() {
            self.check_access(&request.from, request.op, group).await?;
        } else {
            self.check_access_with(&macp, &request.from, request.op, group.ri())
                .await?;
        }

        let members = group.get_str_list("mid");
        // Per-member deadline: the original deadline capped by the
        // configured fan-out window.
        let cap = self.request_deadline();
        let deadline = match &request.rqet {
            Some(rqet) if rqet.as_str() < cap.as_str() => rqet.clone(),
            _ => cap,
        };

        let mut handles = Vec::with_capacity(members.len());
        for member in members {
            let to = match rest {
                Some(rest) => format!("{member}/{rest}"),
                None => member.clone(),
            };
            let mut builder = Request::builder(request.op, to, request.from.as_str())
                .rqet(deadline.clone())
                .fc(request.fc.clone());
            if let Some(rvi) = request.rvi {
                builder = builder.rvi(rvi);
            }
            if let Some(ty) = request.ty {
                builder = builder.ty(ty);
            }
            if let Some(pc) = &request.pc {
                builder = builder.pc(pc.clone());
            }
            if let Some(rcn) = request.rcn {
                builder = builder.rcn(rcn);
            }
            let member_request = builder.build();
            let cse = self.clone();
            handles.push((
                member,
                tokio::spawn(async move { cse.process(member_request).await }),
            ));
        }

        let mut entries: Vec<Value> = Vec::with_capacity(handles.len());
        let mut any_success = false;
        for (member, handle) in handles {
            let response = match handle.await {
                Ok(response) => response,
                Err(err) => Response::from_error(
                    request.rqi.clone(),
                    &CseError::internal(format!("member dispatch failed: {err}")),
                ),
            };
            if response.is_success() {
                any_success = true;
            }
            entries.push(json!({
                "rsc": response.rsc.code(),
                "rqi": response.rqi,
                "pc": response.pc,
                "to": member,
                "fr": self.inner.config.cse_id.as_str(),
            }));
        }

        let rsc = if any_success || entries.is_empty() {
            ResponseStatusCode::Ok
        } else {
            ResponseStatusCode::GroupMembersNotResponded
        };
        Ok(Response::new(rsc, request.rqi.clone())
            .with_pc(json!({ "m2m:agr": { "m2m:rsp": entries } })))
    }
}
