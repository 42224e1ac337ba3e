use ocse_core::{FilterCriteria, FilterOperation};

use crate::resource::Resource;

/// Evaluate discovery/subscription filter criteria against a resource.
///
/// Timestamps compare lexicographically (the basic format is fixed-width).
/// `fo` selects whether the set conditions AND or OR together; an empty
/// criteria set matches everything.
pub fn matches_filter(fc: &FilterCriteria, res: &Resource) -> bool {
    let mut outcomes: Vec<bool> = Vec::new();

    if !fc.ty.is_empty() {
        outcomes.push(fc.ty.contains(&res.ty().code()));
    }
    if !fc.lbl.is_empty() {
        let labels = res.lbl();
        outcomes.push(fc.lbl.iter().any(|l| labels.contains(l)));
    }
    if let Some(crb) = &fc.crb {
        outcomes.push(!res.ct().is_empty() && res.ct() < crb.as_str());
    }
    if let Some(cra) = &fc.cra {
        outcomes.push(!res.ct().is_empty() && res.ct() > cra.as_str());
    }
    if let Some(ms) = &fc.ms {
        outcomes.push(!res.lt().is_empty() && res.lt() >= ms.as_str());
    }
    if let Some(us) = &fc.us {
        outcomes.push(!res.lt().is_empty() && res.lt() <= us.as_str());
    }
    if let Some(exb) = &fc.exb {
        outcomes.push(res.et().is_some_and(|et| et < exb.as_str()));
    }
    if let Some(exa) = &fc.exa {
        outcomes.push(res.et().is_some_and(|et| et > exa.as_str()));
    }
    if let Some(sza) = fc.sza {
        outcomes.push(res.content_size() >= sza);
    }
    if let Some(szb) = fc.szb {
        outcomes.push(res.content_size() < szb);
    }
    for (name, expected) in &fc.attr {
        outcomes.push(res.get(name) == Some(expected));
    }

    if outcomes.is_empty() {
        return true;
    }
    match fc.fo {
        FilterOperation::And => outcomes.iter().all(|b| *b),
        FilterOperation::Or => outcomes.iter().any(|b| *b),
    }
}
