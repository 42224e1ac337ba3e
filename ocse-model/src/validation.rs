use serde_json::{Map, Value};

use ocse_core::{time, CseError};

use crate::attribute::{AttrType, AttributePolicy, Optionality};
use crate::policies::PolicyRegistry;
use crate::types::ResourceType;

/// Validate the attributes of a CREATE primitive against the policy tables.
///
/// `attrs` is the originator-provided attribute map, before the CSE stamps
/// identity attributes, so `NP` violations are caught here.
pub fn validate_create(
    registry: &PolicyRegistry,
    ty: ResourceType,
    attrs: &Map<String, Value>,
) -> Result<(), CseError> {
    let specialization = specialization_policies(registry, ty, attrs);

    for (name, value) in attrs {
        match lookup(registry, ty, specialization, name) {
            Some(policy) => {
                if policy.create == Optionality::NotPresent {
                    return Err(CseError::bad_request(format!(
                        "attribute not allowed in create: {name}"
                    )));
                }
                validate_value(&policy.typ, name, value)?;
            }
            None => {
                if !lenient(registry, ty, specialization) {
                    return Err(CseError::bad_request(format!(
                        "unknown attribute: {name}"
                    )));
                }
            }
        }
    }

    for policy in mandatory_policies(registry, ty, specialization) {
        if policy.create == Optionality::Mandatory && !attrs.contains_key(&policy.name) {
            return Err(CseError::bad_request(format!(
                "missing mandatory attribute: {}",
                policy.name
            )));
        }
    }

    Ok(())
}

/// Validate the attribute changes of an UPDATE primitive.
///
/// `null` values request deletion; deleting a create-mandatory attribute is
/// rejected.
pub fn validate_update(
    registry: &PolicyRegistry,
    ty: ResourceType,
    changes: &Map<String, Value>,
    current: &Map<String, Value>,
) -> Result<(), CseError> {
    let specialization = specialization_policies(registry, ty, current);

    for (name, value) in changes {
        match lookup(registry, ty, specialization, name) {
            Some(policy) => {
                if policy.update == Optionality::NotPresent {
                    return Err(CseError::bad_request(format!(
                        "attribute not updatable: {name}"
                    )));
                }
                if value.is_null() {
                    if policy.create == Optionality::Mandatory {
                        return Err(CseError::bad_request(format!(
                            "cannot delete mandatory attribute: {name}"
                        )));
                    }
                } else {
                    validate_value(&policy.typ, name, value)?;
                }
            }
            None => {
                if !lenient(registry, ty, specialization) {
                    return Err(CseError::bad_request(format!(
                        "unknown attribute: {name}"
                    )));
                }
            }
        }
    }

    Ok(())
}

fn specialization_policies<'a>(
    registry: &'a PolicyRegistry,
    ty: ResourceType,
    attrs: &Map<String, Value>,
) -> Option<&'a [AttributePolicy]> {
    if ty != ResourceType::Fcnt {
        return None;
    }
    attrs
        .get("cnd")
        .and_then(Value::as_str)
        .and_then(|cnd| registry.specialization(cnd))
}

fn lookup<'a>(
    registry: &'a PolicyRegistry,
    ty: ResourceType,
    specialization: Option<&'a [AttributePolicy]>,
    name: &str,
) -> Option<&'a AttributePolicy> {
    registry
        .policy(ty, name)
        .or_else(|| specialization.and_then(|s| s.iter().find(|p| p.name == name)))
}

fn mandatory_policies<'a>(
    registry: &'a PolicyRegistry,
    ty: ResourceType,
    specialization: Option<&'a [AttributePolicy]>,
) -> impl Iterator<Item = &'a AttributePolicy> {
    registry
        .type_policies(ty)
        .iter()
        .chain(specialization.unwrap_or(&[]).iter())
}

/// A flexContainer without a registered specialization accepts custom
/// attributes; announced types accept mirrored attributes.
fn lenient(
    registry: &PolicyRegistry,
    ty: ResourceType,
    specialization: Option<&[AttributePolicy]>,
) -> bool {
    registry.is_lenient(ty) || (ty == ResourceType::Fcnt && specialization.is_none())
}

fn validate_value(typ: &AttrType, name: &str, value: &Value) -> Result<(), CseError> {
    let ok = match typ {
        AttrType::PositiveInt => value.as_u64().is_some_and(|v| v >= 1),
        AttrType::NonNegInt | AttrType::UnsignedInt | AttrType::UnsignedLong => {
            value.as_u64().is_some()
        }
        AttrType::Float => value.as_f64().is_some(),
        AttrType::Bool => value.is_boolean(),
        AttrType::Str | AttrType::AnyUri => value.is_string(),
        AttrType::Timestamp => value
            .as_str()
            .is_some_and(|s| time::parse_timestamp(s).is_ok()),
        AttrType::Duration => value
            .as_str()
            .is_some_and(|s| time::parse_duration(s).is_ok()),
        AttrType::List => value.is_array(),
        AttrType::ListOfStrings | AttrType::ListOfUris => value
            .as_array()
            .is_some_and(|items| items.iter().all(Value::is_string)),
        AttrType::Dict => value.is_object(),
        AttrType::GeoCoordinates => value.is_object(),
        AttrType::Enumerated(range) => value.as_i64().is_some_and(|v| range.contains(v)),
        AttrType::Any => true,
    };
    if ok {
        Ok(())
    } else {
        Err(CseError::bad_request(format!(
            "invalid value for attribute {name}"
        )))
    }
}
