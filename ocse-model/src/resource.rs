use serde_json::{Map, Value};

use ocse_core::CseError;

use crate::attribute::Announce;
use crate::policies::PolicyRegistry;
use crate::types::ResourceType;

/// An in-memory resource: a type tag plus a flat attribute map keyed by
/// oneM2M short names.
///
/// Instances are constructed transiently per request and never shared
/// between requests. The structured name is carried alongside the attributes
/// (it is derived state, not a wire attribute).
#[derive(Clone, Debug)]
pub struct Resource {
    ty: ResourceType,
    /// Wrapper name override for flexContainer specializations
    /// (e.g. `cod:tempe` instead of `m2m:fcnt`).
    tpe_override: Option<String>,
    srn: Option<String>,
    attrs: Map<String, Value>,
}

impl Resource {
    pub fn new(ty: ResourceType) -> Self {
        let mut attrs = Map::new();
        attrs.insert("ty".to_string(), Value::from(ty.code()));
        Self {
            ty,
            tpe_override: None,
            srn: None,
            attrs,
        }
    }

    pub fn from_parts(ty: ResourceType, mut attrs: Map<String, Value>) -> Self {
        attrs.insert("ty".to_string(), Value::from(ty.code()));
        Self {
            ty,
            tpe_override: None,
            srn: None,
            attrs,
        }
    }

    /// Unwrap a primitive content object `{"m2m:cnt": {...}}` into its
    /// attribute map and wrapper key.
    pub fn unwrap_pc(pc: &Value) -> Result<(Map<String, Value>, String), CseError> {
        let obj = pc
            .as_object()
            .ok_or_else(|| CseError::bad_request("primitive content must be an object"))?;
        if obj.len() != 1 {
            return Err(CseError::bad_request(
                "primitive content must hold exactly one wrapped resource",
            ));
        }
        let (key, inner) = obj.iter().next().expect("length checked above");
        let attrs = inner
            .as_object()
            .ok_or_else(|| CseError::bad_request("wrapped resource must be an object"))?;
        Ok((attrs.clone(), key.clone()))
    }

    pub fn ty(&self) -> ResourceType {
        self.ty
    }

    /// The wire wrapper name.
    pub fn tpe(&self) -> &str {
        self.tpe_override.as_deref().unwrap_or(self.ty.tpe())
    }

    pub fn set_tpe_override(&mut self, tpe: impl Into<String>) {
        self.tpe_override = Some(tpe.into());
    }

    pub fn tpe_override(&self) -> Option<&str> {
        self.tpe_override.as_deref()
    }

    // -- universal attribute accessors --

    pub fn ri(&self) -> &str {
        self.get_str("ri").unwrap_or("")
    }

    pub fn rn(&self) -> &str {
        self.get_str("rn").unwrap_or("")
    }

    pub fn pi(&self) -> &str {
        self.get_str("pi").unwrap_or("")
    }

    pub fn ct(&self) -> &str {
        self.get_str("ct").unwrap_or("")
    }

    pub fn lt(&self) -> &str {
        self.get_str("lt").unwrap_or("")
    }

    pub fn et(&self) -> Option<&str> {
        self.get_str("et")
    }

    pub fn acpi(&self) -> Vec<String> {
        self.get_str_list("acpi")
    }

    pub fn lbl(&self) -> Vec<String> {
        self.get_str_list("lbl")
    }

    pub fn srn(&self) -> &str {
        self.srn.as_deref().unwrap_or("")
    }

    pub fn set_srn(&mut self, srn: impl Into<String>) {
        self.srn = Some(srn.into());
    }

    // -- generic accessors --

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(Value::as_str)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.attrs.get(name).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.attrs.get(name).and_then(Value::as_bool)
    }

    pub fn get_str_list(&self, name: &str) -> Vec<String> {
        self.attrs
            .get(name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.attrs.insert(name.to_string(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.attrs.remove(name)
    }

    pub fn attrs(&self) -> &Map<String, Value> {
        &self.attrs
    }

    /// Size of the content carried by this resource: the `cs` attribute when
    /// maintained, otherwise the serialized length of `con`.
    pub fn content_size(&self) -> u64 {
        if let Some(cs) = self.get_u64("cs") {
            return cs;
        }
        self.get("con")
            .map(|con| match con {
                Value::String(s) => s.len() as u64,
                other => serde_json::to_string(other)
                    .map(|s| s.len() as u64)
                    .unwrap_or(0),
            })
            .unwrap_or(0)
    }

    /// Wire representation: `{"m2m:cnt": { ...attrs }}`.
    pub fn wrapped(&self) -> Value {
        let mut outer = Map::new();
        outer.insert(
            self.tpe().to_string(),
            Value::Object(self.attrs.clone()),
        );
        Value::Object(outer)
    }

    /// Wire representation restricted to the given attribute names
    /// (release-5 partial retrieve). `ty` is always included.
    pub fn wrapped_partial(&self, names: &[String]) -> Value {
        let mut inner = Map::new();
        for name in names {
            if let Some(value) = self.attrs.get(name) {
                inner.insert(name.clone(), value.clone());
            }
        }
        inner.insert("ty".to_string(), Value::from(self.ty.code()));
        let mut outer = Map::new();
        outer.insert(self.tpe().to_string(), Value::Object(inner));
        Value::Object(outer)
    }

    /// Apply an UPDATE: present attributes replace, `null` deletes.
    /// Returns the names of attributes that changed.
    pub fn merge_update(&mut self, changes: &Map<String, Value>) -> Vec<String> {
        let mut changed = Vec::new();
        for (name, value) in changes {
            if value.is_null() {
                if self.attrs.remove(name).is_some() {
                    changed.push(name.clone());
                }
            } else if self.attrs.get(name) != Some(value) {
                self.attrs.insert(name.clone(), value.clone());
                changed.push(name.clone());
            }
        }
        changed
    }

    /// Derive the announced copy of this resource.
    ///
    /// Universal announced attributes and `MA` attributes are always
    /// mirrored; `OA` attributes only when listed in `aa`. The copy links
    /// back to the original through `lnk`.
    pub fn announced_copy(
        &self,
        registry: &PolicyRegistry,
        lnk: &str,
    ) -> Option<Resource> {
        let annc_ty = self.ty.announced_variant()?;
        let aa = self.get_str_list("aa");
        let mut attrs = Map::new();
        for (name, value) in &self.attrs {
            let Some(policy) = registry.policy(self.ty, name) else {
                continue;
            };
            let mirrored = match policy.announce {
                Announce::MA => true,
                Announce::OA => aa.iter().any(|a| a == name),
                Announce::NA => false,
            };
            if mirrored {
                attrs.insert(name.clone(), value.clone());
            }
        }
        attrs.insert("lnk".to_string(), Value::from(lnk));
        let mut copy = Resource::from_parts(annc_ty, attrs);
        copy.remove("ri");
        copy.remove("pi");
        copy.remove("ct");
        copy.remove("lt");
        copy.remove("rn");
        if let Some(tpe) = &self.tpe_override {
            copy.set_tpe_override(format!("{tpe}A"));
        }
        Some(copy)
    }
}
