use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use crate::attribute::{attr, Announce, AttrType, AttributePolicy, EnumRange, Optionality};
use crate::types::ResourceType;

use Announce::{MA, NA, OA};
use Optionality::{Mandatory as M, NotPresent as NP, Optional as O};

/// Registry of attribute policies: universal attributes, per-type tables,
/// and flexContainer specializations loaded from policy files.
///
/// Announced types are *lenient*: they accept attributes beyond their table,
/// since they carry mirrored copies of arbitrary announced originals.
pub struct PolicyRegistry {
    universal: Vec<AttributePolicy>,
    by_type: HashMap<ResourceType, Vec<AttributePolicy>>,
    specializations: HashMap<String, Vec<AttributePolicy>>,
    lenient: HashSet<ResourceType>,
}

impl PolicyRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = PolicyRegistry {
            universal: universal_policies(),
            by_type: HashMap::new(),
            specializations: HashMap::new(),
            lenient: HashSet::new(),
        };
        for (ty, policies) in default_type_policies() {
            registry.by_type.insert(ty, policies);
        }
        for ty in [
            ResourceType::AcpAnnc,
            ResourceType::AeAnnc,
            ResourceType::CntAnnc,
            ResourceType::CinAnnc,
            ResourceType::FcntAnnc,
        ] {
            registry.lenient.insert(ty);
        }
        registry
    }

    pub fn universal(&self) -> &[AttributePolicy] {
        &self.universal
    }

    pub fn type_policies(&self, ty: ResourceType) -> &[AttributePolicy] {
        self.by_type.get(&ty).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Look up the policy for an attribute of a type: universal first, then
    /// the per-type table.
    pub fn policy(&self, ty: ResourceType, name: &str) -> Option<&AttributePolicy> {
        self.universal
            .iter()
            .find(|p| p.name == name)
            .or_else(|| self.type_policies(ty).iter().find(|p| p.name == name))
    }

    /// Custom-attribute policies for a flexContainer specialization.
    pub fn specialization(&self, cnd: &str) -> Option<&[AttributePolicy]> {
        self.specializations.get(cnd).map(Vec::as_slice)
    }

    pub fn add_specialization(&mut self, cnd: impl Into<String>, policies: Vec<AttributePolicy>) {
        self.specializations.insert(cnd.into(), policies);
    }

    /// Whether unknown attributes are tolerated for the type.
    pub fn is_lenient(&self, ty: ResourceType) -> bool {
        self.lenient.contains(&ty)
    }

    /// Load flexContainer specialization policy files (`*.yaml`) from a
    /// directory. Returns the number of specializations loaded.
    pub fn load_specializations(&mut self, dir: &Path) -> Result<usize, String> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| format!("cannot read policy directory {}: {e}", dir.display()))?;
        let mut loaded = 0;
        for entry in entries {
            let entry = entry.map_err(|e| e.to_string())?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
            let file: SpecializationFile = serde_yaml::from_str(&raw)
                .map_err(|e| format!("bad policy file {}: {e}", path.display()))?;
            let mut policies = Vec::with_capacity(file.attributes.len());
            for a in file.attributes {
                policies.push(a.into_policy()?);
            }
            tracing::debug!(
                cnd = %file.container_definition,
                attributes = policies.len(),
                "loaded flexContainer specialization"
            );
            self.specializations.insert(file.container_definition, policies);
            loaded += 1;
        }
        Ok(loaded)
    }
}

#[derive(Deserialize)]
struct SpecializationFile {
    #[serde(rename = "containerDefinition")]
    container_definition: String,
    attributes: Vec<SpecializationAttr>,
}

#[derive(Deserialize)]
struct SpecializationAttr {
    name: String,
    #[serde(rename = "type")]
    typ: String,
    #[serde(default = "default_optionality")]
    create: String,
    #[serde(default = "default_optionality")]
    update: String,
    #[serde(default = "default_announce")]
    announce: String,
}

fn default_optionality() -> String {
    "O".to_string()
}

fn default_announce() -> String {
    "OA".to_string()
}

impl SpecializationAttr {
    fn into_policy(self) -> Result<AttributePolicy, String> {
        Ok(AttributePolicy {
            typ: AttrType::parse(&self.typ)?,
            create: parse_optionality(&self.create)?,
            update: parse_optionality(&self.update)?,
            announce: parse_announce(&self.announce)?,
            name: self.name,
        })
    }
}

fn parse_optionality(s: &str) -> Result<Optionality, String> {
    match s {
        "M" => Ok(Optionality::Mandatory),
        "O" => Ok(Optionality::Optional),
        "NP" => Ok(Optionality::NotPresent),
        other => Err(format!("unknown optionality: {other}")),
    }
}

fn parse_announce(s: &str) -> Result<Announce, String> {
    match s {
        "NA" => Ok(Announce::NA),
        "MA" => Ok(Announce::MA),
        "OA" => Ok(Announce::OA),
        other => Err(format!("unknown announce flag: {other}")),
    }
}

fn enum_range(spec: &str) -> AttrType {
    AttrType::Enumerated(EnumRange::parse(spec).expect("static enum range"))
}

fn universal_policies() -> Vec<AttributePolicy> {
    vec![
        attr("rn", AttrType::Str, O, NP, NA),
        attr("ri", AttrType::Str, NP, NP, NA),
        attr("pi", AttrType::Str, NP, NP, NA),
        attr("ty", AttrType::NonNegInt, NP, NP, NA),
        attr("ct", AttrType::Timestamp, NP, NP, NA),
        attr("lt", AttrType::Timestamp, NP, NP, NA),
        attr("et", AttrType::Timestamp, O, O, MA),
        attr("lbl", AttrType::ListOfStrings, O, O, MA),
        attr("acpi", AttrType::ListOfUris, O, O, MA),
    ]
}

fn announceable_common() -> Vec<AttributePolicy> {
    vec![
        attr("at", AttrType::ListOfStrings, O, O, NA),
        attr("aa", AttrType::ListOfStrings, O, O, NA),
    ]
}

fn default_type_policies() -> Vec<(ResourceType, Vec<AttributePolicy>)> {
    let mut tables = Vec::new();

    tables.push((
        ResourceType::CseBase,
        vec![
            attr("cst", enum_range("1..3"), NP, NP, NA),
            attr("csi", AttrType::Str, NP, NP, NA),
            attr("srt", AttrType::List, NP, NP, NA),
            attr("srv", AttrType::ListOfStrings, NP, NP, NA),
            attr("poa", AttrType::ListOfUris, NP, O, NA),
            attr("csz", AttrType::ListOfStrings, NP, NP, NA),
        ],
    ));

    let mut ae = vec![
        attr("apn", AttrType::Str, O, O, OA),
        attr("api", AttrType::Str, M, NP, MA),
        attr("aei", AttrType::Str, NP, NP, MA),
        attr("poa", AttrType::ListOfUris, O, O, OA),
        attr("or", AttrType::AnyUri, O, O, OA),
        attr("rr", AttrType::Bool, M, O, OA),
        attr("srv", AttrType::ListOfStrings, O, O, MA),
        attr("csz", AttrType::ListOfStrings, O, O, OA),
        attr("nl", AttrType::AnyUri, O, O, OA),
    ];
    ae.extend(announceable_common());
    tables.push((ResourceType::Ae, ae));

    let mut cnt = vec![
        attr("st", AttrType::NonNegInt, NP, NP, OA),
        attr("cni", AttrType::NonNegInt, NP, NP, NA),
        attr("cbs", AttrType::NonNegInt, NP, NP, NA),
        attr("mni", AttrType::NonNegInt, O, O, OA),
        attr("mbs", AttrType::NonNegInt, O, O, OA),
        attr("mia", AttrType::NonNegInt, O, O, OA),
        attr("li", AttrType::AnyUri, O, NP, OA),
        attr("or", AttrType::AnyUri, O, O, OA),
        attr("disr", AttrType::Bool, O, O, OA),
        attr("cr", AttrType::Str, O, NP, NA),
    ];
    cnt.extend(announceable_common());
    tables.push((ResourceType::Cnt, cnt));

    let mut cin = vec![
        attr("cnf", AttrType::Str, O, NP, OA),
        attr("cs", AttrType::NonNegInt, NP, NP, MA),
        attr("con", AttrType::Any, M, NP, MA),
        attr("st", AttrType::NonNegInt, NP, NP, OA),
        attr("or", AttrType::AnyUri, O, NP, OA),
        attr("cr", AttrType::Str, O, NP, NA),
    ];
    cin.extend(announceable_common());
    tables.push((ResourceType::Cin, cin));

    let mut acp = vec![
        attr("pv", AttrType::Dict, M, O, MA),
        attr("pvs", AttrType::Dict, M, O, MA),
    ];
    acp.extend(announceable_common());
    tables.push((ResourceType::Acp, acp));

    tables.push((
        ResourceType::Sub,
        vec![
            attr("enc", AttrType::Dict, O, O, NA),
            attr("exc", AttrType::NonNegInt, O, O, NA),
            attr("nu", AttrType::ListOfStrings, M, O, NA),
            attr("gpi", AttrType::Str, O, O, NA),
            attr("nfu", AttrType::Str, O, O, NA),
            attr("bn", AttrType::Dict, O, O, NA),
            attr("rl", AttrType::NonNegInt, O, O, NA),
            attr("psn", AttrType::NonNegInt, O, O, NA),
            attr("pn", enum_range("1..2"), O, O, NA),
            attr("nsp", AttrType::NonNegInt, O, O, NA),
            attr("ln", AttrType::Bool, O, O, NA),
            attr("nct", enum_range("1..4"), O, O, NA),
            attr("nec", AttrType::Str, O, O, NA),
            attr("cr", AttrType::Str, O, NP, NA),
            attr("su", AttrType::Str, O, NP, NA),
            attr("nse", AttrType::Bool, O, O, NA),
            attr("nsi", AttrType::List, NP, NP, NA),
        ],
    ));

    tables.push((
        ResourceType::Grp,
        vec![
            attr("mt", AttrType::NonNegInt, O, NP, NA),
            attr("cnm", AttrType::NonNegInt, NP, NP, NA),
            attr("mnm", AttrType::PositiveInt, M, O, NA),
            attr("mid", AttrType::ListOfStrings, M, O, NA),
            attr("macp", AttrType::ListOfUris, O, O, NA),
            attr("mtv", AttrType::Bool, NP, NP, NA),
            attr("csy", enum_range("1..3"), O, NP, NA),
            attr("gn", AttrType::Str, O, O, NA),
            attr("ssi", AttrType::Bool, NP, NP, NA),
            attr("cr", AttrType::Str, O, NP, NA),
        ],
    ));

    let mut csr = vec![
        attr("cst", enum_range("1..3"), O, NP, OA),
        attr("poa", AttrType::ListOfUris, O, O, MA),
        attr("cb", AttrType::Str, M, NP, MA),
        attr("csi", AttrType::Str, M, NP, MA),
        attr("mei", AttrType::Str, O, NP, OA),
        attr("tri", AttrType::Str, O, NP, OA),
        attr("rr", AttrType::Bool, O, O, OA),
        attr("nl", AttrType::AnyUri, O, O, OA),
        attr("srv", AttrType::ListOfStrings, O, O, OA),
        attr("csz", AttrType::ListOfStrings, O, O, OA),
        attr("dcse", AttrType::ListOfStrings, O, O, OA),
    ];
    csr.extend(announceable_common());
    tables.push((ResourceType::Csr, csr));

    tables.push((
        ResourceType::Req,
        vec![
            attr("op", AttrType::NonNegInt, NP, NP, NA),
            attr("tg", AttrType::Str, NP, NP, NA),
            attr("org", AttrType::Str, NP, NP, NA),
            attr("rid", AttrType::Str, NP, NP, NA),
            attr("mi", AttrType::Dict, NP, NP, NA),
            attr("pc", AttrType::Any, NP, NP, NA),
            attr("rs", enum_range("1..5"), NP, NP, NA),
            attr("ors", AttrType::Dict, NP, NP, NA),
        ],
    ));

    let mut fcnt = vec![
        attr("cnd", AttrType::Str, M, NP, MA),
        attr("cs", AttrType::NonNegInt, NP, NP, OA),
        attr("or", AttrType::AnyUri, O, O, OA),
        attr("cr", AttrType::Str, O, NP, NA),
    ];
    fcnt.extend(announceable_common());
    tables.push((ResourceType::Fcnt, fcnt));

    tables.push((
        ResourceType::Pch,
        vec![attr("rqag", AttrType::Bool, O, O, NA)],
    ));

    // Announced variants: the link is mandatory, the rest is mirrored and
    // accepted leniently.
    for ty in [
        ResourceType::AcpAnnc,
        ResourceType::AeAnnc,
        ResourceType::CntAnnc,
        ResourceType::CinAnnc,
        ResourceType::FcntAnnc,
    ] {
        tables.push((ty, vec![attr("lnk", AttrType::Str, M, NP, NA)]));
    }

    tables
}
