/// Attribute value types known to the validator.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrType {
    PositiveInt,
    NonNegInt,
    UnsignedInt,
    UnsignedLong,
    Float,
    Bool,
    Str,
    /// oneM2M basic-format timestamp.
    Timestamp,
    /// ISO-8601 period.
    Duration,
    /// Any JSON array.
    List,
    ListOfStrings,
    ListOfUris,
    /// Any JSON object.
    Dict,
    AnyUri,
    GeoCoordinates,
    /// Integer constrained to a range policy such as `1..7,33..63`.
    Enumerated(EnumRange),
    /// Unconstrained JSON (content of a content instance).
    Any,
}

impl AttrType {
    /// Parse the textual form used in specialization policy files.
    pub fn parse(s: &str) -> Result<AttrType, String> {
        let ty = match s {
            "positiveInteger" => AttrType::PositiveInt,
            "nonNegInteger" => AttrType::NonNegInt,
            "unsignedInt" => AttrType::UnsignedInt,
            "unsignedLong" => AttrType::UnsignedLong,
            "float" => AttrType::Float,
            "boolean" => AttrType::Bool,
            "string" => AttrType::Str,
            "timestamp" => AttrType::Timestamp,
            "duration" => AttrType::Duration,
            "list" => AttrType::List,
            "listOfStrings" => AttrType::ListOfStrings,
            "listOfURIs" => AttrType::ListOfUris,
            "dict" => AttrType::Dict,
            "anyURI" => AttrType::AnyUri,
            "geoCoordinates" => AttrType::GeoCoordinates,
            "any" => AttrType::Any,
            other => {
                if let Some(range) = other.strip_prefix("enum:") {
                    AttrType::Enumerated(EnumRange::parse(range)?)
                } else {
                    return Err(format!("unknown attribute type: {other}"));
                }
            }
        };
        Ok(ty)
    }
}

/// An enumeration range policy: comma-separated values or `a..b` spans.
#[derive(Clone, Debug, PartialEq)]
pub struct EnumRange {
    ranges: Vec<(i64, i64)>,
}

impl EnumRange {
    pub fn parse(spec: &str) -> Result<EnumRange, String> {
        let mut ranges = Vec::new();
        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(format!("empty segment in enum range: {spec}"));
            }
            match part.split_once("..") {
                Some((lo, hi)) => {
                    let lo: i64 = lo
                        .parse()
                        .map_err(|_| format!("bad enum range bound: {part}"))?;
                    let hi: i64 = hi
                        .parse()
                        .map_err(|_| format!("bad enum range bound: {part}"))?;
                    if hi < lo {
                        return Err(format!("inverted enum range: {part}"));
                    }
                    ranges.push((lo, hi));
                }
                None => {
                    let v: i64 = part
                        .parse()
                        .map_err(|_| format!("bad enum value: {part}"))?;
                    ranges.push((v, v));
                }
            }
        }
        Ok(EnumRange { ranges })
    }

    pub fn contains(&self, value: i64) -> bool {
        self.ranges.iter().any(|(lo, hi)| *lo <= value && value <= *hi)
    }
}

/// Presence requirement for an attribute in a CREATE or UPDATE primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Optionality {
    Mandatory,
    Optional,
    /// The attribute must not appear in the primitive (CSE-assigned).
    NotPresent,
}

/// Whether the attribute is mirrored to announced copies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Announce {
    /// Never announced.
    NA,
    /// Always announced.
    MA,
    /// Announced when listed in the resource's `aa`.
    OA,
}

/// Policy describing one attribute of a resource type.
#[derive(Clone, Debug)]
pub struct AttributePolicy {
    pub name: String,
    pub typ: AttrType,
    pub create: Optionality,
    pub update: Optionality,
    pub announce: Announce,
}

/// Shorthand constructor used by the policy tables.
pub fn attr(
    name: &str,
    typ: AttrType,
    create: Optionality,
    update: Optionality,
    announce: Announce,
) -> AttributePolicy {
    AttributePolicy {
        name: name.to_string(),
        typ,
        create,
        update,
        announce,
    }
}
