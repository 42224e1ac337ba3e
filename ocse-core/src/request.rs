use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CseError;
use crate::rsc::ResponseStatusCode;

/// oneM2M primitive operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Retrieve,
    Update,
    Delete,
    Notify,
    Discovery,
}

impl Operation {
    /// Wire value (discovery is a retrieve with `fu=1`, it keeps code 2).
    pub fn code(self) -> u8 {
        match self {
            Operation::Create => 1,
            Operation::Retrieve | Operation::Discovery => 2,
            Operation::Update => 3,
            Operation::Delete => 4,
            Operation::Notify => 5,
        }
    }

    /// Bit used in access-control `acop` masks.
    pub fn acop_bit(self) -> u32 {
        match self {
            Operation::Create => 1,
            Operation::Retrieve => 2,
            Operation::Update => 4,
            Operation::Delete => 8,
            Operation::Notify => 16,
            Operation::Discovery => 32,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Retrieve => "RETRIEVE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Notify => "NOTIFY",
            Operation::Discovery => "DISCOVERY",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Release version indicator (`rvi`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReleaseVersion {
    #[serde(rename = "2a")]
    R2a,
    #[serde(rename = "3")]
    R3,
    #[serde(rename = "4")]
    R4,
    #[serde(rename = "5")]
    R5,
}

impl ReleaseVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseVersion::R2a => "2a",
            ReleaseVersion::R3 => "3",
            ReleaseVersion::R4 => "4",
            ReleaseVersion::R5 => "5",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "2a" => Some(ReleaseVersion::R2a),
            "3" => Some(ReleaseVersion::R3),
            "4" => Some(ReleaseVersion::R4),
            "5" => Some(ReleaseVersion::R5),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response type (`rt`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResponseType {
    NonBlockingSync,
    NonBlockingAsync,
    #[default]
    Blocking,
    FlexBlocking,
    NoResponse,
}

impl ResponseType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ResponseType::NonBlockingSync),
            2 => Some(ResponseType::NonBlockingAsync),
            3 => Some(ResponseType::Blocking),
            4 => Some(ResponseType::FlexBlocking),
            5 => Some(ResponseType::NoResponse),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ResponseType::NonBlockingSync => 1,
            ResponseType::NonBlockingAsync => 2,
            ResponseType::Blocking => 3,
            ResponseType::FlexBlocking => 4,
            ResponseType::NoResponse => 5,
        }
    }
}

/// Result content (`rcn`), values 0..=12.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultContent {
    Nothing,
    Attributes,
    HierarchicalAddress,
    HierarchicalAddressAttributes,
    AttributesChildResources,
    AttributesChildReferences,
    ChildReferences,
    OriginalResource,
    ChildResources,
    ModifiedAttributes,
    SemanticContent,
    SemanticContentChildResources,
    Permissions,
}

impl ResultContent {
    pub fn from_code(code: u8) -> Option<Self> {
        use ResultContent::*;
        match code {
            0 => Some(Nothing),
            1 => Some(Attributes),
            2 => Some(HierarchicalAddress),
            3 => Some(HierarchicalAddressAttributes),
            4 => Some(AttributesChildResources),
            5 => Some(AttributesChildReferences),
            6 => Some(ChildReferences),
            7 => Some(OriginalResource),
            8 => Some(ChildResources),
            9 => Some(ModifiedAttributes),
            10 => Some(SemanticContent),
            11 => Some(SemanticContentChildResources),
            12 => Some(Permissions),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        use ResultContent::*;
        match self {
            Nothing => 0,
            Attributes => 1,
            HierarchicalAddress => 2,
            HierarchicalAddressAttributes => 3,
            AttributesChildResources => 4,
            AttributesChildReferences => 5,
            ChildReferences => 6,
            OriginalResource => 7,
            ChildResources => 8,
            ModifiedAttributes => 9,
            SemanticContent => 10,
            SemanticContentChildResources => 11,
            Permissions => 12,
        }
    }
}

/// Filter usage (`fu`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterUsage {
    Discovery,
    ConditionalRetrieval,
}

impl FilterUsage {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(FilterUsage::Discovery),
            2 => Some(FilterUsage::ConditionalRetrieval),
            _ => None,
        }
    }
}

/// Filter operation (`fo`): how the criteria combine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FilterOperation {
    #[default]
    And,
    Or,
}

impl FilterOperation {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(FilterOperation::And),
            2 => Some(FilterOperation::Or),
            _ => None,
        }
    }
}

/// Filter criteria (`fc`) for discovery and conditional retrieval.
#[derive(Clone, Debug, Default)]
pub struct FilterCriteria {
    /// Resource type codes to match.
    pub ty: Vec<u32>,
    /// Labels to match.
    pub lbl: Vec<String>,
    /// Created before / created after (oneM2M timestamps).
    pub crb: Option<String>,
    pub cra: Option<String>,
    /// Modified since / unmodified since.
    pub ms: Option<String>,
    pub us: Option<String>,
    /// Expire before / expire after.
    pub exb: Option<String>,
    pub exa: Option<String>,
    /// Size above / size below (content size, bytes).
    pub sza: Option<u64>,
    pub szb: Option<u64>,
    pub fu: Option<FilterUsage>,
    pub fo: FilterOperation,
    /// Maximum number of results.
    pub lim: Option<usize>,
    /// Maximum depth below the target.
    pub lvl: Option<usize>,
    /// Offset into the result set.
    pub ofst: Option<usize>,
    /// Applicable resource path appended to each discovered member.
    pub arp: Option<String>,
    /// Direct attribute matches (name -> expected value).
    pub attr: serde_json::Map<String, Value>,
}

impl FilterCriteria {
    /// True when no condition is set (limits and usage aside).
    pub fn is_empty(&self) -> bool {
        self.ty.is_empty()
            && self.lbl.is_empty()
            && self.crb.is_none()
            && self.cra.is_none()
            && self.ms.is_none()
            && self.us.is_none()
            && self.exb.is_none()
            && self.exa.is_none()
            && self.sza.is_none()
            && self.szb.is_none()
            && self.attr.is_empty()
    }
}

/// Which binding delivered a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Origin {
    Http,
    Mqtt,
    Ws,
    Coap,
    #[default]
    Internal,
}

/// Canonical request record every binding normalizes to.
#[derive(Clone, Debug)]
pub struct Request {
    pub op: Operation,
    /// Target address in any accepted form.
    pub to: String,
    /// Originator identifier.
    pub from: String,
    /// Request identifier, unique per originator.
    pub rqi: String,
    pub rvi: Option<ReleaseVersion>,
    /// Resource type code, required for CREATE.
    pub ty: Option<u32>,
    /// Primitive content.
    pub pc: Option<Value>,
    pub rcn: Option<ResultContent>,
    pub rt: ResponseType,
    /// Response target URIs for nonBlockingAsync.
    pub rtu: Vec<String>,
    pub fc: FilterCriteria,
    /// Desired identifier result type: 1 structured, 2 unstructured.
    pub drt: Option<u8>,
    /// Partial-retrieve attribute list (release 5).
    pub atrl: Vec<String>,
    /// Originating timestamp.
    pub ot: Option<String>,
    /// Request expiration timestamp.
    pub rqet: Option<String>,
    /// Result expiration timestamp.
    pub rset: Option<String>,
    /// Event category.
    pub ec: Option<String>,
    pub vsi: Option<String>,
    /// Hop count, incremented on each transit forward.
    pub hc: u32,
    pub origin: Origin,
}

impl Request {
    pub fn builder(op: Operation, to: impl Into<String>, from: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(op, to, from)
    }

    /// Result content with the operation default applied.
    pub fn result_content(&self) -> ResultContent {
        self.rcn.unwrap_or(match self.op {
            Operation::Discovery => ResultContent::ChildResources,
            Operation::Delete => ResultContent::Nothing,
            _ => ResultContent::Attributes,
        })
    }
}

/// Builder for internally originated requests (fan-out, forwarding, sweeps).
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    pub fn new(op: Operation, to: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            request: Request {
                op,
                to: to.into(),
                from: from.into(),
                rqi: crate::id::generate_rqi(),
                rvi: Some(ReleaseVersion::R4),
                ty: None,
                pc: None,
                rcn: None,
                rt: ResponseType::Blocking,
                rtu: Vec::new(),
                fc: FilterCriteria::default(),
                drt: None,
                atrl: Vec::new(),
                ot: Some(crate::time::now_timestamp()),
                rqet: None,
                rset: None,
                ec: None,
                vsi: None,
                hc: 0,
                origin: Origin::Internal,
            },
        }
    }

    pub fn ty(mut self, ty: u32) -> Self {
        self.request.ty = Some(ty);
        self
    }

    pub fn pc(mut self, pc: Value) -> Self {
        self.request.pc = Some(pc);
        self
    }

    pub fn rqi(mut self, rqi: impl Into<String>) -> Self {
        self.request.rqi = rqi.into();
        self
    }

    pub fn rvi(mut self, rvi: ReleaseVersion) -> Self {
        self.request.rvi = Some(rvi);
        self
    }

    pub fn rcn(mut self, rcn: ResultContent) -> Self {
        self.request.rcn = Some(rcn);
        self
    }

    pub fn rt(mut self, rt: ResponseType) -> Self {
        self.request.rt = rt;
        self
    }

    pub fn rqet(mut self, rqet: impl Into<String>) -> Self {
        self.request.rqet = Some(rqet.into());
        self
    }

    pub fn fc(mut self, fc: FilterCriteria) -> Self {
        self.request.fc = fc;
        self
    }

    pub fn origin(mut self, origin: Origin) -> Self {
        self.request.origin = origin;
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}

/// Canonical response record.
#[derive(Clone, Debug)]
pub struct Response {
    pub rsc: ResponseStatusCode,
    pub rqi: String,
    pub pc: Option<Value>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub ot: Option<String>,
}

impl Response {
    pub fn new(rsc: ResponseStatusCode, rqi: impl Into<String>) -> Self {
        Self {
            rsc,
            rqi: rqi.into(),
            pc: None,
            from: None,
            to: None,
            ot: Some(crate::time::now_timestamp()),
        }
    }

    pub fn with_pc(mut self, pc: Value) -> Self {
        self.pc = Some(pc);
        self
    }

    pub fn from_error(rqi: impl Into<String>, err: &CseError) -> Self {
        Self::new(err.rsc(), rqi).with_pc(serde_json::json!({
            "m2m:dbg": err.message(),
        }))
    }

    pub fn is_success(&self) -> bool {
        self.rsc.is_success()
    }
}
