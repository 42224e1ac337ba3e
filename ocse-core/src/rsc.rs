use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// oneM2M Response Status Code.
///
/// The numeric values are the wire values from TS-0004; `http_status` gives
/// the canonical HTTP binding mapping.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatusCode {
    // Informational / accepted
    Accepted,
    AcceptedNonBlockingSync,
    AcceptedNonBlockingAsync,
    // Success
    Ok,
    Created,
    Deleted,
    Updated,
    // Originator errors
    BadRequest,
    ReleaseVersionNotSupported,
    NotFound,
    OperationNotAllowed,
    RequestTimeout,
    UnsupportedMediaType,
    OriginatorHasNoPrivilege,
    GroupRequestIdentifierExists,
    Conflict,
    OriginatorNotRegistered,
    InvalidChildResourceType,
    GroupMemberTypeInconsistent,
    AlreadyRegistered,
    // Receiver errors
    InternalServerError,
    NotImplemented,
    TargetNotReachable,
    ReceiverHasNoPrivilege,
    AlreadyExists,
    TargetNotSubscribable,
    NotAcceptable,
    GroupMembersNotResponded,
    // Network service errors
    RemoteEntityNotReachable,
    MaxNumberOfMemberExceeded,
    InvalidArguments,
}

impl ResponseStatusCode {
    /// Numeric wire value.
    pub fn code(self) -> u16 {
        use ResponseStatusCode::*;
        match self {
            Accepted => 1000,
            AcceptedNonBlockingSync => 1001,
            AcceptedNonBlockingAsync => 1002,
            Ok => 2000,
            Created => 2001,
            Deleted => 2002,
            Updated => 2004,
            BadRequest => 4000,
            ReleaseVersionNotSupported => 4001,
            NotFound => 4004,
            OperationNotAllowed => 4005,
            RequestTimeout => 4008,
            UnsupportedMediaType => 4015,
            OriginatorHasNoPrivilege => 4103,
            GroupRequestIdentifierExists => 4104,
            Conflict => 4105,
            OriginatorNotRegistered => 4106,
            InvalidChildResourceType => 4108,
            GroupMemberTypeInconsistent => 4110,
            AlreadyRegistered => 4117,
            InternalServerError => 5000,
            NotImplemented => 5001,
            TargetNotReachable => 5103,
            ReceiverHasNoPrivilege => 5105,
            AlreadyExists => 5106,
            TargetNotSubscribable => 5203,
            NotAcceptable => 5207,
            GroupMembersNotResponded => 5209,
            RemoteEntityNotReachable => 6003,
            MaxNumberOfMemberExceeded => 6010,
            InvalidArguments => 6023,
        }
    }

    /// Parse a numeric wire value.
    pub fn from_code(code: u16) -> Option<Self> {
        use ResponseStatusCode::*;
        let rsc = match code {
            1000 => Accepted,
            1001 => AcceptedNonBlockingSync,
            1002 => AcceptedNonBlockingAsync,
            2000 => Ok,
            2001 => Created,
            2002 => Deleted,
            2004 => Updated,
            4000 => BadRequest,
            4001 => ReleaseVersionNotSupported,
            4004 => NotFound,
            4005 => OperationNotAllowed,
            4008 => RequestTimeout,
            4015 => UnsupportedMediaType,
            4103 => OriginatorHasNoPrivilege,
            4104 => GroupRequestIdentifierExists,
            4105 => Conflict,
            4106 => OriginatorNotRegistered,
            4108 => InvalidChildResourceType,
            4110 => GroupMemberTypeInconsistent,
            4117 => AlreadyRegistered,
            5000 => InternalServerError,
            5001 => NotImplemented,
            5103 => TargetNotReachable,
            5105 => ReceiverHasNoPrivilege,
            5106 => AlreadyExists,
            5203 => TargetNotSubscribable,
            5207 => NotAcceptable,
            5209 => GroupMembersNotResponded,
            6003 => RemoteEntityNotReachable,
            6010 => MaxNumberOfMemberExceeded,
            6023 => InvalidArguments,
            _ => return None,
        };
        Some(rsc)
    }

    /// Whether the code signals success (1xxx accepted or 2xxx completed).
    pub fn is_success(self) -> bool {
        self.code() < 4000
    }

    /// HTTP status the canonical HTTP binding maps this code to.
    pub fn http_status(self) -> u16 {
        use ResponseStatusCode::*;
        match self {
            Accepted | AcceptedNonBlockingSync | AcceptedNonBlockingAsync => 202,
            Ok | Deleted | Updated => 200,
            Created => 201,
            BadRequest | ReleaseVersionNotSupported | InvalidChildResourceType
            | GroupMemberTypeInconsistent | InvalidArguments | MaxNumberOfMemberExceeded => 400,
            NotFound => 404,
            OperationNotAllowed | GroupRequestIdentifierExists => 405,
            RequestTimeout => 408,
            UnsupportedMediaType => 415,
            OriginatorHasNoPrivilege | ReceiverHasNoPrivilege | OriginatorNotRegistered
            | AlreadyRegistered => 403,
            Conflict | AlreadyExists => 409,
            InternalServerError => 500,
            NotImplemented => 501,
            TargetNotReachable | RemoteEntityNotReachable => 404,
            TargetNotSubscribable | NotAcceptable | GroupMembersNotResponded => 400,
        }
    }
}

impl std::fmt::Display for ResponseStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::fmt::Debug for ResponseStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RSC({})", self.code())
    }
}

impl Serialize for ResponseStatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.code())
    }
}

impl<'de> Deserialize<'de> for ResponseStatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = u16::deserialize(deserializer)?;
        ResponseStatusCode::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown response status code {code}")))
    }
}
