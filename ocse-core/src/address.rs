use crate::error::CseError;

/// Virtual resources addressed through a path suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VirtualKind {
    /// `la` — latest content instance of a container.
    Latest,
    /// `ol` — oldest content instance of a container.
    Oldest,
    /// `fopt` — fan-out point of a group.
    FanOutPoint,
    /// `pcu` — polling channel URI.
    PollingChannelUri,
}

impl VirtualKind {
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "la" | "latest" => Some(VirtualKind::Latest),
            "ol" | "oldest" => Some(VirtualKind::Oldest),
            "fopt" => Some(VirtualKind::FanOutPoint),
            "pcu" => Some(VirtualKind::PollingChannelUri),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VirtualKind::Latest => "la",
            VirtualKind::Oldest => "ol",
            VirtualKind::FanOutPoint => "fopt",
            VirtualKind::PollingChannelUri => "pcu",
        }
    }
}

/// A parsed target address.
///
/// Accepted forms:
/// - CSE-relative: `cnt1234` (unstructured) or `cse-in/ae/cnt` (structured)
/// - SP-relative: `/id-in/cnt1234`, `/id-mn/cse-mn/ae/cnt`
/// - Absolute: `//sp.example/id-in/cnt1234`
///
/// The hybrid form (a structured path below an unstructured prefix) is kept
/// verbatim in `id` and resolved by the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Address {
    CseRelative { id: String },
    SpRelative { cse_id: String, id: String },
    Absolute { sp_id: String, cse_id: String, id: String },
}

impl Address {
    pub fn parse(to: &str) -> Result<Address, CseError> {
        if to.is_empty() {
            return Err(CseError::bad_request("empty target address"));
        }
        if let Some(rest) = to.strip_prefix("//") {
            // //spid/csi/id
            let mut parts = rest.splitn(3, '/');
            let sp_id = parts.next().unwrap_or_default();
            let cse_id = parts.next().unwrap_or_default();
            let id = parts.next().unwrap_or_default();
            if sp_id.is_empty() || cse_id.is_empty() {
                return Err(CseError::bad_request(format!(
                    "malformed absolute address: {to}"
                )));
            }
            Ok(Address::Absolute {
                sp_id: sp_id.to_string(),
                cse_id: format!("/{cse_id}"),
                id: id.to_string(),
            })
        } else if let Some(rest) = to.strip_prefix('/') {
            // /csi/id
            let mut parts = rest.splitn(2, '/');
            let cse_id = parts.next().unwrap_or_default();
            let id = parts.next().unwrap_or_default();
            if cse_id.is_empty() {
                return Err(CseError::bad_request(format!(
                    "malformed SP-relative address: {to}"
                )));
            }
            Ok(Address::SpRelative {
                cse_id: format!("/{cse_id}"),
                id: id.to_string(),
            })
        } else {
            Ok(Address::CseRelative { id: to.to_string() })
        }
    }

    /// The CSE-local identifier part (ri, srn, or hybrid path).
    pub fn local_id(&self) -> &str {
        match self {
            Address::CseRelative { id } => id,
            Address::SpRelative { id, .. } => id,
            Address::Absolute { id, .. } => id,
        }
    }

    /// The targeted CSE-ID, when the form carries one.
    pub fn cse_id(&self) -> Option<&str> {
        match self {
            Address::CseRelative { .. } => None,
            Address::SpRelative { cse_id, .. } => Some(cse_id),
            Address::Absolute { cse_id, .. } => Some(cse_id),
        }
    }

    pub fn sp_id(&self) -> Option<&str> {
        match self {
            Address::Absolute { sp_id, .. } => Some(sp_id),
            _ => None,
        }
    }
}

/// Whether a local identifier is structured (a path of resource names).
pub fn is_structured(id: &str) -> bool {
    id.contains('/')
}

/// Split a trailing virtual-resource segment off a local identifier.
///
/// `"cse-in/cnt/la"` becomes `("cse-in/cnt", Some(Latest))`; a plain id is
/// returned unchanged.
pub fn split_virtual(id: &str) -> (&str, Option<VirtualKind>) {
    match id.rsplit_once('/') {
        Some((base, tail)) => match VirtualKind::from_segment(tail) {
            Some(kind) => (base, Some(kind)),
            None => (id, None),
        },
        None => (id, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cse_relative_unstructured() {
        let addr = Address::parse("cnt1234").unwrap();
        assert_eq!(
            addr,
            Address::CseRelative {
                id: "cnt1234".into()
            }
        );
        assert!(addr.cse_id().is_none());
    }

    #[test]
    fn parse_cse_relative_structured() {
        let addr = Address::parse("cse-in/myae/cnt").unwrap();
        assert_eq!(addr.local_id(), "cse-in/myae/cnt");
        assert!(is_structured(addr.local_id()));
    }

    #[test]
    fn parse_sp_relative() {
        let addr = Address::parse("/id-in/cnt1234").unwrap();
        assert_eq!(addr.cse_id(), Some("/id-in"));
        assert_eq!(addr.local_id(), "cnt1234");
    }

    #[test]
    fn parse_sp_relative_cse_base_only() {
        let addr = Address::parse("/id-in").unwrap();
        assert_eq!(addr.cse_id(), Some("/id-in"));
        assert_eq!(addr.local_id(), "");
    }

    #[test]
    fn parse_absolute() {
        let addr = Address::parse("//sp.example/id-in/cse-in/ae").unwrap();
        assert_eq!(addr.sp_id(), Some("sp.example"));
        assert_eq!(addr.cse_id(), Some("/id-in"));
        assert_eq!(addr.local_id(), "cse-in/ae");
    }

    #[test]
    fn parse_rejects_empty_and_malformed() {
        assert!(Address::parse("").is_err());
        assert!(Address::parse("/").is_err());
        assert!(Address::parse("//sponly").is_err());
    }

    #[test]
    fn virtual_split() {
        assert_eq!(
            split_virtual("cse-in/cnt/la"),
            ("cse-in/cnt", Some(VirtualKind::Latest))
        );
        assert_eq!(
            split_virtual("cse-in/grp/fopt"),
            ("cse-in/grp", Some(VirtualKind::FanOutPoint))
        );
        assert_eq!(split_virtual("cse-in/cnt"), ("cse-in/cnt", None));
        assert_eq!(split_virtual("cnt1234"), ("cnt1234", None));
    }
}
