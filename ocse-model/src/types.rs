/// Resource types shipped by this CSE, with their TS-0004 type codes.
///
/// Announced variants carry `10000 + original` as their code. The set is the
/// supported subset; an unknown code in a CREATE is rejected by the
/// dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Acp,
    Ae,
    Cnt,
    Cin,
    CseBase,
    Grp,
    Pch,
    Csr,
    Req,
    Sub,
    Fcnt,
    AcpAnnc,
    AeAnnc,
    CntAnnc,
    CinAnnc,
    FcntAnnc,
}

impl ResourceType {
    pub fn code(self) -> u32 {
        use ResourceType::*;
        match self {
            Acp => 1,
            Ae => 2,
            Cnt => 3,
            Cin => 4,
            CseBase => 5,
            Grp => 9,
            Pch => 15,
            Csr => 16,
            Req => 17,
            Sub => 23,
            Fcnt => 28,
            AcpAnnc => 10001,
            AeAnnc => 10002,
            CntAnnc => 10003,
            CinAnnc => 10004,
            FcntAnnc => 10028,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        use ResourceType::*;
        let ty = match code {
            1 => Acp,
            2 => Ae,
            3 => Cnt,
            4 => Cin,
            5 => CseBase,
            9 => Grp,
            15 => Pch,
            16 => Csr,
            17 => Req,
            23 => Sub,
            28 => Fcnt,
            10001 => AcpAnnc,
            10002 => AeAnnc,
            10003 => CntAnnc,
            10004 => CinAnnc,
            10028 => FcntAnnc,
            _ => return None,
        };
        Some(ty)
    }

    /// Wire wrapper name (`m2m:cnt` etc.). FlexContainers carry a
    /// specialization-specific wrapper which overrides this default.
    pub fn tpe(self) -> &'static str {
        use ResourceType::*;
        match self {
            Acp => "m2m:acp",
            Ae => "m2m:ae",
            Cnt => "m2m:cnt",
            Cin => "m2m:cin",
            CseBase => "m2m:cb",
            Grp => "m2m:grp",
            Pch => "m2m:pch",
            Csr => "m2m:csr",
            Req => "m2m:req",
            Sub => "m2m:sub",
            Fcnt => "m2m:fcnt",
            AcpAnnc => "m2m:acpA",
            AeAnnc => "m2m:aeA",
            CntAnnc => "m2m:cntA",
            CinAnnc => "m2m:cinA",
            FcntAnnc => "m2m:fcntA",
        }
    }

    /// Short name used for generated resource names.
    pub fn short(self) -> &'static str {
        use ResourceType::*;
        match self {
            Acp => "acp",
            Ae => "ae",
            Cnt => "cnt",
            Cin => "cin",
            CseBase => "cb",
            Grp => "grp",
            Pch => "pch",
            Csr => "csr",
            Req => "req",
            Sub => "sub",
            Fcnt => "fcnt",
            AcpAnnc => "acpA",
            AeAnnc => "aeA",
            CntAnnc => "cntA",
            CinAnnc => "cinA",
            FcntAnnc => "fcntA",
        }
    }

    pub fn is_announced(self) -> bool {
        self.code() >= 10000
    }

    /// The announced variant of this type, if it is announceable.
    pub fn announced_variant(self) -> Option<ResourceType> {
        use ResourceType::*;
        match self {
            Acp => Some(AcpAnnc),
            Ae => Some(AeAnnc),
            Cnt => Some(CntAnnc),
            Cin => Some(CinAnnc),
            Fcnt => Some(FcntAnnc),
            _ => None,
        }
    }

    /// Types an originator may create through the API.
    ///
    /// The CSEBase exists exactly once and `<request>` resources are
    /// materialized by the dispatcher only.
    pub fn is_api_creatable(self) -> bool {
        !matches!(self, ResourceType::CseBase | ResourceType::Req)
    }

    /// Static parent/child type-compatibility matrix.
    pub fn can_have_child(self, child: ResourceType) -> bool {
        use ResourceType::*;
        match self {
            CseBase => matches!(
                child,
                Acp | Ae | Cnt | Fcnt | Grp | Csr | Req | Sub | AcpAnnc | AeAnnc | CntAnnc
                    | CinAnnc | FcntAnnc
            ),
            Ae => matches!(child, Acp | Cnt | Fcnt | Grp | Sub | Pch),
            Cnt => matches!(child, Cnt | Cin | Sub),
            Grp => matches!(child, Sub),
            Acp => matches!(child, Sub),
            Csr => matches!(
                child,
                Acp | Cnt | Fcnt | Grp | Sub | Pch | AcpAnnc | AeAnnc | CntAnnc | CinAnnc
                    | FcntAnnc
            ),
            Fcnt => matches!(child, Fcnt | Sub),
            AeAnnc => matches!(child, CntAnnc | FcntAnnc),
            CntAnnc => matches!(child, CntAnnc | CinAnnc),
            FcntAnnc => matches!(child, FcntAnnc),
            Cin | Req | Sub | Pch | AcpAnnc | CinAnnc => false,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.short(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        for ty in [
            ResourceType::Acp,
            ResourceType::Ae,
            ResourceType::Cnt,
            ResourceType::Cin,
            ResourceType::CseBase,
            ResourceType::Grp,
            ResourceType::Pch,
            ResourceType::Csr,
            ResourceType::Req,
            ResourceType::Sub,
            ResourceType::Fcnt,
            ResourceType::AeAnnc,
        ] {
            assert_eq!(ResourceType::from_code(ty.code()), Some(ty));
        }
        assert!(ResourceType::from_code(999).is_none());
    }

    #[test]
    fn announced_codes_offset_by_10000() {
        assert_eq!(
            ResourceType::Ae.announced_variant().unwrap().code(),
            ResourceType::Ae.code() + 10000
        );
        assert_eq!(
            ResourceType::Cnt.announced_variant().unwrap().code(),
            ResourceType::Cnt.code() + 10000
        );
    }

    #[test]
    fn child_matrix() {
        assert!(ResourceType::CseBase.can_have_child(ResourceType::Ae));
        assert!(ResourceType::Cnt.can_have_child(ResourceType::Cin));
        assert!(ResourceType::Cnt.can_have_child(ResourceType::Cnt));
        assert!(ResourceType::Ae.can_have_child(ResourceType::Pch));
        assert!(!ResourceType::Cin.can_have_child(ResourceType::Cnt));
        assert!(!ResourceType::CseBase.can_have_child(ResourceType::Cin));
        assert!(!ResourceType::Grp.can_have_child(ResourceType::Cnt));
    }

    #[test]
    fn creatability() {
        assert!(!ResourceType::CseBase.is_api_creatable());
        assert!(!ResourceType::Req.is_api_creatable());
        assert!(ResourceType::Cnt.is_api_creatable());
        assert!(ResourceType::AeAnnc.is_api_creatable());
    }
}
