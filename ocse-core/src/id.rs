use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

/// Generate an opaque resource identifier of the configured length.
pub fn generate_ri(len: usize) -> String {
    random_alnum(len)
}

/// Generate a default resource name for a type, e.g. `cnt_4Xb9qA`.
pub fn generate_rn(type_short: &str) -> String {
    format!("{}_{}", type_short, random_alnum(6))
}

/// Generate (or validate) an AE-ID for a registering originator.
///
/// An empty originator or a bare `C`/`S` requests assignment; an originator
/// already carrying a `C`- or `S`-prefixed identifier keeps it.
pub fn assign_aei(originator: &str, len: usize) -> Option<String> {
    match originator {
        "" | "C" | "S" => Some(format!("C{}", random_alnum(len))),
        other if other.starts_with('C') || other.starts_with('S') => Some(other.to_string()),
        _ => None,
    }
}

/// Generate a request identifier for internally originated primitives.
pub fn generate_rqi() -> String {
    Uuid::new_v4().simple().to_string()
}

fn random_alnum(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ri_has_requested_length() {
        assert_eq!(generate_ri(10).len(), 10);
        assert_eq!(generate_ri(4).len(), 4);
    }

    #[test]
    fn rn_carries_type_prefix() {
        let rn = generate_rn("cnt");
        assert!(rn.starts_with("cnt_"));
        assert_eq!(rn.len(), "cnt_".len() + 6);
    }

    #[test]
    fn aei_assignment() {
        let assigned = assign_aei("", 8).unwrap();
        assert!(assigned.starts_with('C'));
        assert_eq!(assigned.len(), 9);

        assert_eq!(assign_aei("CmyAe", 8).unwrap(), "CmyAe");
        assert_eq!(assign_aei("Sdevice1", 8).unwrap(), "Sdevice1");
        assert!(assign_aei("badname", 8).is_none());
    }

    #[test]
    fn rqi_unique_enough() {
        assert_ne!(generate_rqi(), generate_rqi());
    }
}
