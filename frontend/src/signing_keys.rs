//! usign/signify public keys used to sign downloads on the OpenWRT mirrors,
//! as published on https://openwrt.org/docs/guide-user/security/signatures.

use time::macros::datetime;
use time::OffsetDateTime;

/// A set of public keys, and the time they were retrieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SigningKeys<'a> {
    /// Written as creation time of all key files.
    pub timestamp: OffsetDateTime,
    /// Key id (16 hex characters) and key file contents.
    pub keys: &'a [(&'a str, &'a str)],
}

impl SigningKeys<'static> {
    /// The keys compiled into the frontend.
    pub fn builtin() -> Self {
        Self {
            timestamp: SIGNING_KEYS_TIMESTAMP,
            keys: SIGNING_KEYS,
        }
    }
}

pub const SIGNING_KEYS_TIMESTAMP: OffsetDateTime = datetime!(2021-02-13 17:26:35 UTC);

pub const SIGNING_KEYS: &[(&str, &str)] = &[
    (
        "0b26f36ae0f4106d",
        "untrusted comment: Public usign key of Stijn Tintel
RWQLJvNq4PQQbSGZ05Az9jXSt/xlw/IfWc6USiB2FHEUoWL7QpMibzv6",
    ),
    (
        "1035ac73cc4e59e3",
        "untrusted comment: Public usign key for 18.06 release builds
RWQQNaxzzE5Z41cVmEh2rilAPKLsyfPKm+S4BJWA1Yv+LP1hKebmGtXi",
    ),
    (
        "5151f69420c3f508",
        "untrusted comment: Public usign key of Hans Dedecker
RWRRUfaUIMP1CAL9wvk3ABBHdUM+3SjMvIuJlK68b3b04Pw3wiaiAfxX",
    ),
    (
        "72a57f2191b211e0",
        "untrusted comment: Public usign key of Jo-Philipp Wich
RWRypX8hkbIR4FLhtx5pjXcAIsI1iPUIcI5bMG8jZoiCkrwTstECBPqL",
    ),
    (
        "792d9d9b39f180dc",
        "untrusted comment: Public usign key for 17.01 \"Reboot\" release builds
RWR5LZ2bOfGA3FGliZosEDhodiAKDOISmQs/mmjo4rhcbFtqkibJqMzo",
    ),
    (
        "9ef4694208102c43",
        "untrusted comment: Public usign key of Álvaro Fernández Rojas
RWSe9GlCCBAsQwI5+wztnWKHfBlvPFP2G00FvZyx+Wfv9AwSViUwo/s2",
    ),
    (
        "b2d571e0880ff617",
        "untrusted comment: Public usign key of Hauke Mehrtens
RWSy1XHgiA/2F8nrQOTCa0aRCJzueqmDRzhxuwBJuC++Btb37yr7FKG0",
    ),
    (
        "b5043e70f9a75cde",
        "untrusted comment: Public usign key for unattended snapshot builds
RWS1BD5w+adc3j2Hqg9+b66CvLR7NlHbsj7wjNVj0XGt/othDgIAOJS+",
    ),
    (
        "c10b9afab19ee428",
        "untrusted comment: Public usign key of Alexander Couzens
RWTBC5r6sZ7kKA/C5VnxUbJw5E0vy3MGo3MP2eXCQlgg65+2si4MKBnf",
    ),
    (
        "dace9d4df16896bf",
        "untrusted comment: Public usign key of Ted Hess
RWTazp1N8WiWvy7rYxstJqaMzGiS4XfW1oyYrk2vwJMRBeBF+8xEA+EZ",
    ),
    (
        "dd6de0d06bbd3d85",
        "untrusted comment: Public usign key of John Crispin
RWTdbeDQa709heyMmwDZjWmlhcTCUv/q+3TBYDPdJAGRuys6xcxE09fp",
    ),
    (
        "f94b9dd6febac963",
        "untrusted comment: Public usign key for 19.07 release builds
RWT5S53W/rrJY9BiIod3JF04AZ/eU1xDpVOb+rjZzAQBEcoETGx8BXEK",
    ),
];

#[cfg(test)]
mod tests {
    use time::format_description::well_known::Rfc3339;

    use super::{SIGNING_KEYS, SIGNING_KEYS_TIMESTAMP};

    #[test]
    fn key_ids() {
        for (id, key) in SIGNING_KEYS {
            assert_eq!(16, id.len(), "{id}");
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()), "{id}");
            assert!(key.starts_with("untrusted comment: "), "{id}");
            assert_eq!(2, key.lines().count(), "{id}");
        }
    }

    #[test]
    fn timestamp() {
        assert_eq!(
            "2021-02-13T17:26:35Z",
            SIGNING_KEYS_TIMESTAMP.format(&Rfc3339).unwrap()
        );
    }
}
