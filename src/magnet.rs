//! CBL magnet URLs: an out-of-band file reference (spec §6).
//!
//! `magnet:?xt=urn:brightchain:<cblHex>&dn=<fileName>&xl=<originalLength>`

use url::Url;

use crate::{checksum::Checksum, error::Error};

const SCHEME: &str = "magnet";
const URN_PREFIX: &str = "urn:brightchain:";

/// The fields carried by a CBL magnet link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Magnet {
    pub cbl_checksum: Checksum,
    pub file_name: Option<String>,
    pub original_length: Option<u64>,
}

/// Render a magnet URL for the given CBL checksum.
pub fn encode(magnet: &Magnet) -> String {
    let mut url = Url::parse(&format!("{SCHEME}:?")).expect("static magnet scheme always parses");
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("xt", &format!("{URN_PREFIX}{}", magnet.cbl_checksum.hex()));
        if let Some(name) = &magnet.file_name {
            pairs.append_pair("dn", name);
        }
        if let Some(length) = magnet.original_length {
            pairs.append_pair("xl", &length.to_string());
        }
    }
    url.to_string()
}

/// Parse a magnet URL. Unknown extra query parameters are ignored.
pub fn parse(input: &str) -> Result<Magnet, Error> {
    let url = Url::parse(input).map_err(|e| Error::InvalidHex(e.to_string()))?;
    if url.scheme() != SCHEME {
        return Err(Error::InvalidHex(format!(
            "expected the {SCHEME:?} scheme, got {:?}",
            url.scheme()
        )));
    }

    let mut cbl_checksum = None;
    let mut file_name = None;
    let mut original_length = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "xt" => {
                let hex = value
                    .strip_prefix(URN_PREFIX)
                    .ok_or_else(|| Error::InvalidHex(format!("xt parameter missing {URN_PREFIX:?} prefix")))?;
                cbl_checksum = Some(Checksum::from_hex(hex)?);
            }
            "dn" => file_name = Some(value.into_owned()),
            "xl" => {
                original_length = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| Error::InvalidHex("xl parameter is not a valid integer".into()))?,
                );
            }
            _ => {}
        }
    }

    Ok(Magnet {
        cbl_checksum: cbl_checksum.ok_or_else(|| Error::InvalidHex("missing xt parameter".into()))?,
        file_name,
        original_length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_full_magnet() {
        let magnet = Magnet {
            cbl_checksum: Checksum::calculate(b"a cbl block"),
            file_name: Some("report final v2.pdf".to_string()),
            original_length: Some(123_456),
        };

        let encoded = encode(&magnet);
        assert!(encoded.starts_with("magnet:?"));

        let parsed = parse(&encoded).unwrap();
        assert_eq!(parsed, magnet);
    }

    #[test]
    fn parse_ignores_unknown_parameters() {
        let checksum = Checksum::calculate(b"a cbl block");
        let input = format!(
            "magnet:?xt=urn:brightchain:{}&tr=udp://example.com&dn=file.txt",
            checksum.hex()
        );
        let parsed = parse(&input).unwrap();
        assert_eq!(parsed.cbl_checksum, checksum);
        assert_eq!(parsed.file_name.as_deref(), Some("file.txt"));
        assert_eq!(parsed.original_length, None);
    }

    #[test]
    fn parse_rejects_missing_xt() {
        let err = parse("magnet:?dn=file.txt").unwrap_err();
        assert!(matches!(err, Error::InvalidHex(_)));
    }

    #[test]
    fn parse_rejects_wrong_scheme() {
        let err = parse("http://example.com").unwrap_err();
        assert!(matches!(err, Error::InvalidHex(_)));
    }
}
