use super::descriptor::Lineage;
use crate::ancient::AncientMode;
use crate::error::{PcesError, Result};
use chrono::{DateTime, SecondsFormat, Utc};

pub const EVENT_FILE_EXTENSION: &str = "pces";

const SEPARATOR: char = '_';
const SEQUENCE_NUMBER_PREFIX: &str = "seq";
const ORIGIN_PREFIX: &str = "ori";
const DISCONTINUITY_MARKER: &str = "D";

/// Fields recovered from a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedName {
    pub timestamp: DateTime<Utc>,
    pub sequence_number: u64,
    pub lower_bound: i64,
    pub upper_bound: i64,
    pub lineage: Lineage,
    pub ancient_mode: AncientMode,
}

fn encode_timestamp(timestamp: &DateTime<Utc>) -> String {
    // Colons are not portable in file names.
    timestamp
        .to_rfc3339_opts(SecondsFormat::AutoSi, true)
        .replace(':', "+")
}

fn decode_timestamp(name: &str, token: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&token.replace('+', ":"))
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| invalid(name, format!("bad timestamp {token:?}: {e}")))
}

fn invalid(name: &str, reason: impl Into<String>) -> PcesError {
    PcesError::InvalidFileName {
        name: String::from(name),
        reason: reason.into(),
    }
}

fn parse_number<T: std::str::FromStr>(
    name: &str,
    token: &str,
    prefix: &str,
    field: &str,
) -> Result<T> {
    let value = token
        .strip_prefix(prefix)
        .ok_or_else(|| invalid(name, format!("expected {field} token {prefix}<n>, got {token:?}")))?;

    // Reject signs and whitespace that FromStr would otherwise accept.
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(name, format!("{field} is not numeric: {value:?}")));
    }

    value
        .parse::<T>()
        .map_err(|_| invalid(name, format!("{field} out of range: {value:?}")))
}

/// Builds the file name of a descriptor.
///
/// `<timestamp>_seq<n>_<min><lower>_<max><upper>_ori<origin>.pces`, or for
/// legacy descriptors `<timestamp>_seq<n>_<min><lower>_<max><upper>[_D].pces`.
pub fn encode_file_name(
    timestamp: &DateTime<Utc>,
    sequence_number: u64,
    lower_bound: i64,
    upper_bound: i64,
    lineage: Lineage,
    ancient_mode: AncientMode,
) -> String {
    let mut name = format!(
        "{ts}{sep}{seq_prefix}{sequence_number}{sep}{min}{lower_bound}{sep}{max}{upper_bound}",
        ts = encode_timestamp(timestamp),
        sep = SEPARATOR,
        seq_prefix = SEQUENCE_NUMBER_PREFIX,
        min = ancient_mode.lower_bound_prefix(),
        max = ancient_mode.upper_bound_prefix(),
    );

    match lineage {
        Lineage::Origin(origin) => {
            name.push(SEPARATOR);
            name.push_str(ORIGIN_PREFIX);
            name.push_str(&origin.to_string());
        }
        Lineage::Legacy { discontinuity: true } => {
            name.push(SEPARATOR);
            name.push_str(DISCONTINUITY_MARKER);
        }
        Lineage::Legacy {
            discontinuity: false,
        } => {}
    }

    name.push('.');
    name.push_str(EVENT_FILE_EXTENSION);
    name
}

/// Parses a bare file name (no directories).
pub(crate) fn parse_file_name(name: &str) -> Result<ParsedName> {
    let stem = name
        .strip_suffix(EVENT_FILE_EXTENSION)
        .and_then(|s| s.strip_suffix('.'))
        .ok_or_else(|| invalid(name, "missing .pces extension"))?;

    let mut parts = stem.split(SEPARATOR);

    let timestamp = parts.next().ok_or_else(|| invalid(name, "missing timestamp"))?;
    let sequence_number = parts
        .next()
        .ok_or_else(|| invalid(name, "missing sequence number"))?;
    let lower_bound = parts.next().ok_or_else(|| invalid(name, "missing lower bound"))?;
    let upper_bound = parts.next().ok_or_else(|| invalid(name, "missing upper bound"))?;
    let lineage = parts.next();

    if parts.next().is_some() {
        return Err(invalid(name, "too many fields"));
    }

    let timestamp = decode_timestamp(name, timestamp)?;
    let sequence_number: u64 =
        parse_number(name, sequence_number, SEQUENCE_NUMBER_PREFIX, "sequence number")?;

    let (ancient_mode, _) = AncientMode::from_lower_bound_token(lower_bound)
        .ok_or_else(|| invalid(name, format!("unknown lower bound token {lower_bound:?}")))?;
    let lower_bound: i64 = parse_number(
        name,
        lower_bound,
        ancient_mode.lower_bound_prefix(),
        "lower bound",
    )?;
    let upper_bound: i64 = parse_number(
        name,
        upper_bound,
        ancient_mode.upper_bound_prefix(),
        "upper bound",
    )?;

    if upper_bound < lower_bound {
        return Err(invalid(
            name,
            format!("upper bound {upper_bound} is below lower bound {lower_bound}"),
        ));
    }

    let lineage = match lineage {
        None => Lineage::Legacy {
            discontinuity: false,
        },
        Some(DISCONTINUITY_MARKER) => Lineage::Legacy {
            discontinuity: true,
        },
        Some(token) => Lineage::Origin(parse_number(name, token, ORIGIN_PREFIX, "origin")?),
    };

    Ok(ParsedName {
        timestamp,
        sequence_number,
        lower_bound,
        upper_bound,
        lineage,
        ancient_mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 12, 34, 56).unwrap()
            + chrono::TimeDelta::nanoseconds(789_000_000)
    }

    #[test]
    fn test_encode_generation_name() {
        let name = encode_file_name(
            &timestamp(),
            12,
            100,
            250,
            Lineage::Origin(7),
            AncientMode::Generation,
        );
        assert_eq!(name, "2024-05-15T12+34+56.789Z_seq12_ming100_maxg250_ori7.pces");
    }

    #[test]
    fn test_encode_birth_round_name() {
        let name = encode_file_name(
            &timestamp(),
            0,
            5,
            5,
            Lineage::Origin(5),
            AncientMode::BirthRound,
        );
        assert_eq!(name, "2024-05-15T12+34+56.789Z_seq0_minr5_maxr5_ori5.pces");
    }

    #[test]
    fn test_legacy_names() {
        let plain = encode_file_name(
            &timestamp(),
            3,
            1,
            2,
            Lineage::Legacy {
                discontinuity: false,
            },
            AncientMode::Generation,
        );
        assert_eq!(plain, "2024-05-15T12+34+56.789Z_seq3_ming1_maxg2.pces");

        let parsed = parse_file_name("2024-05-15T12+34+56.789Z_seq3_ming1_maxg2_D.pces").unwrap();
        assert_eq!(
            parsed.lineage,
            Lineage::Legacy {
                discontinuity: true
            }
        );
        assert_eq!(parsed.sequence_number, 3);
        assert_eq!(parsed.timestamp, timestamp());
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        let bad = [
            "2024-05-15T12+34+56Z_seq1_ming1_maxg2_ori0.journal",
            "2024-05-15T12+34+56Z_seq1_ming1_maxg2_ori0",
            "2024-05-15T12+34+56Z_seq1_ming1.pces",
            "2024-05-15T12+34+56Z_seqX_ming1_maxg2_ori0.pces",
            "2024-05-15T12+34+56Z_seq1_ming-1_maxg2_ori0.pces",
            "2024-05-15T12+34+56Z_seq1_ming1_maxr2_ori0.pces",
            "2024-05-15T12+34+56Z_seq1_mink1_maxg2_ori0.pces",
            "2024-05-15T12+34+56Z_seq1_ming1_maxg2_orix.pces",
            "2024-05-15T12+34+56Z_seq1_ming1_maxg2_ori0_extra.pces",
            "not-a-timestamp_seq1_ming1_maxg2_ori0.pces",
        ];

        for name in bad {
            assert!(
                matches!(parse_file_name(name), Err(PcesError::InvalidFileName { .. })),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_rejects_inverted_span() {
        let result = parse_file_name("2024-05-15T12+34+56Z_seq1_ming10_maxg9_ori0.pces");
        assert!(matches!(result, Err(PcesError::InvalidFileName { .. })));
    }
}
