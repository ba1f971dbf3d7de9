//! Comma-joined identity lists, as used in `list` replies and outbound
//! `relay` headers.

use crate::error::ProtocolError;

/// Hub-assigned number naming one connected client.
pub type Identity = u64;

pub fn join_ids(ids: &[Identity]) -> String {
    ids.iter()
        .map(Identity::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parses `3,7,42` into `[3, 7, 42]`, keeping order and duplicates.
pub fn parse_ids(field: &str) -> Result<Vec<Identity>, ProtocolError> {
    field
        .split(',')
        .map(|part| {
            if part.is_empty() {
                return Err(ProtocolError::EmptyId);
            }
            parse_u64("identity", part)
        })
        .collect()
}

pub(crate) fn parse_u64(field: &'static str, value: &str) -> Result<u64, ProtocolError> {
    // `u64::from_str` accepts a leading `+`, the wire format does not.
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidInteger {
            field,
            value: value.to_string(),
        });
    }
    value.parse().map_err(|_| ProtocolError::InvalidInteger {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_without_spaces() {
        assert_eq!(join_ids(&[5, 9]), "5,9");
        assert_eq!(join_ids(&[42]), "42");
        assert_eq!(join_ids(&[]), "");
    }

    #[test]
    fn parses_in_order_with_duplicates() {
        assert_eq!(parse_ids("3,7,42").unwrap(), vec![3, 7, 42]);
        assert_eq!(parse_ids("7,3,7").unwrap(), vec![7, 3, 7]);
    }

    #[test]
    fn rejects_empty_fields() {
        assert_eq!(parse_ids(""), Err(ProtocolError::EmptyId));
        assert_eq!(parse_ids("1,,2"), Err(ProtocolError::EmptyId));
        assert_eq!(parse_ids("1,2,"), Err(ProtocolError::EmptyId));
    }

    #[test]
    fn rejects_non_numeric_fields() {
        assert_eq!(
            parse_ids("1,x"),
            Err(ProtocolError::InvalidInteger {
                field: "identity",
                value: "x".into()
            })
        );
        assert!(parse_ids("+4").is_err());
        assert!(parse_ids(" 4").is_err());
        assert!(parse_ids("18446744073709551616").is_err());
    }
}
