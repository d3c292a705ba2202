use ethers::types::Address;

use crate::{GatewayError, GatewayResult, HdWalletRequest};

/// Parse and validate an address field, accepting an optional `0x` prefix.
pub fn parse_address(field: &'static str, value: &str) -> GatewayResult<Address> {
    let trimmed = value.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex_part.len() != 40 {
        return Err(GatewayError::InvalidAddress {
            field,
            detail: format!("expected 40 hex characters, got {}", hex_part.len()),
        });
    }
    hex_part
        .parse::<Address>()
        .map_err(|e| GatewayError::InvalidAddress {
            field,
            detail: e.to_string(),
        })
}

/// Normalized sender form: lowercase hex with a `0x` prefix.
pub fn addr_0x(addr: Address) -> String {
    format!("{addr:#x}")
}

/// Registry filename form: lowercase hex, no prefix.
pub fn addr_no_prefix(addr: Address) -> String {
    format!("{addr:x}")
}

/// Parse an HD-wallet sender string of the form `hd-<instance>-<wallet>-<index>`.
/// Anything else, including a plain address, returns `None`.
pub fn parse_hd_wallet_request(from: &str) -> Option<HdWalletRequest> {
    let rest = from.strip_prefix("hd-")?;
    let mut parts = rest.splitn(3, '-');
    let instance = parts.next()?.to_string();
    let wallet = parts.next()?.to_string();
    let index = parts.next()?.parse::<u64>().ok()?;
    if instance.is_empty() || wallet.is_empty() {
        return None;
    }
    Some(HdWalletRequest {
        instance,
        wallet,
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_addresses_with_and_without_prefix() {
        let with = parse_address("from", "0x0123456789AbcdeF0123456789abCdef01234567").unwrap();
        let without = parse_address("from", "0123456789abcdef0123456789abcdef01234567").unwrap();
        assert_eq!(with, without);
        assert_eq!(
            addr_no_prefix(with),
            "0123456789abcdef0123456789abcdef01234567"
        );
        assert_eq!(
            addr_0x(with),
            "0x0123456789abcdef0123456789abcdef01234567"
        );
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(parse_address("from", "0x1234").is_err());
        assert!(parse_address("to", "not-an-address-at-all-not-an-address-at-a").is_err());
    }

    #[test]
    fn recognizes_hd_wallet_requests() {
        let req = parse_hd_wallet_request("hd-u0abcd1234-u0efgh5678-42").unwrap();
        assert_eq!(req.instance, "u0abcd1234");
        assert_eq!(req.wallet, "u0efgh5678");
        assert_eq!(req.index, 42);

        assert!(parse_hd_wallet_request("0x0123456789abcdef0123456789abcdef01234567").is_none());
        assert!(parse_hd_wallet_request("hd-only-two").is_none());
        assert!(parse_hd_wallet_request("hd---7").is_none());
    }
}
