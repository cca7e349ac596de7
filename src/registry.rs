//! Token Registry
//!
//! Static symbol -> token mapping, fixed for the process lifetime after
//! start-up. Designates the wrapped-native token used as the AMM
//! intermediary. The native coin and its wrapped form are distinct entries
//! with distinct addresses (native uses the zero address by convention).
//!
//! Author: AI-Generated
//! Created: 2026-02-03

use crate::errors::{EngineError, EngineResult};
use alloy::primitives::Address;
use std::collections::HashMap;

/// A recognized token. Value object, cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    pub is_native: bool,
}

/// Symbol lookup table. Read-only after construction.
#[derive(Debug, Clone)]
pub struct TokenRegistry {
    tokens: HashMap<String, Token>,
    wrapped_symbol: String,
}

impl TokenRegistry {
    /// Build the registry from the native symbol, its wrapped form, and any
    /// additional ERC-20s declared at start-up. Duplicate symbols or reused
    /// addresses are configuration errors.
    pub fn new(
        native_symbol: &str,
        wrapped_symbol: &str,
        wrapped_address: Address,
        erc20s: Vec<(String, Address, u8)>,
    ) -> EngineResult<Self> {
        let mut tokens = HashMap::new();
        let native_symbol = native_symbol.to_uppercase();
        let wrapped_symbol = wrapped_symbol.to_uppercase();

        tokens.insert(
            native_symbol.clone(),
            Token {
                symbol: native_symbol.clone(),
                address: Address::ZERO,
                decimals: 18,
                is_native: true,
            },
        );
        tokens.insert(
            wrapped_symbol.clone(),
            Token {
                symbol: wrapped_symbol.clone(),
                address: wrapped_address,
                decimals: 18,
                is_native: false,
            },
        );

        let mut seen_addresses: Vec<Address> = vec![wrapped_address];
        for (symbol, address, decimals) in erc20s {
            let symbol = symbol.to_uppercase();
            if tokens.contains_key(&symbol) {
                return Err(EngineError::InvalidArgument(format!("duplicate token symbol {symbol}")));
            }
            if address == Address::ZERO || seen_addresses.contains(&address) {
                return Err(EngineError::InvalidArgument(format!(
                    "token {symbol} reuses address {address}"
                )));
            }
            seen_addresses.push(address);
            tokens.insert(
                symbol.clone(),
                Token { symbol, address, decimals, is_native: false },
            );
        }

        Ok(Self { tokens, wrapped_symbol })
    }

    pub fn by_symbol(&self, symbol: &str) -> Option<&Token> {
        self.tokens.get(&symbol.to_uppercase())
    }

    /// Resolve a symbol or fail with the boundary error kind.
    pub fn resolve(&self, symbol: &str) -> EngineResult<&Token> {
        self.by_symbol(symbol)
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown token symbol {symbol}")))
    }

    pub fn wrapped_native(&self) -> &Token {
        // Inserted unconditionally in new(); cannot be absent.
        &self.tokens[&self.wrapped_symbol]
    }

    pub fn is_native(&self, symbol: &str) -> bool {
        self.by_symbol(symbol).map(|t| t.is_native).unwrap_or(false)
    }

    /// The token actually moved on-chain for a leg: the wrapped form for
    /// the native coin, the token itself otherwise.
    pub fn routed<'a>(&'a self, token: &'a Token) -> &'a Token {
        if token.is_native {
            self.wrapped_native()
        } else {
            token
        }
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.tokens.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::from([n; 20])
    }

    fn registry() -> TokenRegistry {
        TokenRegistry::new(
            "XFI",
            "WXFI",
            addr(1),
            vec![("USDC".into(), addr(2), 6), ("WETH".into(), addr(3), 18)],
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let reg = registry();
        assert!(reg.by_symbol("usdc").is_some());
        assert!(reg.by_symbol("Usdc").is_some());
        assert!(reg.by_symbol("DOGE").is_none());
    }

    #[test]
    fn test_native_and_wrapped_are_distinct() {
        let reg = registry();
        let native = reg.by_symbol("XFI").unwrap();
        let wrapped = reg.wrapped_native();
        assert!(native.is_native);
        assert!(!wrapped.is_native);
        assert_ne!(native.address, wrapped.address);
        assert_eq!(wrapped.address, addr(1));
        assert_eq!(wrapped.decimals, 18);
    }

    #[test]
    fn test_routed_substitutes_wrapped_for_native() {
        let reg = registry();
        let native = reg.by_symbol("XFI").unwrap();
        let usdc = reg.by_symbol("USDC").unwrap();
        assert_eq!(reg.routed(native).symbol, "WXFI");
        assert_eq!(reg.routed(usdc).symbol, "USDC");
    }

    #[test]
    fn test_duplicate_symbol_rejected() {
        let err = TokenRegistry::new("XFI", "WXFI", addr(1), vec![("WXFI".into(), addr(2), 18)]);
        assert!(err.is_err());
    }

    #[test]
    fn test_reused_address_rejected() {
        let err = TokenRegistry::new("XFI", "WXFI", addr(1), vec![("USDC".into(), addr(1), 6)]);
        assert!(err.is_err());
    }

    #[test]
    fn test_is_native() {
        let reg = registry();
        assert!(reg.is_native("XFI"));
        assert!(!reg.is_native("WXFI"));
        assert!(!reg.is_native("USDC"));
        assert!(!reg.is_native("DOGE"));
    }
}
